mod error;
mod events;
mod filter;
mod identity;
mod kind;
mod loader;
mod model;
mod mutation;
mod node;
mod node_path;
mod object;
mod preferences;
mod progress;
mod settings;
mod sort;
mod source;
pub(crate) mod sync;
mod task;

pub use error::{NavError, SourceError};
pub use events::{
    EventSubscription, NavigatorEvent, NavigatorEventKind, NavigatorListener, SubscriptionId,
};
pub use filter::{
    CompiledFilter, ContainerFilters, FilterScope, NodeFilter, PATTERN_SEPARATOR, apply_filters,
};
pub use kind::{NodeCapabilities, NodeKind};
pub use loader::ResolveOptions;
pub use model::{NavigatorModel, NavigatorModelBuilder};
pub use node::{Node, NodeId};
pub use node_path::{NodePath, ParseNodePathError};
pub use object::{DomainObject, ROOT_OBJECT_TYPE};
pub use preferences::{JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore};
pub use progress::{NoopProgress, ProgressReporter};
pub use settings::{
    NavigatorConfig, NavigatorSettings, SHOW_SYSTEM_OBJECTS_KEY, SORT_ALPHABETICAL_KEY,
    SORT_FOLDERS_FIRST_KEY, load_filter, remove_filter, save_filter,
};
pub use sort::SortPolicy;
pub use source::{CapabilityQuery, DataSource, KindCapabilities, SourceRegistry};
pub use task::{CancelToken, LoadTaskId, LoadTaskManager, LoadTaskSnapshot, TaskStatus};
