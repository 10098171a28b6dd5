use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::events::{EventBus, NavigatorEventKind};
use crate::identity::IdentityMap;
use crate::loader::ResolveOptions;
use crate::settings::{load_filter, remove_filter, save_filter};
use crate::sort::sort_nodes;
use crate::{
    CancelToken, CapabilityQuery, DataSource, DomainObject, EventSubscription, FilterScope,
    KindCapabilities, LoadTaskManager, LoadTaskSnapshot, MemoryPreferenceStore, NavError,
    NavigatorConfig, NavigatorListener, NavigatorSettings, Node, NodeFilter, NodePath,
    PreferenceStore, ProgressReporter, SortPolicy, SourceRegistry, SubscriptionId, sync,
};

pub(crate) struct ModelInner {
    pub root: Arc<Node>,
    pub identity: IdentityMap,
    pub sources: SourceRegistry,
    pub capabilities: Arc<dyn CapabilityQuery>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub settings: RwLock<NavigatorSettings>,
    pub filters: Mutex<HashMap<FilterScope, Option<NodeFilter>>>,
    pub tasks: Mutex<LoadTaskManager>,
    pub bus: EventBus,
    pub config: NavigatorConfig,
    pub move_lock: Mutex<()>,
    pub disposed: AtomicBool,
}

impl ModelInner {
    pub fn settings(&self) -> NavigatorSettings {
        *sync::read(&self.settings)
    }

    /// Fails with `StaleNode` if `node` was removed from the forest.
    pub fn ensure_live(&self, node: &Arc<Node>) -> Result<(), NavError> {
        let path = node.path();
        let registered = self
            .identity
            .get(&path)
            .is_some_and(|current| Arc::ptr_eq(&current, node));

        if registered && !self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }

        log::warn!("Ignoring operation on stale node '{}'", path);
        Err(NavError::StaleNode(path))
    }

    /// Filter configured for `scope`, read from preferences on first access.
    pub fn filter_for(&self, scope: &FilterScope) -> Option<NodeFilter> {
        let mut filters = sync::lock(&self.filters);
        filters
            .entry(scope.clone())
            .or_insert_with(|| load_filter(self.preferences.as_ref(), scope))
            .clone()
    }

    /// Loaded containers of the forest, parents before children.
    fn loaded_containers(&self) -> Vec<Arc<Node>> {
        self.root
            .collect_subtree()
            .into_iter()
            .filter(|node| node.is_container() && node.children_loaded())
            .collect()
    }
}

/// Builds a `NavigatorModel`.
pub struct NavigatorModelBuilder {
    sources: SourceRegistry,
    capabilities: Arc<dyn CapabilityQuery>,
    preferences: Arc<dyn PreferenceStore>,
    config: NavigatorConfig,
}

impl Default for NavigatorModelBuilder {
    fn default() -> Self {
        Self {
            sources: SourceRegistry::new(),
            capabilities: Arc::new(KindCapabilities),
            preferences: Arc::new(MemoryPreferenceStore::new()),
            config: NavigatorConfig::default(),
        }
    }
}

impl NavigatorModelBuilder {
    /// Data source listing the children of nodes whose object type is `object_type`.
    pub fn source(self, object_type: impl Into<String>, source: Arc<dyn DataSource>) -> Self {
        self.sources.register(object_type, source);
        self
    }

    /// Data source for object types without a registered source.
    pub fn fallback_source(self, source: Arc<dyn DataSource>) -> Self {
        self.sources.set_fallback(source);
        self
    }

    pub fn capabilities(mut self, capabilities: Arc<dyn CapabilityQuery>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn preferences(mut self, preferences: Arc<dyn PreferenceStore>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn config(mut self, config: NavigatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> NavigatorModel {
        let settings = NavigatorSettings::load(self.preferences.as_ref());
        let root = Node::new_root();
        let identity = IdentityMap::new();
        identity.register(&root);

        log::info!(
            "Navigator ready (alphabetical: {}, folders first: {}, system objects: {})",
            settings.sort.alphabetical,
            settings.sort.folders_first,
            settings.show_system_objects
        );

        NavigatorModel {
            inner: Arc::new(ModelInner {
                root,
                identity,
                sources: self.sources,
                capabilities: self.capabilities,
                preferences: self.preferences,
                settings: RwLock::new(settings),
                filters: Mutex::new(HashMap::new()),
                tasks: Mutex::new(LoadTaskManager::new()),
                bus: EventBus::new(),
                config: self.config,
                move_lock: Mutex::new(()),
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

/// Handle to a navigator forest.
///
/// Cloning the handle shares the forest. Operations that may contact a data
/// source block the calling thread until the load they wait for ends or the
/// caller's `CancelToken` fires; everything else only touches memory.
#[derive(Clone)]
pub struct NavigatorModel {
    pub(crate) inner: Arc<ModelInner>,
}

impl NavigatorModel {
    pub fn builder() -> NavigatorModelBuilder {
        NavigatorModelBuilder::default()
    }

    pub fn root(&self) -> Arc<Node> {
        self.inner.root.clone()
    }

    // --- Loading ---

    /// Children of `node`, loading them first if needed.
    ///
    /// Concurrent callers for the same node share a single load. Cancelling
    /// `cancel` makes this call return `Cancelled` right away; the load itself
    /// stops only if this call started it and nobody else is waiting.
    pub fn get_children(
        &self,
        node: &Arc<Node>,
        cancel: &CancelToken,
    ) -> Result<Vec<Arc<Node>>, NavError> {
        self.inner.children_of(node, cancel, None)
    }

    /// Like `get_children`, forwarding progress of a load started by this call.
    pub fn get_children_with_progress(
        &self,
        node: &Arc<Node>,
        cancel: &CancelToken,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<Vec<Arc<Node>>, NavError> {
        self.inner.children_of(node, cancel, Some(progress))
    }

    /// Reloads the children of `node`, reusing nodes of objects still listed.
    pub fn refresh(
        &self,
        node: &Arc<Node>,
        cancel: &CancelToken,
    ) -> Result<Vec<Arc<Node>>, NavError> {
        self.inner.refresh(node, cancel)
    }

    /// Marks the children of `node` stale without loading them.
    pub fn invalidate(&self, node: &Arc<Node>) -> Result<(), NavError> {
        self.inner.ensure_live(node)?;
        self.inner.invalidate(node);
        Ok(())
    }

    // --- Lookup ---

    /// The node registered for `key`, without loading anything.
    pub fn find_node(&self, key: &NodePath) -> Option<Arc<Node>> {
        self.inner.identity.get(key)
    }

    /// Node for `key`, loading every missing ancestor on the way.
    pub fn resolve(&self, key: &NodePath, cancel: &CancelToken) -> Result<Arc<Node>, NavError> {
        self.inner
            .resolve_path(key, ResolveOptions::default(), cancel)
    }

    pub fn resolve_with(
        &self,
        key: &NodePath,
        options: ResolveOptions,
        cancel: &CancelToken,
    ) -> Result<Arc<Node>, NavError> {
        self.inner.resolve_path(key, options, cancel)
    }

    /// Node for `object` as listed under `container`.
    pub fn resolve_object(
        &self,
        container: &NodePath,
        object: &DomainObject,
        cancel: &CancelToken,
    ) -> Result<Arc<Node>, NavError> {
        self.resolve(&object.key_in(container), cancel)
    }

    /// Resolves a slash-separated path such as `"conn/db/Tables/users"`.
    pub fn find_node_by_path(
        &self,
        path: &str,
        cancel: &CancelToken,
    ) -> Result<Arc<Node>, NavError> {
        let key: NodePath = path
            .parse()
            .map_err(|_| NavError::InvalidPath(path.to_string()))?;
        self.resolve(&key, cancel)
    }

    /// Children as currently held, without triggering a load.
    pub fn cached_children(&self, node: &Arc<Node>) -> Option<Vec<Arc<Node>>> {
        node.cached_children()
    }

    pub fn can_open(&self, node: &Node) -> bool {
        self.inner.capabilities.can_open(node)
    }

    pub fn supports_drop(&self, target: &Node, candidate: &Node) -> bool {
        self.inner.capabilities.supports_drop(target, candidate)
    }

    // --- Settings and filters ---

    pub fn settings(&self) -> NavigatorSettings {
        self.inner.settings()
    }

    pub fn filter_for(&self, scope: &FilterScope) -> Option<NodeFilter> {
        self.inner.filter_for(scope)
    }

    /// Stores `filter` for `scope` and invalidates that container only.
    pub fn set_filter(&self, scope: FilterScope, filter: NodeFilter) -> Result<(), NavError> {
        filter.validate()?;
        save_filter(self.inner.preferences.as_ref(), &scope, &filter)?;

        log::info!("Filter of '{}' changed", scope.container);
        let container = scope.container.clone();
        sync::lock(&self.inner.filters).insert(scope, Some(filter));
        self.invalidate_container(&container);
        Ok(())
    }

    pub fn clear_filter(&self, scope: FilterScope) -> Result<(), NavError> {
        remove_filter(self.inner.preferences.as_ref(), &scope)?;

        let container = scope.container.clone();
        sync::lock(&self.inner.filters).insert(scope, None);
        self.invalidate_container(&container);
        Ok(())
    }

    fn invalidate_container(&self, container: &NodePath) {
        if let Some(node) = self.inner.identity.get(container) {
            self.inner.invalidate(&node);
        }
    }

    /// Changes the sort rules and re-sorts every loaded container in place.
    pub fn set_sort_policy(&self, policy: SortPolicy) -> Result<(), NavError> {
        let settings = {
            let mut settings = sync::write(&self.inner.settings);
            if settings.sort == policy {
                return Ok(());
            }
            settings.sort = policy;
            *settings
        };
        settings.save(self.inner.preferences.as_ref())?;

        for node in self.inner.loaded_containers() {
            let slot = sync::lock(&node.load_slot);
            if slot.is_some() {
                // The running load sorts with the new policy when it commits.
                continue;
            }

            let changed = {
                let mut state = node.write();
                let Some(children) = state.children.as_mut() else {
                    continue;
                };
                let before: Vec<_> = children.iter().map(|c| c.id()).collect();
                sort_nodes(children, policy);
                children.iter().map(|c| c.id()).ne(before)
            };

            if changed {
                self.inner.bus.publish_one(&node, NavigatorEventKind::Reordered);
            }
        }

        Ok(())
    }

    /// Shows or hides system objects; loaded containers reload on next access.
    pub fn set_show_system_objects(&self, show: bool) -> Result<(), NavError> {
        let settings = {
            let mut settings = sync::write(&self.inner.settings);
            if settings.show_system_objects == show {
                return Ok(());
            }
            settings.show_system_objects = show;
            *settings
        };
        settings.save(self.inner.preferences.as_ref())?;

        for node in self.inner.loaded_containers() {
            self.inner.invalidate(&node);
        }
        Ok(())
    }

    // --- Events ---

    pub fn subscribe(&self, listener: Arc<dyn NavigatorListener>) -> SubscriptionId {
        self.inner.bus.subscribe(listener)
    }

    pub fn subscribe_channel(&self) -> EventSubscription {
        self.inner.bus.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(id)
    }

    // --- Load tasks ---

    pub fn running_loads(&self) -> Vec<LoadTaskSnapshot> {
        sync::lock(&self.inner.tasks).running_tasks()
    }

    pub fn recent_loads(&self, limit: usize) -> Vec<LoadTaskSnapshot> {
        sync::lock(&self.inner.tasks).recent_tasks(limit)
    }

    pub fn loads_of(&self, node: &Node) -> Vec<LoadTaskSnapshot> {
        sync::lock(&self.inner.tasks).tasks_for(&node.path())
    }

    /// Error of the latest load of `node`, if it failed.
    pub fn last_load_error(&self, node: &Node) -> Option<String> {
        sync::lock(&self.inner.tasks).last_error_for(&node.path())
    }

    pub fn load_status_message(&self) -> Option<String> {
        sync::lock(&self.inner.tasks).current_status_message()
    }

    /// Drops finished load tasks older than `max_age`. Loads also do this on
    /// start, using the configured retention.
    pub fn cleanup_loads(&self, max_age: Duration) {
        sync::lock(&self.inner.tasks).cleanup_completed(max_age);
    }

    // --- Lifecycle ---

    /// Stops in-flight loads, disposes every node and closes subscriptions.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.bus.close();

        let nodes = self.inner.root.collect_subtree();
        for node in &nodes {
            if let Some(flight) = sync::lock(&node.load_slot).as_ref() {
                flight.abort();
            }
        }

        self.inner.root.dispose_subtree();
        self.inner.identity.clear();
        log::info!("Navigator disposed ({} nodes)", nodes.len());
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}
