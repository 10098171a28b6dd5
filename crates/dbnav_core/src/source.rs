use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{DomainObject, Node, NodeCapabilities, ProgressReporter, SourceError};

/// Lists the children of a container node.
///
/// Implementations talk to whatever backs the objects (a database connection,
/// a project directory). They run on navigator worker threads and must be
/// thread-safe. Listings should check `progress.is_canceled()` between units of
/// work and return `SourceError::Cancelled` when asked to stop.
pub trait DataSource: Send + Sync {
    fn list_children(
        &self,
        container: &Node,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<DomainObject>, SourceError>;

    /// Applies a rename to the underlying object.
    ///
    /// The default accepts every rename without contacting anything.
    fn rename_object(&self, _object: &DomainObject, _new_name: &str) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Data sources by object type, with an optional fallback.
#[derive(Default)]
pub struct SourceRegistry {
    by_type: RwLock<HashMap<String, Arc<dyn DataSource>>>,
    fallback: RwLock<Option<Arc<dyn DataSource>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, object_type: impl Into<String>, source: Arc<dyn DataSource>) {
        let object_type = object_type.into();
        log::debug!("Registered data source for '{}'", object_type);
        crate::sync::write(&self.by_type).insert(object_type, source);
    }

    pub fn set_fallback(&self, source: Arc<dyn DataSource>) {
        *crate::sync::write(&self.fallback) = Some(source);
    }

    pub fn source_for(&self, object_type: &str) -> Option<Arc<dyn DataSource>> {
        if let Some(source) = crate::sync::read(&self.by_type).get(object_type) {
            return Some(source.clone());
        }
        crate::sync::read(&self.fallback).clone()
    }
}

/// Answers whether a node supports an operation without performing it.
pub trait CapabilityQuery: Send + Sync {
    fn supports_drop(&self, target: &Node, candidate: &Node) -> bool;

    fn can_open(&self, node: &Node) -> bool;
}

/// Capability answers taken from the node kind table.
#[derive(Debug, Clone, Copy, Default)]
pub struct KindCapabilities;

impl CapabilityQuery for KindCapabilities {
    fn supports_drop(&self, target: &Node, candidate: &Node) -> bool {
        candidate
            .kind()
            .capabilities()
            .contains(NodeCapabilities::MOVE)
            && target.kind().accepts(candidate.kind())
    }

    fn can_open(&self, node: &Node) -> bool {
        node.kind().capabilities().contains(NodeCapabilities::OPEN)
    }
}
