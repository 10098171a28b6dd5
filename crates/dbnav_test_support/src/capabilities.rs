use dbnav_core::{CapabilityQuery, KindCapabilities, Node, NodePath};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Kind-table capabilities with drop targets and openable nodes overridable by path.
#[derive(Clone, Default)]
pub struct StaticCapabilities {
    refuse_drops_on: Arc<RwLock<HashSet<NodePath>>>,
    refuse_open: Arc<RwLock<HashSet<NodePath>>>,
}

impl StaticCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every drop on `target` is refused.
    pub fn refuse_drops_on(self, target: &str) -> Self {
        if let Ok(path) = target.parse()
            && let Ok(mut refused) = self.refuse_drops_on.write()
        {
            refused.insert(path);
        }
        self
    }

    pub fn refuse_open(self, node: &str) -> Self {
        if let Ok(path) = node.parse()
            && let Ok(mut refused) = self.refuse_open.write()
        {
            refused.insert(path);
        }
        self
    }

    pub fn as_capabilities_arc(&self) -> Arc<dyn CapabilityQuery> {
        Arc::new(self.clone())
    }
}

impl CapabilityQuery for StaticCapabilities {
    fn supports_drop(&self, target: &Node, candidate: &Node) -> bool {
        let refused = self
            .refuse_drops_on
            .read()
            .map(|refused| refused.contains(&target.path()))
            .unwrap_or(true);

        !refused && KindCapabilities.supports_drop(target, candidate)
    }

    fn can_open(&self, node: &Node) -> bool {
        let refused = self
            .refuse_open
            .read()
            .map(|refused| refused.contains(&node.path()))
            .unwrap_or(true);

        !refused && KindCapabilities.can_open(node)
    }
}
