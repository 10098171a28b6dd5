use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use crate::{Node, NodePath, sync};

/// Map from identity key to the single node representing it.
///
/// Entries are weak; the tree owns the nodes. The write lock is held only for
/// the map mutation itself, never while a data source is contacted.
#[derive(Default)]
pub(crate) struct IdentityMap {
    nodes: RwLock<HashMap<NodePath, Weak<Node>>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &NodePath) -> Option<Arc<Node>> {
        let node = sync::read(&self.nodes).get(key)?.upgrade()?;
        let state = node.read();
        if state.disposed || &state.path != key {
            return None;
        }
        drop(state);
        Some(node)
    }

    pub fn register(&self, node: &Arc<Node>) {
        self.register_all(std::slice::from_ref(node));
    }

    pub fn register_all(&self, nodes: &[Arc<Node>]) {
        if nodes.is_empty() {
            return;
        }

        let keys: Vec<NodePath> = nodes.iter().map(|node| node.path()).collect();

        let mut map = sync::write(&self.nodes);
        for (key, node) in keys.into_iter().zip(nodes) {
            if let Some(existing) = map.get(&key).and_then(Weak::upgrade)
                && !Arc::ptr_eq(&existing, node)
                && !existing.is_disposed()
            {
                log::warn!("Replacing live node registered for '{}'", key);
            }
            map.insert(key, Arc::downgrade(node));
        }
    }

    /// Removes `node` and every loaded descendant from the map.
    ///
    /// Entries are removed only if they still point at the node being
    /// unregistered. Returns the number of entries removed.
    pub fn unregister(&self, node: &Arc<Node>) -> usize {
        self.unregister_all(&node.collect_subtree())
    }

    pub fn unregister_all(&self, nodes: &[Arc<Node>]) -> usize {
        let keyed: Vec<(NodePath, &Arc<Node>)> =
            nodes.iter().map(|node| (node.path(), node)).collect();

        let mut map = sync::write(&self.nodes);
        let mut removed = 0;
        for (key, node) in keyed {
            let same = map
                .get(&key)
                .is_some_and(|entry| std::ptr::eq(entry.as_ptr(), Arc::as_ptr(node)));
            if same {
                map.remove(&key);
                removed += 1;
            } else {
                log::warn!("Unregistering node '{}' that is not registered", key);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        sync::read(&self.nodes).len()
    }

    pub fn clear(&self) {
        sync::write(&self.nodes).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DomainObject, NodeKind};

    fn child(parent: &Arc<Node>, name: &str, kind: NodeKind) -> Arc<Node> {
        let path = parent.path().child(name);
        Node::new_child(parent, path, DomainObject::new(name, kind), 0)
    }

    #[test]
    fn returns_the_registered_instance() {
        let map = IdentityMap::new();
        let root = Node::new_root();
        let node = child(&root, "pg", NodeKind::DataSource);
        map.register(&node);

        let found = map.get(&NodePath::root().child("pg")).unwrap();
        assert!(Arc::ptr_eq(&found, &node));
    }

    #[test]
    fn unregister_cascades_to_loaded_descendants() {
        let map = IdentityMap::new();
        let root = Node::new_root();
        let folder = child(&root, "a", NodeKind::ResourceFolder);
        let file = child(&folder, "f", NodeKind::Resource);
        folder.write().children = Some(vec![file.clone()]);
        map.register_all(&[folder.clone(), file.clone()]);
        assert_eq!(map.len(), 2);

        assert_eq!(map.unregister(&folder), 2);
        assert_eq!(map.len(), 0);
        assert!(map.get(&file.path()).is_none());
    }

    #[test]
    fn unregister_leaves_a_newer_registration_alone() {
        let map = IdentityMap::new();
        let root = Node::new_root();
        let old = child(&root, "pg", NodeKind::DataSource);
        let new = child(&root, "pg", NodeKind::DataSource);
        map.register(&old);
        map.register(&new);

        assert_eq!(map.unregister(&old), 0);
        assert!(Arc::ptr_eq(&map.get(&new.path()).unwrap(), &new));
    }

    #[test]
    fn disposed_nodes_are_not_returned() {
        let map = IdentityMap::new();
        let root = Node::new_root();
        let node = child(&root, "pg", NodeKind::DataSource);
        map.register(&node);
        node.dispose_subtree();

        assert!(map.get(&node.path()).is_none());
    }
}
