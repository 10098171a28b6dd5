use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use uuid::Uuid;

use crate::loader::InFlightLoad;
use crate::object::ROOT_OBJECT_TYPE;
use crate::{DomainObject, NodeKind, NodePath, sync};

pub type NodeId = Uuid;

/// A node of the navigator forest.
///
/// Nodes are shared as `Arc<Node>`; the parent's children list is the only
/// owning edge, the parent link is weak. All mutable attributes sit behind the
/// node's state lock, and the load slot holds the in-flight load, if any.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    pub(crate) state: RwLock<NodeState>,
    pub(crate) load_slot: Mutex<Option<Arc<InFlightLoad>>>,
}

pub(crate) struct NodeState {
    pub path: NodePath,
    pub parent: Weak<Node>,
    pub display_name: String,
    pub object: Option<DomainObject>,
    pub children: Option<Vec<Arc<Node>>>,
    pub loaded: bool,
    pub locked: bool,
    pub persisted: bool,
    pub disposed: bool,
    pub filtered: bool,
    /// Position of the object in the last raw listing of its parent.
    pub source_index: usize,
    /// Bumped on every invalidation; a load committed under an older
    /// generation leaves the node unloaded.
    pub generation: u64,
}

impl Node {
    pub(crate) fn new_root() -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::new_v4(),
            kind: NodeKind::Root,
            state: RwLock::new(NodeState {
                path: NodePath::root(),
                parent: Weak::new(),
                display_name: String::new(),
                object: None,
                children: None,
                loaded: false,
                locked: false,
                persisted: true,
                disposed: false,
                filtered: false,
                source_index: 0,
                generation: 0,
            }),
            load_slot: Mutex::new(None),
        })
    }

    pub(crate) fn new_child(
        parent: &Arc<Node>,
        path: NodePath,
        object: DomainObject,
        source_index: usize,
    ) -> Arc<Self> {
        let kind = object.kind;
        let persisted = object.persisted;

        // A container created locally has nothing to list yet.
        let empty_new_container = kind.is_container() && !persisted;

        Arc::new(Self {
            id: NodeId::new_v4(),
            kind,
            state: RwLock::new(NodeState {
                path,
                parent: Arc::downgrade(parent),
                display_name: object.display_name().to_string(),
                object: Some(object),
                children: empty_new_container.then(Vec::new),
                loaded: empty_new_container,
                locked: false,
                persisted,
                disposed: false,
                filtered: false,
                source_index,
                generation: 0,
            }),
            load_slot: Mutex::new(None),
        })
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, NodeState> {
        sync::read(&self.state)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, NodeState> {
        sync::write(&self.state)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Identity key of the node.
    pub fn path(&self) -> NodePath {
        self.read().path.clone()
    }

    pub fn name(&self) -> String {
        self.read().display_name.clone()
    }

    pub fn object(&self) -> Option<DomainObject> {
        self.read().object.clone()
    }

    /// Type tag used to find this node's data source.
    pub fn object_type(&self) -> String {
        match &self.read().object {
            Some(object) => object.object_type.clone(),
            None => ROOT_OBJECT_TYPE.to_string(),
        }
    }

    pub fn icon(&self) -> String {
        self.read()
            .object
            .as_ref()
            .and_then(|object| object.icon.clone())
            .unwrap_or_else(|| self.kind.label().to_string())
    }

    pub fn description(&self) -> Option<String> {
        self.read()
            .object
            .as_ref()
            .and_then(|object| object.description.clone())
    }

    pub fn parent(&self) -> Option<Arc<Node>> {
        self.read().parent.upgrade()
    }

    pub fn is_root(&self) -> bool {
        self.kind == NodeKind::Root
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    /// `true` while a load of this node's children is in flight.
    pub fn is_locked(&self) -> bool {
        self.read().locked
    }

    pub fn is_persisted(&self) -> bool {
        self.read().persisted
    }

    pub fn is_disposed(&self) -> bool {
        self.read().disposed
    }

    pub fn children_loaded(&self) -> bool {
        self.read().loaded
    }

    /// `true` if the last load dropped children because of a filter.
    pub fn is_filtered(&self) -> bool {
        self.read().filtered
    }

    /// Children as currently held, without triggering a load.
    ///
    /// After an invalidation this is the previous list until the next load
    /// commits; `None` if the node was never loaded.
    pub fn cached_children(&self) -> Option<Vec<Arc<Node>>> {
        self.read().children.clone()
    }

    /// Marks this node and every loaded descendant as disposed and returns them,
    /// this node first.
    pub(crate) fn dispose_subtree(self: &Arc<Self>) -> Vec<Arc<Node>> {
        let subtree = self.collect_subtree();
        for node in &subtree {
            node.write().disposed = true;
        }
        subtree
    }

    /// This node followed by every descendant reachable through loaded children.
    pub(crate) fn collect_subtree(self: &Arc<Self>) -> Vec<Arc<Node>> {
        let mut collected = Vec::new();
        let mut to_visit = vec![self.clone()];

        while let Some(node) = to_visit.pop() {
            if let Some(children) = &node.read().children {
                to_visit.extend(children.iter().cloned());
            }
            collected.push(node);
        }

        collected
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("path", &state.path)
            .field("name", &state.display_name)
            .field("loaded", &state.loaded)
            .field("locked", &state.locked)
            .finish()
    }
}
