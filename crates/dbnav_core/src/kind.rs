use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// The kind of node in the navigator forest.
///
/// Kinds are a closed set; what a node may do is looked up in the capability
/// table (`NodeKind::capabilities`) instead of being spread over node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The single root of the forest.
    Root,

    /// A project grouping data sources and resources.
    Project,

    /// A user-defined folder organizing data sources.
    LocalFolder,

    /// A configured database connection.
    DataSource,

    /// A synthetic grouping of database objects ("Tables", "Views").
    DatabaseFolder,

    /// A database object that owns other objects (catalog, schema, table).
    DatabaseContainer,

    /// A database object without children (column, index, constraint).
    DatabaseItem,

    /// A folder in a project's resource area.
    ResourceFolder,

    /// A file in a project's resource area (script, diagram).
    Resource,
}

bitflags! {
    /// Operations a node kind supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeCapabilities: u8 {
        /// Node can have children and is loaded lazily.
        const CHILDREN = 1 << 0;

        /// Node can be opened in an editor.
        const OPEN = 1 << 1;

        /// Node can be renamed.
        const RENAME = 1 << 2;

        /// Node can be moved to another container.
        const MOVE = 1 << 3;
    }
}

const NO_KINDS: &[NodeKind] = &[];

impl NodeKind {
    pub fn capabilities(self) -> NodeCapabilities {
        match self {
            NodeKind::Root => NodeCapabilities::CHILDREN,
            NodeKind::Project => NodeCapabilities::CHILDREN | NodeCapabilities::RENAME,
            NodeKind::LocalFolder | NodeKind::ResourceFolder => {
                NodeCapabilities::CHILDREN | NodeCapabilities::RENAME | NodeCapabilities::MOVE
            }
            NodeKind::DataSource => NodeCapabilities::all(),
            NodeKind::DatabaseFolder => NodeCapabilities::CHILDREN,
            NodeKind::DatabaseContainer => {
                NodeCapabilities::CHILDREN | NodeCapabilities::OPEN | NodeCapabilities::RENAME
            }
            NodeKind::DatabaseItem => NodeCapabilities::OPEN | NodeCapabilities::RENAME,
            NodeKind::Resource => {
                NodeCapabilities::OPEN | NodeCapabilities::RENAME | NodeCapabilities::MOVE
            }
        }
    }

    /// Kinds of nodes a container of this kind accepts on drop.
    pub fn accepted_children(self) -> &'static [NodeKind] {
        match self {
            NodeKind::Project => &[
                NodeKind::LocalFolder,
                NodeKind::DataSource,
                NodeKind::ResourceFolder,
                NodeKind::Resource,
            ],
            NodeKind::LocalFolder => &[NodeKind::LocalFolder, NodeKind::DataSource],
            NodeKind::ResourceFolder => &[NodeKind::ResourceFolder, NodeKind::Resource],
            _ => NO_KINDS,
        }
    }

    pub fn is_container(self) -> bool {
        self.capabilities().contains(NodeCapabilities::CHILDREN)
    }

    pub fn accepts(self, child: NodeKind) -> bool {
        self.accepted_children().contains(&child)
    }

    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::Project => "project",
            NodeKind::LocalFolder => "folder",
            NodeKind::DataSource => "datasource",
            NodeKind::DatabaseFolder => "group",
            NodeKind::DatabaseContainer => "container",
            NodeKind::DatabaseItem => "item",
            NodeKind::ResourceFolder => "resource-folder",
            NodeKind::Resource => "resource",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_are_not_containers() {
        assert!(!NodeKind::DatabaseItem.is_container());
        assert!(!NodeKind::Resource.is_container());
        assert!(NodeKind::DatabaseFolder.is_container());
        assert!(NodeKind::Root.is_container());
    }

    #[test]
    fn folders_accept_their_own_hierarchy_only() {
        assert!(NodeKind::LocalFolder.accepts(NodeKind::DataSource));
        assert!(!NodeKind::LocalFolder.accepts(NodeKind::Resource));
        assert!(NodeKind::ResourceFolder.accepts(NodeKind::Resource));
        assert!(!NodeKind::DatabaseContainer.accepts(NodeKind::DatabaseItem));
    }

    #[test]
    fn only_movable_kinds_declare_move() {
        assert!(NodeKind::DataSource.capabilities().contains(NodeCapabilities::MOVE));
        assert!(!NodeKind::DatabaseContainer.capabilities().contains(NodeCapabilities::MOVE));
    }
}
