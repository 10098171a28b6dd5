use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{NodeKind, NodePath};

/// Object type used to look up the data source of the forest root.
pub const ROOT_OBJECT_TYPE: &str = "root";

/// A domain object as listed by a data source.
///
/// The navigator only needs a handful of generic attributes; anything
/// driver-specific travels in `properties` and is never interpreted here.
/// The identity of an object is its local `name` under its container, so two
/// listings of the same remote object map to the same node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainObject {
    pub name: String,

    pub kind: NodeKind,

    /// Type tag used to pick the data source that lists this object's children
    /// and to scope filters (e.g. "schema", "table").
    #[serde(default)]
    pub object_type: String,

    /// Display label. Falls back to `name`.
    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    /// Hidden objects are never shown.
    #[serde(default)]
    pub hidden: bool,

    /// System objects are shown only when the settings ask for them.
    #[serde(default)]
    pub system: bool,

    /// `false` for objects created locally and not yet saved to the source.
    #[serde(default = "default_persisted")]
    pub persisted: bool,

    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

fn default_persisted() -> bool {
    true
}

impl DomainObject {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            object_type: kind.label().to_string(),
            label: None,
            description: None,
            icon: None,
            hidden: false,
            system: false,
            persisted: true,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = object_type.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    pub fn unpersisted(mut self) -> Self {
        self.persisted = false;
        self
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Identity key of this object when it lives under `container`.
    pub fn key_in(&self, container: &NodePath) -> NodePath {
        container.child(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_label() {
        let object = DomainObject::new("users", NodeKind::DatabaseContainer);
        assert_eq!(object.display_name(), "users");

        let object = object.with_label("Users");
        assert_eq!(object.display_name(), "Users");
    }

    #[test]
    fn deserializes_with_defaults() {
        let object: DomainObject =
            serde_json::from_str(r#"{"name": "public", "kind": "database_container"}"#).unwrap();

        assert!(object.persisted);
        assert!(!object.hidden);
        assert_eq!(object.object_type, "");
        assert_eq!(object.kind, NodeKind::DatabaseContainer);
    }

    #[test]
    fn key_is_container_path_plus_name() {
        let container = NodePath::from_segments(["pg", "public"]);
        let object = DomainObject::new("users", NodeKind::DatabaseContainer).with_label("Users");
        assert_eq!(
            object.key_in(&container),
            NodePath::from_segments(["pg", "public", "users"])
        );
    }
}
