use std::collections::HashMap;
use std::fs;
use std::path::Path;

use dbnav_core::{DataSource, DomainObject, Node, NodePath, ProgressReporter, SourceError};
use serde::Deserialize;

/// One object of a forest file, with its children inline.
#[derive(Debug, Clone, Deserialize)]
pub struct ForestEntry {
    #[serde(flatten)]
    pub object: DomainObject,

    #[serde(default)]
    pub children: Vec<ForestEntry>,
}

/// Data source backed by a static forest read from JSON.
///
/// The file holds the top-level objects as an array; every object may carry
/// a `children` array of the same shape.
#[derive(Debug, Default)]
pub struct JsonForest {
    listings: HashMap<NodePath, Vec<DomainObject>>,
}

impl JsonForest {
    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, SourceError> {
        let entries: Vec<ForestEntry> = serde_json::from_str(content)
            .map_err(|e| SourceError::query_failed(format!("invalid forest file: {}", e)))?;

        let mut forest = Self::default();
        forest.add_level(NodePath::root(), entries);
        Ok(forest)
    }

    fn add_level(&mut self, container: NodePath, entries: Vec<ForestEntry>) {
        let mut objects = Vec::with_capacity(entries.len());

        for entry in entries {
            let key = entry.object.key_in(&container);
            let mut object = entry.object;
            if object.object_type.is_empty() {
                object.object_type = object.kind.label().to_string();
            }

            if !entry.children.is_empty() {
                self.add_level(key, entry.children);
            }
            objects.push(object);
        }

        self.listings.insert(container, objects);
    }

    pub fn container_count(&self) -> usize {
        self.listings.len()
    }
}

impl DataSource for JsonForest {
    fn list_children(
        &self,
        container: &Node,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<DomainObject>, SourceError> {
        let path = container.path();
        let children = self.listings.get(&path).cloned().unwrap_or_default();

        progress.begin_task(&format!("Reading {}", path), children.len() as u64);
        if progress.is_canceled() {
            return Err(SourceError::Cancelled);
        }
        progress.worked(children.len() as u64);

        Ok(children)
    }
}
