use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::{NavError, sync};

/// String key-value store holding navigator preferences.
///
/// The navigator only reads and writes single keys; how values are stored is
/// up to the implementation.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), NavError>;

    fn remove(&self, key: &str) -> Result<(), NavError>;
}

/// Preferences kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        sync::write(&self.values).insert(key.into(), value.into());
        self
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        sync::read(&self.values).clone()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        sync::read(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), NavError> {
        sync::write(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), NavError> {
        sync::write(&self.values).remove(key);
        Ok(())
    }
}

/// Preferences persisted as a flat JSON object.
///
/// Every change is written through to disk. A missing file starts empty; a
/// corrupted file is logged and replaced on the next write.
pub struct JsonPreferenceStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonPreferenceStore {
    /// Opens `navigator.json` in the user's config directory.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn new() -> Result<Self, NavError> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            NavError::from(std::io::Error::other("Could not find config directory"))
        })?;

        let app_dir = config_dir.join("dbnav");
        fs::create_dir_all(&app_dir)?;

        Self::from_path(app_dir.join("navigator.json"))
    }

    pub fn from_path(path: PathBuf) -> Result<Self, NavError> {
        let values = Self::load(&path)?;
        log::info!(
            "Loaded {} navigator preferences from {}",
            values.len(),
            path.display()
        );

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<String, String>, NavError> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(path)?;

        match serde_json::from_str::<BTreeMap<String, String>>(&content) {
            Ok(values) => Ok(values),
            Err(e) => {
                log::warn!(
                    "Failed to parse navigator preferences ({}), starting empty",
                    e
                );
                Ok(BTreeMap::new())
            }
        }
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<(), NavError> {
        let content = serde_json::to_string_pretty(values)
            .map_err(|e| NavError::Preferences(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, content)?;

        Ok(())
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        sync::read(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), NavError> {
        let mut values = sync::write(&self.values);
        if values.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }

    fn remove(&self, key: &str) -> Result<(), NavError> {
        let mut values = sync::write(&self.values);
        if values.remove(key).is_some() {
            self.save(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_sets_and_removes() {
        let store = MemoryPreferenceStore::new().with_value("a", "1");
        assert_eq!(store.get("a").as_deref(), Some("1"));

        store.set("b", "2").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.get("a"), None);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn json_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let store = JsonPreferenceStore::from_path(path.clone()).unwrap();
        store.set("navigator.sort.alphabetical", "false").unwrap();
        store.set("navigator.filter.pg.include", "a*;b*").unwrap();
        drop(store);

        let reopened = JsonPreferenceStore::from_path(path).unwrap();
        assert_eq!(
            reopened.get("navigator.sort.alphabetical").as_deref(),
            Some("false")
        );
        assert_eq!(
            reopened.get("navigator.filter.pg.include").as_deref(),
            Some("a*;b*")
        );
    }

    #[test]
    fn corrupted_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{not json").unwrap();

        let store = JsonPreferenceStore::from_path(path.clone()).unwrap();
        assert_eq!(store.get("anything"), None);

        store.set("k", "v").unwrap();
        let reopened = JsonPreferenceStore::from_path(path).unwrap();
        assert_eq!(reopened.get("k").as_deref(), Some("v"));
    }
}
