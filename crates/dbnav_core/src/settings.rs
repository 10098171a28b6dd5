use std::time::Duration;

use crate::{FilterScope, NavError, NodeFilter, PreferenceStore, SortPolicy};

pub const SORT_ALPHABETICAL_KEY: &str = "navigator.sort.alphabetical";
pub const SORT_FOLDERS_FIRST_KEY: &str = "navigator.sort.folders_first";
pub const SHOW_SYSTEM_OBJECTS_KEY: &str = "navigator.show_system_objects";

const FILTER_KEY_PREFIX: &str = "navigator.filter";

/// User-facing navigator preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigatorSettings {
    pub sort: SortPolicy,
    pub show_system_objects: bool,
}

impl Default for NavigatorSettings {
    fn default() -> Self {
        Self {
            sort: SortPolicy::default(),
            show_system_objects: false,
        }
    }
}

impl NavigatorSettings {
    /// Reads settings, keeping defaults for missing or unparsable values.
    pub fn load(store: &dyn PreferenceStore) -> Self {
        let defaults = Self::default();

        Self {
            sort: SortPolicy {
                alphabetical: read_bool(store, SORT_ALPHABETICAL_KEY, defaults.sort.alphabetical),
                folders_first: read_bool(
                    store,
                    SORT_FOLDERS_FIRST_KEY,
                    defaults.sort.folders_first,
                ),
            },
            show_system_objects: read_bool(
                store,
                SHOW_SYSTEM_OBJECTS_KEY,
                defaults.show_system_objects,
            ),
        }
    }

    pub fn save(&self, store: &dyn PreferenceStore) -> Result<(), NavError> {
        store.set(SORT_ALPHABETICAL_KEY, bool_str(self.sort.alphabetical))?;
        store.set(SORT_FOLDERS_FIRST_KEY, bool_str(self.sort.folders_first))?;
        store.set(SHOW_SYSTEM_OBJECTS_KEY, bool_str(self.show_system_objects))?;
        Ok(())
    }
}

/// Runtime knobs of the model that are not user preferences.
#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    /// How often a waiting caller re-checks its cancel token.
    pub wait_poll_interval: Duration,

    /// Prefix of the names given to load worker threads.
    pub worker_name_prefix: String,

    /// How long finished load tasks stay queryable. Older ones are dropped
    /// whenever a new load starts.
    pub task_retention: Duration,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            wait_poll_interval: Duration::from_millis(20),
            worker_name_prefix: "dbnav-load".to_string(),
            task_retention: Duration::from_secs(300),
        }
    }
}

fn read_bool(store: &dyn PreferenceStore, key: &str, default: bool) -> bool {
    match store.get(key).as_deref() {
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            log::warn!("Ignoring invalid value {:?} for preference '{}'", other, key);
            default
        }
        None => default,
    }
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn filter_key(scope: &FilterScope, field: &str) -> String {
    match &scope.object_type {
        Some(object_type) => format!(
            "{}.{}#{}.{}",
            FILTER_KEY_PREFIX, scope.container, object_type, field
        ),
        None => format!("{}.{}.{}", FILTER_KEY_PREFIX, scope.container, field),
    }
}

/// Reads the filter stored for `scope`, if any.
pub fn load_filter(store: &dyn PreferenceStore, scope: &FilterScope) -> Option<NodeFilter> {
    let include = store.get(&filter_key(scope, "include"));
    let exclude = store.get(&filter_key(scope, "exclude"));

    if include.is_none() && exclude.is_none() {
        return None;
    }

    Some(NodeFilter {
        include: NodeFilter::split_patterns(include.as_deref().unwrap_or_default()),
        exclude: NodeFilter::split_patterns(exclude.as_deref().unwrap_or_default()),
        enabled: read_bool(store, &filter_key(scope, "enabled"), true),
        case_sensitive: read_bool(store, &filter_key(scope, "case_sensitive"), false),
    })
}

pub fn save_filter(
    store: &dyn PreferenceStore,
    scope: &FilterScope,
    filter: &NodeFilter,
) -> Result<(), NavError> {
    filter.validate()?;

    store.set(
        &filter_key(scope, "include"),
        &NodeFilter::join_patterns(&filter.include),
    )?;
    store.set(
        &filter_key(scope, "exclude"),
        &NodeFilter::join_patterns(&filter.exclude),
    )?;
    store.set(&filter_key(scope, "enabled"), bool_str(filter.enabled))?;
    store.set(
        &filter_key(scope, "case_sensitive"),
        bool_str(filter.case_sensitive),
    )?;
    Ok(())
}

pub fn remove_filter(store: &dyn PreferenceStore, scope: &FilterScope) -> Result<(), NavError> {
    for field in ["include", "exclude", "enabled", "case_sensitive"] {
        store.remove(&filter_key(scope, field))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryPreferenceStore, NodePath};

    #[test]
    fn defaults_when_store_is_empty() {
        let store = MemoryPreferenceStore::new();
        assert_eq!(NavigatorSettings::load(&store), NavigatorSettings::default());
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let store = MemoryPreferenceStore::new()
            .with_value(SORT_ALPHABETICAL_KEY, "yes")
            .with_value(SORT_FOLDERS_FIRST_KEY, "false");

        let settings = NavigatorSettings::load(&store);
        assert!(settings.sort.alphabetical);
        assert!(!settings.sort.folders_first);
    }

    #[test]
    fn settings_round_trip() {
        let store = MemoryPreferenceStore::new();
        let settings = NavigatorSettings {
            sort: SortPolicy::SOURCE_ORDER,
            show_system_objects: true,
        };
        settings.save(&store).unwrap();
        assert_eq!(NavigatorSettings::load(&store), settings);
    }

    #[test]
    fn filter_round_trips_through_store() {
        let store = MemoryPreferenceStore::new();
        let scope = FilterScope::of_type(NodePath::from_segments(["pg", "public"]), "table");
        let filter = NodeFilter::new(["user*", "order*"], ["*_tmp"]).case_sensitive(true);

        save_filter(&store, &scope, &filter).unwrap();
        assert_eq!(
            store.get("navigator.filter.pg/public#table.include").as_deref(),
            Some("user*;order*")
        );
        assert_eq!(load_filter(&store, &scope), Some(filter));

        remove_filter(&store, &scope).unwrap();
        assert_eq!(load_filter(&store, &scope), None);
    }

    #[test]
    fn scopes_do_not_share_keys() {
        let store = MemoryPreferenceStore::new();
        let container = NodePath::from_segments(["pg"]);
        save_filter(
            &store,
            &FilterScope::all(container.clone()),
            &NodeFilter::new(["a*"], Vec::<String>::new()),
        )
        .unwrap();

        assert!(load_filter(&store, &FilterScope::of_type(container, "schema")).is_none());
    }
}
