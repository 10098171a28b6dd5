use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::{DomainObject, NavError, NodePath};

/// Separator of persisted pattern lists.
pub const PATTERN_SEPARATOR: char = ';';

/// Include/exclude name filter for the children of one container.
///
/// Patterns are globs where `*` matches any run of characters. Case
/// sensitivity changes letter comparison only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFilter {
    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub case_sensitive: bool,
}

impl NodeFilter {
    /// Creates an enabled, case-insensitive filter.
    pub fn new<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
            enabled: true,
            case_sensitive: false,
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// `true` if applying this filter can drop anything.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.is_empty()
    }

    /// Checks that the pattern lists survive persistence unchanged.
    pub fn validate(&self) -> Result<(), NavError> {
        for pattern in self.include.iter().chain(&self.exclude) {
            if pattern.is_empty() {
                return Err(NavError::InvalidFilter {
                    pattern: pattern.clone(),
                    reason: "empty pattern".to_string(),
                });
            }
            if pattern.contains(PATTERN_SEPARATOR) {
                return Err(NavError::InvalidFilter {
                    pattern: pattern.clone(),
                    reason: format!("patterns cannot contain '{}'", PATTERN_SEPARATOR),
                });
            }
        }
        Ok(())
    }

    pub fn compile(&self) -> Result<CompiledFilter, NavError> {
        self.validate()?;

        let compile_all = |patterns: &[String]| -> Result<Vec<Regex>, NavError> {
            patterns
                .iter()
                .map(|pattern| glob_to_regex(pattern, self.case_sensitive))
                .collect()
        };

        Ok(CompiledFilter {
            include: compile_all(&self.include)?,
            exclude: compile_all(&self.exclude)?,
            active: self.is_active(),
        })
    }

    pub fn join_patterns(patterns: &[String]) -> String {
        patterns.join(&PATTERN_SEPARATOR.to_string())
    }

    pub fn split_patterns(joined: &str) -> Vec<String> {
        joined
            .split(PATTERN_SEPARATOR)
            .filter(|pattern| !pattern.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn glob_to_regex(pattern: &str, case_sensitive: bool) -> Result<Regex, NavError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    RegexBuilder::new(&format!("^{}$", body))
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| NavError::InvalidFilter {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// A `NodeFilter` with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    active: bool,
}

impl CompiledFilter {
    pub fn matches(&self, name: &str) -> bool {
        if !self.active {
            return true;
        }

        let included =
            self.include.is_empty() || self.include.iter().any(|pattern| pattern.is_match(name));

        included && !self.exclude.iter().any(|pattern| pattern.is_match(name))
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Where a filter applies: children of `container` of one object type, or of
/// every type when `object_type` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterScope {
    pub container: NodePath,
    pub object_type: Option<String>,
}

impl FilterScope {
    pub fn all(container: NodePath) -> Self {
        Self {
            container,
            object_type: None,
        }
    }

    pub fn of_type(container: NodePath, object_type: impl Into<String>) -> Self {
        Self {
            container,
            object_type: Some(object_type.into()),
        }
    }
}

/// Compiled filters of one container, keyed by the object type they target.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilters {
    any_type: Option<CompiledFilter>,
    by_type: HashMap<String, CompiledFilter>,
}

impl ContainerFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, object_type: Option<&str>, filter: CompiledFilter) {
        match object_type {
            Some(object_type) => {
                self.by_type.insert(object_type.to_string(), filter);
            }
            None => self.any_type = Some(filter),
        }
    }

    /// Type-specific filter first, then the one for every type.
    pub fn for_type(&self, object_type: &str) -> Option<&CompiledFilter> {
        self.by_type
            .get(object_type)
            .or(self.any_type.as_ref())
    }

    pub fn is_active(&self) -> bool {
        self.any_type.as_ref().is_some_and(CompiledFilter::is_active)
            || self.by_type.values().any(CompiledFilter::is_active)
    }

    pub fn accepts(&self, object: &DomainObject) -> bool {
        self.for_type(&object.object_type)
            .is_none_or(|filter| filter.matches(&object.name))
    }
}

/// Keeps the objects that pass `filters`, in their original order.
///
/// Returns the survivors together with their index in `objects`, so later
/// sorting can fall back to listing order.
pub fn apply_filters(
    objects: Vec<DomainObject>,
    filters: &ContainerFilters,
) -> Vec<(usize, DomainObject)> {
    objects
        .into_iter()
        .enumerate()
        .filter(|(_, object)| filters.accepts(object))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeKind;

    fn objects(names: &[&str]) -> Vec<DomainObject> {
        names
            .iter()
            .map(|name| DomainObject::new(*name, NodeKind::Resource))
            .collect()
    }

    fn names(filtered: &[(usize, DomainObject)]) -> Vec<&str> {
        filtered.iter().map(|(_, o)| o.name.as_str()).collect()
    }

    fn container_filters(filter: NodeFilter) -> ContainerFilters {
        let mut filters = ContainerFilters::new();
        filters.set(None, filter.compile().unwrap());
        filters
    }

    #[test]
    fn include_glob_is_case_insensitive_by_default() {
        let filters = container_filters(NodeFilter::new(["a*"], Vec::<String>::new()));
        let result = apply_filters(objects(&["beta", "alpha", "Folder1", "Apex"]), &filters);
        assert_eq!(names(&result), vec!["alpha", "Apex"]);
    }

    #[test]
    fn case_sensitive_changes_letters_only() {
        let filter = NodeFilter::new(["a*"], Vec::<String>::new()).case_sensitive(true);
        let filters = container_filters(filter);
        let result = apply_filters(objects(&["alpha", "Apex", "a"]), &filters);
        assert_eq!(names(&result), vec!["alpha", "a"]);
    }

    #[test]
    fn exclude_wins_over_include() {
        let filters = container_filters(NodeFilter::new(["*"], ["tmp_*"]));
        let result = apply_filters(objects(&["users", "tmp_users", "orders"]), &filters);
        assert_eq!(names(&result), vec!["users", "orders"]);
    }

    #[test]
    fn disabled_filter_passes_everything() {
        let mut filter = NodeFilter::new(["a*"], Vec::<String>::new());
        filter.enabled = false;
        let filters = container_filters(filter);
        let result = apply_filters(objects(&["beta", "alpha"]), &filters);
        assert_eq!(result.len(), 2);
        assert!(!filters.is_active());
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let filters = container_filters(NodeFilter::new(["a.b*"], Vec::<String>::new()));
        let result = apply_filters(objects(&["a.bc", "axbc"]), &filters);
        assert_eq!(names(&result), vec!["a.bc"]);
    }

    #[test]
    fn applying_twice_gives_the_same_result() {
        let filters = container_filters(NodeFilter::new(["*a*"], ["*z"]));
        let once = apply_filters(objects(&["alpha", "beta", "gaz", "omega", "x"]), &filters);
        let twice = apply_filters(
            once.iter().map(|(_, o)| o.clone()).collect(),
            &filters,
        );
        assert_eq!(names(&once), names(&twice));
    }

    #[test]
    fn type_specific_filter_takes_precedence() {
        let mut filters = ContainerFilters::new();
        filters.set(
            None,
            NodeFilter::new(["x*"], Vec::<String>::new()).compile().unwrap(),
        );
        filters.set(
            Some("table"),
            NodeFilter::new(["u*"], Vec::<String>::new()).compile().unwrap(),
        );

        let table = DomainObject::new("users", NodeKind::DatabaseContainer).with_type("table");
        let view = DomainObject::new("users_v", NodeKind::DatabaseContainer).with_type("view");
        assert!(filters.accepts(&table));
        assert!(!filters.accepts(&view));
    }

    #[test]
    fn rejects_patterns_that_cannot_be_persisted() {
        assert!(NodeFilter::new(["a;b"], Vec::<String>::new()).validate().is_err());
        assert!(NodeFilter::new([""], Vec::<String>::new()).validate().is_err());
    }

    #[test]
    fn pattern_lists_round_trip() {
        let patterns = vec!["a*".to_string(), "*_log".to_string(), "x".to_string()];
        let joined = NodeFilter::join_patterns(&patterns);
        assert_eq!(joined, "a*;*_log;x");
        assert_eq!(NodeFilter::split_patterns(&joined), patterns);
        assert!(NodeFilter::split_patterns("").is_empty());
    }
}
