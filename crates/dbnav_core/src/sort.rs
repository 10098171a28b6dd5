use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Node;

/// Ordering rules for children. Each rule can be toggled on its own.
///
/// With `folders_first`, containers come before leaves; with `alphabetical`,
/// names compare case-insensitively. Containers-first is the primary key when
/// both are on. Remaining ties, and everything when both are off, keep the
/// order in which the data source listed the objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortPolicy {
    pub alphabetical: bool,
    pub folders_first: bool,
}

impl Default for SortPolicy {
    fn default() -> Self {
        Self {
            alphabetical: true,
            folders_first: true,
        }
    }
}

impl SortPolicy {
    pub const SOURCE_ORDER: SortPolicy = SortPolicy {
        alphabetical: false,
        folders_first: false,
    };

    pub fn compare(
        &self,
        (a_name, a_container, a_index): (&str, bool, usize),
        (b_name, b_container, b_index): (&str, bool, usize),
    ) -> Ordering {
        let mut ordering = Ordering::Equal;

        if self.folders_first {
            ordering = b_container.cmp(&a_container);
        }

        if ordering == Ordering::Equal && self.alphabetical {
            ordering = a_name.to_lowercase().cmp(&b_name.to_lowercase());
        }

        ordering.then(a_index.cmp(&b_index))
    }
}

/// Sorts nodes in place; `source_index` of each node breaks ties.
pub(crate) fn sort_nodes(nodes: &mut [Arc<Node>], policy: SortPolicy) {
    let mut keyed: Vec<(String, bool, usize, Arc<Node>)> = nodes
        .iter()
        .map(|node| {
            let state = node.read();
            (
                state.display_name.clone(),
                node.is_container(),
                state.source_index,
                node.clone(),
            )
        })
        .collect();

    keyed.sort_by(|a, b| policy.compare((&a.0, a.1, a.2), (&b.0, b.1, b.2)));

    for (slot, (_, _, _, node)) in nodes.iter_mut().zip(keyed) {
        *slot = node;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(policy: SortPolicy, items: &[(&str, bool)]) -> Vec<String> {
        let mut indexed: Vec<(usize, &(&str, bool))> = items.iter().enumerate().collect();
        indexed.sort_by(|(ai, a), (bi, b)| policy.compare((a.0, a.1, *ai), (b.0, b.1, *bi)));
        indexed.into_iter().map(|(_, item)| item.0.to_string()).collect()
    }

    const RAW: &[(&str, bool)] = &[("beta", false), ("alpha", false), ("Folder1", true)];

    #[test]
    fn folders_first_then_alphabetical() {
        assert_eq!(
            order(SortPolicy::default(), RAW),
            vec!["Folder1", "alpha", "beta"]
        );
    }

    #[test]
    fn alphabetical_ignores_case() {
        let policy = SortPolicy {
            alphabetical: true,
            folders_first: false,
        };
        assert_eq!(order(policy, RAW), vec!["alpha", "beta", "Folder1"]);
    }

    #[test]
    fn folders_first_keeps_source_order_within_groups() {
        let policy = SortPolicy {
            alphabetical: false,
            folders_first: true,
        };
        assert_eq!(order(policy, RAW), vec!["Folder1", "beta", "alpha"]);
    }

    #[test]
    fn source_order_when_both_rules_are_off() {
        assert_eq!(
            order(SortPolicy::SOURCE_ORDER, RAW),
            vec!["beta", "alpha", "Folder1"]
        );
    }

    #[test]
    fn case_only_differences_tie_on_source_order() {
        let policy = SortPolicy {
            alphabetical: true,
            folders_first: false,
        };
        let items = &[("Users", false), ("users", false), ("USERS", false)];
        assert_eq!(order(policy, items), vec!["Users", "users", "USERS"]);
    }
}
