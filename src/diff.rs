//! Stateless child-snapshot differ.

use std::collections::HashSet;

/// Names that changed between two child snapshots of one path.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChildDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ChildDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Minimal set of add/remove steps turning `old` into `new`.
///
/// Relative order between adds and removes of one round is unspecified.
pub fn diff(old: &HashSet<String>, new: &HashSet<String>) -> ChildDiff {
    ChildDiff {
        added: new.difference(old).cloned().collect(),
        removed: old.difference(new).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_all_added_from_empty() {
        let delta = diff(&set(&[]), &set(&["a", "b"]));
        assert_eq!(delta.added.len(), 2);
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn test_all_removed_to_empty() {
        let delta = diff(&set(&["a", "b"]), &set(&[]));
        assert!(delta.added.is_empty());
        assert_eq!(delta.removed.len(), 2);
    }

    #[test]
    fn test_mixed_change() {
        let delta = diff(&set(&["a", "b"]), &set(&["b", "c"]));
        assert_eq!(delta.added, vec!["c".to_string()]);
        assert_eq!(delta.removed, vec!["a".to_string()]);
    }

    #[test]
    fn test_unchanged_is_empty() {
        let delta = diff(&set(&["a", "b"]), &set(&["a", "b"]));
        assert!(delta.is_empty());
    }
}
