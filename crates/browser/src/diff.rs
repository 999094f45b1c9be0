//! Diffing of successive snapshots.
//!
//! Refs are position-dependent, so diff identity is the tuple
//! `(role, name, depth, backend node id)`; nodes without a backend id
//! compare on the first three only. This policy is load-bearing: clients
//! and tests depend on it staying stable across releases.

use std::collections::HashMap;

use crate::snapshot::AxNode;

/// Disjoint change sets between two snapshots of the same tab.
#[derive(Debug, Default)]
pub struct SnapshotDiff {
    /// Present in curr, absent in prev.
    pub added: Vec<AxNode>,
    /// Same identity, differing value/disabled/focused.
    pub changed: Vec<AxNode>,
    /// Present in prev, absent in curr (carrying their old refs).
    pub removed: Vec<AxNode>,
}

type Identity = (String, String, usize, Option<i64>);

fn identity(n: &AxNode) -> Identity {
    (n.role.clone(), n.name.clone(), n.depth, n.node_id)
}

fn attrs_differ(a: &AxNode, b: &AxNode) -> bool {
    a.role != b.role
        || a.name != b.name
        || a.value != b.value
        || a.disabled != b.disabled
        || a.focused != b.focused
}

/// Compute added/changed/removed between two node lists. Nodes sharing an
/// identity are paired off in order; duplicates pair positionally.
pub fn diff_snapshot(prev: &[AxNode], curr: &[AxNode]) -> SnapshotDiff {
    let mut unmatched: HashMap<Identity, Vec<usize>> = HashMap::new();
    for (i, n) in prev.iter().enumerate() {
        unmatched.entry(identity(n)).or_default().push(i);
    }

    let mut diff = SnapshotDiff::default();
    let mut consumed = vec![false; prev.len()];

    for n in curr {
        match unmatched.get_mut(&identity(n)).and_then(|b| (!b.is_empty()).then(|| b.remove(0))) {
            Some(i) => {
                consumed[i] = true;
                if attrs_differ(&prev[i], n) {
                    diff.changed.push(n.clone());
                }
            }
            None => diff.added.push(n.clone()),
        }
    }

    for (i, n) in prev.iter().enumerate() {
        if !consumed[i] {
            diff.removed.push(n.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(ref_id: &str, role: &str, name: &str, depth: usize, id: Option<i64>) -> AxNode {
        AxNode {
            ref_id: ref_id.into(),
            role: role.into(),
            name: name.into(),
            depth,
            value: String::new(),
            disabled: false,
            focused: false,
            node_id: id,
        }
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let a = vec![node("e0", "button", "OK", 1, Some(10))];
        let d = diff_snapshot(&a, &a);
        assert!(d.added.is_empty() && d.changed.is_empty() && d.removed.is_empty());
    }

    #[test]
    fn added_and_removed_are_detected() {
        let prev = vec![
            node("e0", "button", "OK", 1, Some(10)),
            node("e1", "link", "Home", 1, Some(20)),
        ];
        let curr = vec![
            node("e0", "button", "OK", 1, Some(10)),
            node("e1", "link", "About", 1, Some(30)),
        ];
        let d = diff_snapshot(&prev, &curr);
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.added[0].name, "About");
        assert_eq!(d.removed.len(), 1);
        assert_eq!(d.removed[0].name, "Home");
        assert!(d.changed.is_empty());
    }

    #[test]
    fn value_change_is_changed_not_add_remove() {
        let prev = vec![node("e0", "textbox", "Search", 2, Some(5))];
        let mut after = node("e0", "textbox", "Search", 2, Some(5));
        after.value = "rust".into();
        let d = diff_snapshot(&prev, &[after]);
        assert!(d.added.is_empty() && d.removed.is_empty());
        assert_eq!(d.changed.len(), 1);
        assert_eq!(d.changed[0].value, "rust");
    }

    #[test]
    fn focus_flip_is_changed() {
        let prev = vec![node("e0", "textbox", "q", 1, Some(5))];
        let mut after = node("e0", "textbox", "q", 1, Some(5));
        after.focused = true;
        let d = diff_snapshot(&prev, &[after]);
        assert_eq!(d.changed.len(), 1);
    }

    #[test]
    fn ref_shifts_alone_do_not_diff() {
        // A node inserted above shifts every ref, but surviving nodes keep
        // their identity and must not appear in any set.
        let prev = vec![
            node("e0", "button", "OK", 1, Some(10)),
            node("e1", "link", "Home", 1, Some(20)),
        ];
        let curr = vec![
            node("e0", "heading", "New", 1, Some(1)),
            node("e1", "button", "OK", 1, Some(10)),
            node("e2", "link", "Home", 1, Some(20)),
        ];
        let d = diff_snapshot(&prev, &curr);
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.added[0].role, "heading");
        assert!(d.changed.is_empty() && d.removed.is_empty());
    }

    #[test]
    fn nodes_without_backend_id_match_on_triple() {
        let prev = vec![node("e0", "StaticText", "hello", 3, None)];
        let curr = vec![node("e4", "StaticText", "hello", 3, None)];
        let d = diff_snapshot(&prev, &curr);
        assert!(d.added.is_empty() && d.changed.is_empty() && d.removed.is_empty());
    }

    #[test]
    fn depth_is_part_of_identity() {
        let prev = vec![node("e0", "link", "Home", 1, None)];
        let curr = vec![node("e0", "link", "Home", 2, None)];
        let d = diff_snapshot(&prev, &curr);
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.removed.len(), 1);
    }

    #[test]
    fn count_law_holds() {
        let prev = vec![
            node("e0", "button", "A", 1, Some(1)),
            node("e1", "button", "B", 1, Some(2)),
            node("e2", "button", "C", 1, Some(3)),
        ];
        let curr = vec![
            node("e0", "button", "B", 1, Some(2)),
            node("e1", "button", "D", 1, Some(4)),
        ];
        let d = diff_snapshot(&prev, &curr);
        assert_eq!(curr.len() - d.added.len() + d.removed.len(), prev.len());
    }

    #[test]
    fn duplicate_identities_pair_positionally() {
        let prev = vec![
            node("e0", "listitem", "x", 2, None),
            node("e1", "listitem", "x", 2, None),
        ];
        let curr = vec![node("e0", "listitem", "x", 2, None)];
        let d = diff_snapshot(&prev, &curr);
        assert!(d.added.is_empty());
        assert_eq!(d.removed.len(), 1);
    }
}
