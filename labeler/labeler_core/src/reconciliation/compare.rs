//! Reconciliation Compare Module
//!
//! Computes the difference between the nodes a declaration wants and the
//! nodes currently carrying its marker.
//!
//! # Key Invariants
//!
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Complete**: `to_add = desired \ observed`, `to_remove = observed \ desired`
//! - **Unique**: Each node appears at most once in each list

use labeler_shared_types::NodeId;
use std::collections::BTreeSet;

/// Corrective mutations needed to make observed membership match desired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    /// Nodes to tag with the group's marker, sorted.
    pub to_add: Vec<NodeId>,
    /// Nodes to strip the group's marker from, sorted.
    pub to_remove: Vec<NodeId>,
}

impl MembershipDiff {
    /// True when no mutation is required.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Total number of node mutations this diff implies.
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }
}

/// Symmetric difference between desired and observed membership.
pub fn diff(desired: &BTreeSet<NodeId>, observed: &BTreeSet<NodeId>) -> MembershipDiff {
    MembershipDiff {
        to_add: desired.difference(observed).cloned().collect(),
        to_remove: observed.difference(desired).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(nodes: &[&str]) -> BTreeSet<NodeId> {
        nodes.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_identical_sets_produce_no_changes() {
        let d = set(&["n1", "n2", "n3"]);
        let result = diff(&d, &d);
        assert!(result.is_empty());
        assert_eq!(result.len(), 0);
    }

    #[test]
    fn test_additions_and_removals() {
        let result = diff(&set(&["n1", "n2", "n4"]), &set(&["n2", "n3"]));
        assert_eq!(result.to_add, vec!["n1", "n4"]);
        assert_eq!(result.to_remove, vec!["n3"]);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_empty_desired_removes_everything() {
        let result = diff(&BTreeSet::new(), &set(&["n1", "n2"]));
        assert!(result.to_add.is_empty());
        assert_eq!(result.to_remove, vec!["n1", "n2"]);
    }

    #[test]
    fn test_empty_observed_adds_everything() {
        let result = diff(&set(&["n1", "n2"]), &BTreeSet::new());
        assert_eq!(result.to_add, vec!["n1", "n2"]);
        assert!(result.to_remove.is_empty());
    }

    #[test]
    fn test_both_empty() {
        assert!(diff(&BTreeSet::new(), &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_diff_matches_set_difference_for_overlapping_ranges() {
        // Sliding windows over a shared universe exercise partial overlaps.
        let universe: Vec<String> = (0..8).map(|i| format!("n{}", i)).collect();
        for start in 0..4 {
            let desired: BTreeSet<NodeId> = universe[start..start + 4].iter().cloned().collect();
            let observed: BTreeSet<NodeId> = universe[2..6].iter().cloned().collect();
            let result = diff(&desired, &observed);

            for node in &result.to_add {
                assert!(desired.contains(node) && !observed.contains(node));
            }
            for node in &result.to_remove {
                assert!(observed.contains(node) && !desired.contains(node));
            }
            assert_eq!(result.to_add.len(), desired.difference(&observed).count());
            assert_eq!(result.to_remove.len(), observed.difference(&desired).count());
        }
    }
}
