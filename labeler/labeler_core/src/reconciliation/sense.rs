//! Reconciliation Sense Module
//!
//! Observes which nodes currently carry a logical cluster's marker. Every
//! observation is a fresh read of the node inventory; convergence decisions
//! must never be made against a cached membership.

use std::collections::BTreeSet;
use std::sync::Arc;

use label_store_interface::{MarkerSelector, NodeLabelStore};
use labeler_shared_types::{ConvergencePhase, LogicalClusterStatus, NodeId, Result};
use tracing::debug;

/// Nodes observed bearing a group's marker at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    pub nodes: BTreeSet<NodeId>,
}

impl Membership {
    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Status block describing this observation against `desired`.
    ///
    /// The phase comes from comparing the sets themselves, so equal counts
    /// with different members are still reported as progressing.
    pub fn status_against(&self, desired: &BTreeSet<NodeId>) -> LogicalClusterStatus {
        let phase = if self.nodes == *desired {
            ConvergencePhase::Converged
        } else {
            ConvergencePhase::Progressing
        };
        LogicalClusterStatus {
            expected_count: desired.len(),
            observed_count: self.nodes.len(),
            labeled_nodes: self.nodes.iter().cloned().collect(),
            phase,
        }
    }
}

/// Read-only view of logical cluster membership.
#[derive(Clone)]
pub struct StatusCalculator {
    nodes: Arc<dyn NodeLabelStore>,
}

impl StatusCalculator {
    pub fn new(nodes: Arc<dyn NodeLabelStore>) -> Self {
        Self { nodes }
    }

    /// Query the inventory for every node whose marker equals `group`.
    ///
    /// An empty result is a valid zero-member observation.
    pub async fn observe(&self, group: &str) -> Result<Membership> {
        let marked = self
            .nodes
            .list(&MarkerSelector::Equals(group.to_string()))
            .await?;
        let membership = Membership {
            nodes: marked.into_iter().map(|n| n.id).collect(),
        };
        debug!(group, observed = membership.count(), "observed membership");
        Ok(membership)
    }
}
