use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub mod crd;

pub use crd::{LogicalCluster, LogicalClusterSpec};

/// Node identifiers are the node object names reported by the inventory.
pub type NodeId = String;

/// Reserved label key carrying logical cluster membership on a node.
pub const DEFAULT_MARKER_KEY: &str = "logical-cluster";

/// Finalizer held by every active declaration until its markers are stripped.
pub const DEFAULT_FINALIZER: &str = "clusterDelete";

#[derive(Debug, Error)]
pub enum LabelerError {
    #[error("Declaration not found: {0}")]
    NotFound(String),
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("Node inventory unavailable: {0}")]
    InventoryUnavailable(String),
    #[error("Conflicting mutation on node {node}: {reason}")]
    ConflictingMutation { node: NodeId, reason: String },
    #[error("Failed to persist declaration {name}: {reason}")]
    PersistenceFailure { name: String, reason: String },
    #[error("No logical cluster resource exists")]
    NoLogicalClusters,
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl LabelerError {
    /// Whether a retry of the whole cycle can be expected to make progress
    /// without outside intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LabelerError::InventoryUnavailable(_)
                | LabelerError::ConflictingMutation { .. }
                | LabelerError::PersistenceFailure { .. }
        )
    }

    /// Absence of the declaration ends a cycle cleanly rather than failing it.
    pub fn is_benign(&self) -> bool {
        matches!(self, LabelerError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, LabelerError>;

/// Whether the status block has been derived from a real observation yet.
///
/// Kept separate from the counters so a declaration that converged on zero
/// members is never mistaken for one that was never evaluated.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum ConvergencePhase {
    #[default]
    Unevaluated,
    Progressing,
    Converged,
}

impl std::fmt::Display for ConvergencePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConvergencePhase::Unevaluated => "Unevaluated",
            ConvergencePhase::Progressing => "Progressing",
            ConvergencePhase::Converged => "Converged",
        };
        f.write_str(s)
    }
}

/// Observed convergence of a logical cluster, as persisted on the declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogicalClusterStatus {
    #[serde(default)]
    pub expected_count: usize,
    #[serde(default)]
    pub observed_count: usize,
    #[serde(default)]
    pub labeled_nodes: Vec<NodeId>,
    #[serde(default)]
    pub phase: ConvergencePhase,
}

impl LogicalClusterStatus {
    pub fn is_evaluated(&self) -> bool {
        self.phase != ConvergencePhase::Unevaluated
    }
}

/// Desired-state record for one logical cluster, independent of how the
/// control plane stores it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogicalClusterDeclaration {
    pub name: String,
    #[serde(default)]
    pub desired_nodes: Vec<NodeId>,
    #[serde(default)]
    pub status: LogicalClusterStatus,
    #[serde(default)]
    pub finalizers: BTreeSet<String>,
    #[serde(default)]
    pub deletion_requested: bool,
}

impl LogicalClusterDeclaration {
    pub fn new(name: impl Into<String>, desired_nodes: Vec<NodeId>) -> Self {
        Self {
            name: name.into(),
            desired_nodes,
            ..Default::default()
        }
    }

    /// Desired membership with duplicates collapsed.
    pub fn desired_set(&self) -> BTreeSet<NodeId> {
        self.desired_nodes.iter().cloned().collect()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.contains(finalizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desired_set_collapses_duplicates() {
        let decl = LogicalClusterDeclaration::new(
            "gpu",
            vec!["n2".to_string(), "n1".to_string(), "n2".to_string()],
        );
        let set = decl.desired_set();
        assert_eq!(set.len(), 2);
        assert!(set.contains("n1"));
        assert!(set.contains("n2"));
    }

    #[test]
    fn test_default_status_is_unevaluated() {
        let status = LogicalClusterStatus::default();
        assert!(!status.is_evaluated());
        assert_eq!(status.expected_count, 0);
        assert_eq!(status.observed_count, 0);
    }

    #[test]
    fn test_status_wire_format() {
        let status = LogicalClusterStatus {
            expected_count: 2,
            observed_count: 1,
            labeled_nodes: vec!["n1".to_string()],
            phase: ConvergencePhase::Progressing,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["expectedCount"], 2);
        assert_eq!(json["observedCount"], 1);
        assert_eq!(json["labeledNodes"][0], "n1");
        assert_eq!(json["phase"], "Progressing");
    }

    #[test]
    fn test_error_classification() {
        assert!(LabelerError::InventoryUnavailable("timeout".into()).is_transient());
        assert!(LabelerError::ConflictingMutation {
            node: "n1".into(),
            reason: "resourceVersion".into()
        }
        .is_transient());
        assert!(!LabelerError::NodeNotFound("n9".into()).is_transient());
        assert!(LabelerError::NotFound("gpu".into()).is_benign());
        assert!(!LabelerError::NodeNotFound("n9".into()).is_benign());
    }
}
