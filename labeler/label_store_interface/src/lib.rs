use async_trait::async_trait;
use labeler_shared_types::{
    LabelerError, LogicalClusterDeclaration, LogicalClusterStatus, NodeId, Result,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors reported by a store backend before they are attributed to a node
/// or a declaration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Attribute a failed node read or patch to `node`.
    pub fn for_node(self, node: &str) -> LabelerError {
        match self {
            StoreError::NotFound(_) => LabelerError::NodeNotFound(node.to_string()),
            StoreError::Conflict(reason) => LabelerError::ConflictingMutation {
                node: node.to_string(),
                reason,
            },
            StoreError::Unavailable(reason) => LabelerError::InventoryUnavailable(reason),
            StoreError::Rejected(reason) => {
                LabelerError::InternalError(format!("patch of node {} rejected: {}", node, reason))
            }
        }
    }

    /// Attribute a failed declaration write to `name`.
    pub fn for_declaration(self, name: &str) -> LabelerError {
        match self {
            StoreError::NotFound(_) => LabelerError::NotFound(name.to_string()),
            other => LabelerError::PersistenceFailure {
                name: name.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Which nodes a listing should return, judged by their marker label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerSelector {
    /// Nodes whose marker equals the given logical cluster name.
    Equals(String),
    /// Nodes carrying the marker key with any value.
    Exists,
}

impl MarkerSelector {
    /// Render as a Kubernetes label selector for `marker_key`.
    pub fn to_label_selector(&self, marker_key: &str) -> String {
        match self {
            MarkerSelector::Equals(value) => format!("{}={}", marker_key, value),
            MarkerSelector::Exists => marker_key.to_string(),
        }
    }

    pub fn matches(&self, marker: Option<&str>) -> bool {
        match (self, marker) {
            (MarkerSelector::Equals(value), Some(m)) => m == value,
            (MarkerSelector::Exists, Some(_)) => true,
            (_, None) => false,
        }
    }
}

/// A single-node marker mutation.
///
/// Setting and removing are different operations at the inventory: a marker
/// set to the empty string still exists and still matches `Exists`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerPatch {
    SetMarker(String),
    RemoveMarker,
}

impl MarkerPatch {
    /// JSON merge patch body for this mutation. Removal nulls the key, which
    /// merge-patch semantics treat as deletion.
    pub fn to_merge_patch(&self, marker_key: &str) -> Value {
        match self {
            MarkerPatch::SetMarker(value) => json!({
                "metadata": { "labels": { marker_key: value } }
            }),
            MarkerPatch::RemoveMarker => json!({
                "metadata": { "labels": { marker_key: Value::Null } }
            }),
        }
    }
}

/// A node as seen through a marker listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedNode {
    pub id: NodeId,
    pub marker: String,
}

/// Read/write access to the node inventory's marker labels.
///
/// Every call goes to the backing inventory; implementations must not serve
/// listings from a cache.
#[async_trait]
pub trait NodeLabelStore: Send + Sync {
    /// List the nodes whose marker matches `selector`.
    async fn list(&self, selector: &MarkerSelector) -> Result<Vec<MarkedNode>>;

    /// Apply a marker mutation to a single node.
    async fn patch(&self, node: &NodeId, patch: &MarkerPatch) -> Result<()>;
}

/// Access to persisted logical cluster declarations.
#[async_trait]
pub trait DeclarationStore: Send + Sync {
    /// Load a declaration; `None` once it has been removed.
    async fn get(&self, name: &str) -> Result<Option<LogicalClusterDeclaration>>;

    /// Replace the status block of a declaration.
    async fn update_status(&self, name: &str, status: &LogicalClusterStatus) -> Result<()>;

    /// Replace the finalizer set of a declaration.
    async fn update_finalizers(&self, name: &str, finalizers: &BTreeSet<String>) -> Result<()>;
}

#[cfg(feature = "in-memory")]
pub mod in_memory;

pub mod kube_store;

#[cfg(feature = "in-memory")]
pub use in_memory::{InMemoryDeclarationStore, InMemoryNodeStore};
pub use kube_store::{KubeDeclarationStore, KubeNodeStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_remove_patches_differ() {
        let set = MarkerPatch::SetMarker(String::new()).to_merge_patch("logical-cluster");
        let remove = MarkerPatch::RemoveMarker.to_merge_patch("logical-cluster");
        assert_eq!(set["metadata"]["labels"]["logical-cluster"], "");
        assert!(remove["metadata"]["labels"]["logical-cluster"].is_null());
        assert_ne!(set, remove);
    }

    #[test]
    fn test_label_selector_rendering() {
        let eq = MarkerSelector::Equals("gpu".to_string());
        assert_eq!(eq.to_label_selector("logical-cluster"), "logical-cluster=gpu");
        assert_eq!(
            MarkerSelector::Exists.to_label_selector("logical-cluster"),
            "logical-cluster"
        );
    }

    #[test]
    fn test_selector_matching() {
        let eq = MarkerSelector::Equals("gpu".to_string());
        assert!(eq.matches(Some("gpu")));
        assert!(!eq.matches(Some("cpu")));
        assert!(!eq.matches(None));
        assert!(MarkerSelector::Exists.matches(Some("")));
        assert!(!MarkerSelector::Exists.matches(None));
    }

    #[test]
    fn test_store_error_attribution() {
        match StoreError::NotFound("nodes \"n1\"".into()).for_node("n1") {
            LabelerError::NodeNotFound(node) => assert_eq!(node, "n1"),
            other => panic!("unexpected error: {:?}", other),
        }
        match StoreError::Conflict("stale".into()).for_node("n1") {
            LabelerError::ConflictingMutation { node, .. } => assert_eq!(node, "n1"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(matches!(
            StoreError::Unavailable("timeout".into()).for_declaration("gpu"),
            LabelerError::PersistenceFailure { .. }
        ));
        assert!(StoreError::NotFound("gone".into())
            .for_declaration("gpu")
            .is_benign());
    }
}
