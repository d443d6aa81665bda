//! Reconciliation Actuate Module
//!
//! Applies marker mutations to nodes, one node at a time and in order.
//!
//! A batch is not transactional: the first failing node aborts the rest of
//! the batch and the nodes already patched stay patched. The next cycle
//! re-observes and resumes from wherever this one stopped.

use std::sync::Arc;

use label_store_interface::{MarkerPatch, NodeLabelStore};
use labeler_shared_types::{NodeId, Result};
use observability::node_span;
use tracing::{info, warn, Instrument};

/// Writes and removes logical cluster markers through the node inventory.
#[derive(Clone)]
pub struct LabelMutator {
    nodes: Arc<dyn NodeLabelStore>,
}

impl LabelMutator {
    pub fn new(nodes: Arc<dyn NodeLabelStore>) -> Self {
        Self { nodes }
    }

    /// Set the marker of every node in `node_ids` to `group`, overwriting any
    /// previous value. Returns the number of nodes patched.
    pub async fn apply_marker(&self, node_ids: &[NodeId], group: &str) -> Result<usize> {
        self.mutate_batch("apply_marker", node_ids, MarkerPatch::SetMarker(group.to_string()))
            .await
    }

    /// Remove the marker key from every node in `node_ids`. Returns the number
    /// of nodes patched.
    pub async fn clear_marker(&self, node_ids: &[NodeId]) -> Result<usize> {
        self.mutate_batch("clear_marker", node_ids, MarkerPatch::RemoveMarker)
            .await
    }

    async fn mutate_batch(
        &self,
        operation: &'static str,
        node_ids: &[NodeId],
        patch: MarkerPatch,
    ) -> Result<usize> {
        let mut applied = 0;
        for node in node_ids {
            let result = self
                .nodes
                .patch(node, &patch)
                .instrument(node_span!(operation, node))
                .await;

            if let Err(e) = result {
                warn!(
                    operation,
                    node = %node,
                    applied,
                    remaining = node_ids.len() - applied,
                    error = %e,
                    "node mutation failed, aborting batch"
                );
                return Err(e);
            }

            info!(operation, node = %node, "node marker updated");
            applied += 1;
        }
        Ok(applied)
    }
}
