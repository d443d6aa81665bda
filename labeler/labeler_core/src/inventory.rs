//! Read-only queries over logical clusters as they exist on the nodes.
//!
//! These look only at node markers, not at declarations, so they also show
//! groups left behind by declarations that no longer exist.

use std::collections::BTreeMap;
use std::sync::Arc;

use label_store_interface::{MarkerSelector, NodeLabelStore};
use labeler_shared_types::{LabelerError, NodeId, Result};
use serde::{Deserialize, Serialize};

/// A logical cluster and the hosts carrying its marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalClusterSummary {
    pub cluster_name: String,
    pub hosts: Vec<NodeId>,
}

pub struct ClusterInventory {
    nodes: Arc<dyn NodeLabelStore>,
}

impl ClusterInventory {
    pub fn new(nodes: Arc<dyn NodeLabelStore>) -> Self {
        Self { nodes }
    }

    /// Every logical cluster with at least one marked node, ordered by name.
    pub async fn list_clusters(&self) -> Result<Vec<LogicalClusterSummary>> {
        let marked = self.nodes.list(&MarkerSelector::Exists).await?;
        if marked.is_empty() {
            return Err(LabelerError::NoLogicalClusters);
        }

        let mut clusters: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for node in marked {
            clusters.entry(node.marker).or_default().push(node.id);
        }

        Ok(clusters
            .into_iter()
            .map(|(cluster_name, mut hosts)| {
                hosts.sort();
                LogicalClusterSummary {
                    cluster_name,
                    hosts,
                }
            })
            .collect())
    }

    /// Hosts of a single logical cluster. A group with no marked hosts does
    /// not exist.
    pub async fn get_cluster(&self, name: &str) -> Result<LogicalClusterSummary> {
        let marked = self
            .nodes
            .list(&MarkerSelector::Equals(name.to_string()))
            .await?;
        if marked.is_empty() {
            return Err(LabelerError::NotFound(name.to_string()));
        }

        let mut hosts: Vec<NodeId> = marked.into_iter().map(|n| n.id).collect();
        hosts.sort();
        Ok(LogicalClusterSummary {
            cluster_name: name.to_string(),
            hosts,
        })
    }
}
