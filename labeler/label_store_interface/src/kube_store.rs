//! Kubernetes-backed stores.
//!
//! Nodes are read and patched through `Api<Node>`; declarations are the
//! cluster-scoped `LogicalCluster` custom resources.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use labeler_shared_types::{
    LabelerError, LogicalCluster, LogicalClusterDeclaration, LogicalClusterStatus, NodeId, Result,
};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::debug;

use crate::{DeclarationStore, MarkedNode, MarkerPatch, MarkerSelector, NodeLabelStore, StoreError};

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(ae) => match ae.code {
                404 => StoreError::NotFound(ae.message.clone()),
                409 => StoreError::Conflict(ae.message.clone()),
                429 | 500..=599 => StoreError::Unavailable(ae.message.clone()),
                _ => StoreError::Rejected(ae.message.clone()),
            },
            // Transport failures and client-side timeouts.
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// Read failures surface as the control plane being unavailable.
fn read_failure(name: &str, err: kube::Error) -> LabelerError {
    LabelerError::InventoryUnavailable(format!("reading declaration {}: {}", name, err))
}

fn patch_params(field_manager: &str) -> PatchParams {
    PatchParams {
        field_manager: Some(field_manager.to_string()),
        ..Default::default()
    }
}

/// Node inventory backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeNodeStore {
    api: Api<Node>,
    marker_key: String,
    field_manager: String,
}

impl KubeNodeStore {
    pub fn new(client: Client, marker_key: impl Into<String>, field_manager: impl Into<String>) -> Self {
        Self {
            api: Api::all(client),
            marker_key: marker_key.into(),
            field_manager: field_manager.into(),
        }
    }
}

#[async_trait]
impl NodeLabelStore for KubeNodeStore {
    async fn list(&self, selector: &MarkerSelector) -> Result<Vec<MarkedNode>> {
        let label_selector = selector.to_label_selector(&self.marker_key);
        let lp = ListParams::default().labels(&label_selector);
        let nodes = self
            .api
            .list(&lp)
            .await
            .map_err(|e| LabelerError::InventoryUnavailable(e.to_string()))?;

        debug!(selector = %label_selector, count = nodes.items.len(), "listed nodes");

        Ok(nodes
            .items
            .iter()
            .filter_map(|node| {
                let marker = node.labels().get(&self.marker_key)?;
                Some(MarkedNode {
                    id: node.name_any(),
                    marker: marker.clone(),
                })
            })
            .collect())
    }

    async fn patch(&self, node: &NodeId, patch: &MarkerPatch) -> Result<()> {
        let body = patch.to_merge_patch(&self.marker_key);
        self.api
            .patch(node, &patch_params(&self.field_manager), &Patch::Merge(&body))
            .await
            .map_err(|e| StoreError::from(e).for_node(node))?;
        Ok(())
    }
}

/// `LogicalCluster` resources stored by the Kubernetes control plane.
#[derive(Clone)]
pub struct KubeDeclarationStore {
    api: Api<LogicalCluster>,
    field_manager: String,
}

impl KubeDeclarationStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            api: Api::all(client),
            field_manager: field_manager.into(),
        }
    }

    /// Every stored declaration.
    pub async fn list(&self) -> Result<Vec<LogicalClusterDeclaration>> {
        let list = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(|e| LabelerError::InventoryUnavailable(e.to_string()))?;
        Ok(list.items.iter().map(LogicalClusterDeclaration::from).collect())
    }
}

#[async_trait]
impl DeclarationStore for KubeDeclarationStore {
    async fn get(&self, name: &str) -> Result<Option<LogicalClusterDeclaration>> {
        let lc = self
            .api
            .get_opt(name)
            .await
            .map_err(|e| read_failure(name, e))?;
        Ok(lc.as_ref().map(LogicalClusterDeclaration::from))
    }

    async fn update_status(&self, name: &str, status: &LogicalClusterStatus) -> Result<()> {
        let body = json!({ "status": status });
        self.api
            .patch_status(name, &patch_params(&self.field_manager), &Patch::Merge(&body))
            .await
            .map_err(|e| StoreError::from(e).for_declaration(name))?;
        Ok(())
    }

    async fn update_finalizers(&self, name: &str, finalizers: &BTreeSet<String>) -> Result<()> {
        let body = json!({ "metadata": { "finalizers": finalizers } });
        self.api
            .patch(name, &patch_params(&self.field_manager), &Patch::Merge(&body))
            .await
            .map_err(|e| StoreError::from(e).for_declaration(name))?;
        Ok(())
    }
}
