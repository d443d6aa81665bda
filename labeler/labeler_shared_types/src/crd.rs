//! The `LogicalCluster` custom resource as stored by the Kubernetes control plane.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{LogicalClusterDeclaration, LogicalClusterStatus, NodeId};

/// Desired membership of a logical cluster.
///
/// The cluster's name is the object name; it is also the marker value
/// written onto member nodes.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "scheduler-mgr.ucloud.io",
    version = "v1",
    kind = "LogicalCluster",
    plural = "logicalclusters",
    shortname = "lc",
    shortname = "lcs",
    status = "LogicalClusterStatus",
    printcolumn = r#"{"name":"Ready Nodes","type":"integer","jsonPath":".status.observedCount"}"#,
    printcolumn = r#"{"name":"Expected Nodes","type":"integer","jsonPath":".status.expectedCount"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct LogicalClusterSpec {
    /// Display name carried by older manifests. Ignored; the object name wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeId>,
}

impl From<&LogicalCluster> for LogicalClusterDeclaration {
    fn from(lc: &LogicalCluster) -> Self {
        LogicalClusterDeclaration {
            name: lc.name_any(),
            desired_nodes: lc.spec.nodes.clone(),
            status: lc.status.clone().unwrap_or_default(),
            finalizers: lc.finalizers().iter().cloned().collect(),
            deletion_requested: lc.metadata.deletion_timestamp.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::chrono::Utc;
    use kube::CustomResourceExt;

    #[test]
    fn test_crd_is_cluster_scoped() {
        let crd = LogicalCluster::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "scheduler-mgr.ucloud.io");
        assert_eq!(crd.spec.names.kind, "LogicalCluster");
    }

    #[test]
    fn test_declaration_from_resource() {
        let mut lc = LogicalCluster::new(
            "gpu",
            LogicalClusterSpec {
                name: Some("legacy-name".to_string()),
                nodes: vec!["n1".to_string(), "n2".to_string()],
            },
        );
        lc.metadata.finalizers = Some(vec![crate::DEFAULT_FINALIZER.to_string()]);

        let decl = LogicalClusterDeclaration::from(&lc);
        assert_eq!(decl.name, "gpu");
        assert_eq!(decl.desired_nodes, vec!["n1", "n2"]);
        assert!(decl.has_finalizer(crate::DEFAULT_FINALIZER));
        assert!(!decl.deletion_requested);
        assert!(!decl.status.is_evaluated());
    }

    #[test]
    fn test_deletion_timestamp_requests_deletion() {
        let mut lc = LogicalCluster::new("gpu", LogicalClusterSpec::default());
        lc.metadata.deletion_timestamp = Some(Time(Utc::now()));

        let decl = LogicalClusterDeclaration::from(&lc);
        assert!(decl.deletion_requested);
        assert!(decl.finalizers.is_empty());
    }
}
