//! Read-only mirrors of the Cluster API core types
//!
//! Only the fields the infrastructure controllers read are modelled. These
//! CRDs are owned by Cluster API itself, so their schema is never generated
//! or installed from here.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

use super::types::ApiEndpoint;

/// Label set on control plane machines
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Cluster API `Cluster`
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Pauses reconciliation of every object belonging to the cluster
    #[serde(default)]
    pub paused: bool,

    /// Reference to the infrastructure object (e.g. AzureCluster)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Reference to the control plane object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectReference>,

    /// Endpoint of the workload API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

/// Observed state of a Cluster API `Cluster`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Whether the infrastructure object reported ready
    #[serde(default)]
    pub infrastructure_ready: bool,

    /// Whether the control plane reported ready
    #[serde(default)]
    pub control_plane_ready: bool,
}

impl Cluster {
    /// Whether `spec.paused` is set
    pub fn is_paused(&self) -> bool {
        self.spec.paused
    }

    /// Whether the infrastructure of this cluster is ready
    pub fn infrastructure_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.infrastructure_ready)
            .unwrap_or(false)
    }
}

/// Cluster API `Machine`
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the owning cluster
    pub cluster_name: String,

    /// Bootstrap configuration
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Reference to the infrastructure object (e.g. AzureMachine)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Kubernetes version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Failure domain chosen by Cluster API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,
}

/// Bootstrap data reference of a machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Secret holding the bootstrap data under key `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

/// Observed state of a Cluster API `Machine`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Whether bootstrap data is available
    #[serde(default)]
    pub bootstrap_ready: bool,
}

impl Machine {
    /// Whether this machine is part of the control plane
    pub fn is_control_plane(&self) -> bool {
        self.labels().contains_key(CONTROL_PLANE_LABEL)
    }

    /// Name of the bootstrap data secret, once the bootstrap provider set it
    pub fn bootstrap_secret_name(&self) -> Option<&str> {
        self.spec.bootstrap.data_secret_name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_parses_capi_manifest() {
        let cluster: Cluster = serde_json::from_value(serde_json::json!({
            "apiVersion": "cluster.x-k8s.io/v1beta1",
            "kind": "Cluster",
            "metadata": {"name": "prod", "namespace": "default"},
            "spec": {
                "paused": true,
                "infrastructureRef": {
                    "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
                    "kind": "AzureCluster",
                    "name": "prod"
                }
            },
            "status": {"infrastructureReady": true, "phase": "Provisioned"}
        }))
        .unwrap();
        assert!(cluster.is_paused());
        assert!(cluster.infrastructure_ready());
        assert_eq!(
            cluster.spec.infrastructure_ref.unwrap().kind.as_deref(),
            Some("AzureCluster")
        );
    }

    #[test]
    fn test_machine_bootstrap_and_role() {
        let machine: Machine = serde_json::from_value(serde_json::json!({
            "apiVersion": "cluster.x-k8s.io/v1beta1",
            "kind": "Machine",
            "metadata": {
                "name": "prod-cp-0",
                "namespace": "default",
                "labels": {"cluster.x-k8s.io/control-plane": ""}
            },
            "spec": {
                "clusterName": "prod",
                "bootstrap": {"dataSecretName": "prod-cp-0-bootstrap"}
            }
        }))
        .unwrap();
        assert!(machine.is_control_plane());
        assert_eq!(machine.bootstrap_secret_name(), Some("prod-cp-0-bootstrap"));
    }
}
