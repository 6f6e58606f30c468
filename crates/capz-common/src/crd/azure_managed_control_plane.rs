//! AzureManagedControlPlane CRD: an AKS cluster acting as the control plane

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApiEndpoint, Condition, IdentityRef, ResourceStatus};
use crate::Error;

/// AzureManagedControlPlane defines an AKS managed cluster.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureManagedControlPlane",
    namespaced,
    status = "AzureManagedControlPlaneStatus",
    shortname = "amcp",
    category = "cluster-api",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureManagedControlPlaneSpec {
    /// Azure region
    pub location: String,

    /// Resource group of the managed cluster
    pub resource_group_name: String,

    /// Subscription the cluster lives in
    #[serde(rename = "subscriptionID", default)]
    pub subscription_id: String,

    /// Identity used to authenticate against Azure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_ref: Option<IdentityRef>,

    /// Kubernetes version (with or without a leading `v`)
    pub version: String,

    /// DNS prefix of the API server (defaults to the object name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_prefix: Option<String>,

    /// AKS pricing tier (Free, Standard)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    /// Virtual network for the node pools
    #[serde(default)]
    pub virtual_network: ManagedVirtualNetwork,

    /// System node pool created with the cluster
    #[serde(default)]
    pub system_pool: SystemPool,

    /// Network plugin (azure, kubenet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_plugin: Option<String>,

    /// Extra tags applied to every Azure resource
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,

    /// Endpoint of the AKS API server, reported once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

/// Virtual network of a managed cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedVirtualNetwork {
    /// Name (defaults to `<name>-vnet`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Address space
    #[serde(default = "default_vnet_cidr")]
    pub cidr_block: String,

    /// Node subnet
    #[serde(default)]
    pub subnet: ManagedSubnet,
}

impl Default for ManagedVirtualNetwork {
    fn default() -> Self {
        Self {
            name: None,
            cidr_block: default_vnet_cidr(),
            subnet: ManagedSubnet::default(),
        }
    }
}

/// Node subnet of a managed cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSubnet {
    /// Name (defaults to `<name>-subnet`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Address range
    #[serde(default = "default_subnet_cidr")]
    pub cidr_block: String,
}

impl Default for ManagedSubnet {
    fn default() -> Self {
        Self {
            name: None,
            cidr_block: default_subnet_cidr(),
        }
    }
}

fn default_vnet_cidr() -> String {
    "10.0.0.0/8".to_string()
}

fn default_subnet_cidr() -> String {
    "10.240.0.0/16".to_string()
}

/// System node pool
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemPool {
    /// Pool name (lowercase alphanumerics, at most 12 characters)
    #[serde(default = "default_pool_name")]
    pub name: String,

    /// VM size of the pool
    #[serde(default = "default_pool_size")]
    pub vm_size: String,

    /// Node count
    #[serde(default = "default_pool_count")]
    pub count: i32,
}

impl Default for SystemPool {
    fn default() -> Self {
        Self {
            name: default_pool_name(),
            vm_size: default_pool_size(),
            count: default_pool_count(),
        }
    }
}

fn default_pool_name() -> String {
    "system".to_string()
}

fn default_pool_size() -> String {
    "Standard_D2s_v3".to_string()
}

fn default_pool_count() -> i32 {
    1
}

/// Observed state of an AzureManagedControlPlane
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureManagedControlPlaneStatus {
    /// Whether the managed cluster is provisioned
    #[serde(default)]
    pub ready: bool,

    /// Whether the kubeconfig secret is available
    #[serde(default)]
    pub initialized: bool,

    /// Kubernetes version running in AKS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// ASO resources owned by this control plane
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,
}

impl AzureManagedControlPlaneSpec {
    /// Validate the spec
    pub fn validate(&self) -> Result<(), Error> {
        if self.location.is_empty() {
            return Err(Error::validation("location cannot be empty"));
        }
        if self.resource_group_name.is_empty() {
            return Err(Error::validation("resourceGroupName cannot be empty"));
        }
        normalize_version(&self.version)?;
        let pool = &self.system_pool.name;
        if pool.is_empty()
            || pool.len() > 12
            || !pool
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(Error::validation(format!(
                "systemPool.name {pool:?} must be 1-12 lowercase alphanumerics"
            )));
        }
        if self.system_pool.count < 1 {
            return Err(Error::validation("systemPool.count must be at least 1"));
        }
        Ok(())
    }
}

/// Strip a leading `v` from a Kubernetes version and check it is `X.Y.Z`
pub fn normalize_version(version: &str) -> Result<String, Error> {
    let trimmed = version.strip_prefix('v').unwrap_or(version);
    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.parse::<u32>().is_err()) {
        return Err(Error::validation(format!(
            "invalid Kubernetes version: {version}"
        )));
    }
    Ok(trimmed.to_string())
}
