//! AKS managed cluster builder

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use serde_json::json;

use capz_common::crd::SystemPool;

use super::*;

/// Key under which ASO exports the admin kubeconfig
pub const KUBECONFIG_SECRET_KEY: &str = "value";

/// Secret ASO writes the admin kubeconfig to
pub fn kubeconfig_secret_name(cluster: &str) -> String {
    format!("{cluster}-kubeconfig")
}

/// Everything that describes one managed cluster
#[derive(Debug, Clone)]
pub struct ManagedClusterParams<'a> {
    pub name: &'a str,
    pub cluster_name: &'a str,
    pub resource_group: &'a str,
    pub location: &'a str,
    /// Kubernetes version without a leading `v`
    pub version: &'a str,
    pub dns_prefix: &'a str,
    pub sku_tier: Option<&'a str>,
    pub network_plugin: Option<&'a str>,
    pub system_pool: &'a SystemPool,
    /// Subnet object of the node pools
    pub subnet: &'a str,
    pub tags: &'a BTreeMap<String, String>,
}

pub fn managed_cluster(params: &ManagedClusterParams<'_>) -> DynamicObject {
    let pool = params.system_pool;
    MANAGED_CLUSTER.object(
        params.name,
        json!({
            "azureName": params.name,
            "owner": owner(params.resource_group),
            "location": params.location,
            "kubernetesVersion": params.version,
            "dnsPrefix": params.dns_prefix,
            "sku": {"name": "Base", "tier": params.sku_tier.unwrap_or("Free")},
            "identity": {"type": "SystemAssigned"},
            "networkProfile": {"networkPlugin": params.network_plugin.unwrap_or("azure")},
            "agentPoolProfiles": [{
                "name": pool.name,
                "mode": "System",
                "count": pool.count,
                "vmSize": pool.vm_size,
                "type": "VirtualMachineScaleSets",
                "vnetSubnetReference": SUBNET.reference(params.subnet),
            }],
            "operatorSpec": {"secrets": {"adminCredentials": {
                "name": kubeconfig_secret_name(params.cluster_name),
                "key": KUBECONFIG_SECRET_KEY,
            }}},
            "tags": super::tags(params.tags),
        }),
    )
}
