use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use parking_lot::RwLock;

use capz_aso::ResourceClient;
use capz_common::crd::{
    AzureCluster, AzureClusterSpec, AzureClusterStatus, Cluster, LoadBalancerSpec,
    LoadBalancerType, ResourceStatus,
};
use capz_common::kube_utils::build_api_resource;
use capz_common::Error;

use super::{cluster_tags, controller_reference, namespace_of, AsoScope, ScopeHandles};
use crate::specs::{self, PUBLIC_IP};

/// Frontend address of internal API server load balancers without one set
pub const DEFAULT_INTERNAL_LB_IP: &str = "10.0.0.100";

/// Scope of one AzureCluster reconcile
pub struct ClusterScope {
    cluster: Cluster,
    azure_cluster: AzureCluster,
    spec: AzureClusterSpec,
    cluster_name: String,
    namespace: String,
    owner: OwnerReference,
    handles: ScopeHandles,
    status: RwLock<AzureClusterStatus>,
}

impl ClusterScope {
    /// Build the scope; network defaults are resolved here once
    pub fn new(
        cluster: Cluster,
        azure_cluster: AzureCluster,
        handles: ScopeHandles,
    ) -> Result<Self, Error> {
        let cluster_name = cluster.name_any();
        let namespace = namespace_of(&azure_cluster)?;
        let owner = controller_reference(&azure_cluster)?;
        let spec = azure_cluster.spec.with_defaults(&cluster_name);
        let status = azure_cluster.status.clone().unwrap_or_default();
        Ok(Self {
            cluster,
            azure_cluster,
            spec,
            cluster_name,
            namespace,
            owner,
            handles,
            status: RwLock::new(status),
        })
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn azure_cluster(&self) -> &AzureCluster {
        &self.azure_cluster
    }

    /// Spec with every network default resolved
    pub fn spec(&self) -> &AzureClusterSpec {
        &self.spec
    }

    pub fn location(&self) -> &str {
        &self.spec.location
    }

    pub fn resource_group(&self) -> String {
        self.spec.resource_group_name(&self.cluster_name)
    }

    /// Subscription from the spec, falling back to the identity's
    pub fn subscription_id(&self) -> &str {
        if self.spec.subscription_id.is_empty() {
            &self.handles.credentials.subscription_id
        } else {
            &self.spec.subscription_id
        }
    }

    pub fn vnet_name(&self) -> String {
        self.spec
            .network_spec
            .vnet
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-vnet", self.cluster_name))
    }

    /// Resource group of the virtual network
    pub fn vnet_resource_group(&self) -> String {
        self.spec
            .network_spec
            .vnet
            .resource_group
            .clone()
            .unwrap_or_else(|| self.resource_group())
    }

    /// Whether this cluster creates and owns the virtual network
    pub fn is_vnet_managed(&self) -> bool {
        !self.spec.is_vnet_external(&self.cluster_name)
    }

    pub fn api_server_lb(&self) -> LoadBalancerSpec {
        self.spec.network_spec.api_server_lb.clone().unwrap_or_default()
    }

    pub fn api_server_lb_name(&self) -> String {
        self.api_server_lb()
            .name
            .unwrap_or_else(|| format!("{}-public-lb", self.cluster_name))
    }

    /// Public IP of the API server, only for public load balancers
    pub fn api_server_public_ip_name(&self) -> Option<String> {
        match self.api_server_lb().lb_type {
            LoadBalancerType::Public => Some(format!("{}-apiserver-pip", self.cluster_name)),
            LoadBalancerType::Internal => None,
        }
    }

    /// DNS label of the API server public IP
    pub fn api_server_dns_label(&self) -> String {
        format!("{}-{}", self.cluster_name, self.namespace)
    }

    /// Private DNS zone, only for internal load balancers
    pub fn private_dns_zone(&self) -> Option<String> {
        match self.api_server_lb().lb_type {
            LoadBalancerType::Public => None,
            LoadBalancerType::Internal => Some(
                self.spec
                    .network_spec
                    .private_dns_zone_name
                    .clone()
                    .unwrap_or_else(|| format!("{}.capz.io", self.cluster_name)),
            ),
        }
    }

    /// Zones advertised to machines, in order
    pub fn zones(&self) -> Vec<String> {
        self.status.read().failure_domains.keys().cloned().collect()
    }

    pub fn tags(&self, role: Option<&str>) -> BTreeMap<String, String> {
        cluster_tags(&self.cluster_name, role, &self.spec.additional_tags)
    }

    /// Snapshot of the status buffer
    pub fn status(&self) -> AzureClusterStatus {
        self.status.read().clone()
    }

    /// Mutate the status buffer
    pub fn update_status(&self, f: impl FnOnce(&mut AzureClusterStatus)) {
        f(&mut self.status.write());
    }

    /// Private frontend address of an internal load balancer
    pub fn internal_lb_ip(&self) -> String {
        self.api_server_lb()
            .frontend_ip
            .unwrap_or_else(|| DEFAULT_INTERNAL_LB_IP.to_string())
    }

    /// Address the API server is reachable at, once Azure assigned it
    ///
    /// Public load balancers report their public IP's address; internal ones
    /// use the frontend address.
    pub async fn api_server_address(&self) -> Result<Option<String>, Error> {
        if self.api_server_lb().lb_type == LoadBalancerType::Internal {
            return Ok(Some(self.internal_lb_ip()));
        }
        let Some(pip) = self.api_server_public_ip_name() else {
            return Ok(None);
        };
        let ar = build_api_resource(&PUBLIC_IP.api_version(), PUBLIC_IP.kind);
        let obj = self.handles.client.get(&ar, &self.namespace, &pip).await?;
        Ok(obj.and_then(|o| {
            o.data
                .pointer("/status/ipAddress")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        }))
    }

    /// ARM ID of a network resource in the cluster's resource group
    pub fn network_id(&self, provider_type: &str, name: &str) -> String {
        specs::network_resource_id(
            self.subscription_id(),
            &self.resource_group(),
            provider_type,
            name,
        )
    }

    pub fn client(&self) -> &dyn ResourceClient {
        self.handles.client.as_ref()
    }
}

impl AsoScope for ClusterScope {
    fn handles(&self) -> &ScopeHandles {
        &self.handles
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn owner_reference(&self) -> &OwnerReference {
        &self.owner
    }

    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn resource_statuses(&self) -> Vec<ResourceStatus> {
        self.status.read().resources.clone()
    }

    fn set_resource_statuses(&self, statuses: Vec<ResourceStatus>) {
        self.status.write().resources = statuses;
    }
}
