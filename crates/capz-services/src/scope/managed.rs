use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use parking_lot::RwLock;

use capz_aso::ResourceClient;
use capz_common::crd::{
    normalize_version, AzureManagedControlPlane, AzureManagedControlPlaneSpec,
    AzureManagedControlPlaneStatus, Cluster, ResourceStatus,
};
use capz_common::kube_utils::build_api_resource;
use capz_common::Error;

use super::{cluster_tags, controller_reference, namespace_of, AsoScope, ScopeHandles};
use crate::specs::MANAGED_CLUSTER;

/// What AKS reports about a managed cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedClusterObservation {
    /// API server FQDN
    pub fqdn: Option<String>,
    /// Kubernetes version actually running
    pub current_version: Option<String>,
}

/// Scope of one AzureManagedControlPlane reconcile
pub struct ManagedControlPlaneScope {
    cluster: Cluster,
    control_plane: AzureManagedControlPlane,
    cluster_name: String,
    namespace: String,
    owner: OwnerReference,
    handles: ScopeHandles,
    status: RwLock<AzureManagedControlPlaneStatus>,
}

impl ManagedControlPlaneScope {
    pub fn new(
        cluster: Cluster,
        control_plane: AzureManagedControlPlane,
        handles: ScopeHandles,
    ) -> Result<Self, Error> {
        let cluster_name = cluster.name_any();
        let namespace = namespace_of(&control_plane)?;
        let owner = controller_reference(&control_plane)?;
        let status = control_plane.status.clone().unwrap_or_default();
        Ok(Self {
            cluster,
            control_plane,
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

    pub fn control_plane(&self) -> &AzureManagedControlPlane {
        &self.control_plane
    }

    pub fn spec(&self) -> &AzureManagedControlPlaneSpec {
        &self.control_plane.spec
    }

    /// Name of the managed cluster; the control plane object's name
    pub fn name(&self) -> String {
        self.control_plane.name_any()
    }

    pub fn resource_group(&self) -> &str {
        &self.control_plane.spec.resource_group_name
    }

    pub fn location(&self) -> &str {
        &self.control_plane.spec.location
    }

    /// Kubernetes version without a leading `v`
    pub fn version(&self) -> Result<String, Error> {
        normalize_version(&self.control_plane.spec.version)
    }

    /// DNS prefix, defaulting to the object name
    pub fn dns_prefix(&self) -> String {
        self.control_plane
            .spec
            .dns_prefix
            .clone()
            .unwrap_or_else(|| self.name())
    }

    pub fn vnet_name(&self) -> String {
        self.control_plane
            .spec
            .virtual_network
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-vnet", self.name()))
    }

    pub fn subnet_name(&self) -> String {
        self.control_plane
            .spec
            .virtual_network
            .subnet
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-subnet", self.name()))
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        cluster_tags(&self.cluster_name, None, &self.control_plane.spec.additional_tags)
    }

    /// Snapshot of the status buffer
    pub fn status(&self) -> AzureManagedControlPlaneStatus {
        self.status.read().clone()
    }

    /// Mutate the status buffer
    pub fn update_status(&self, f: impl FnOnce(&mut AzureManagedControlPlaneStatus)) {
        f(&mut self.status.write());
    }

    /// Read FQDN and running version from the ManagedCluster object
    pub async fn observe_managed_cluster(&self) -> Result<ManagedClusterObservation, Error> {
        let ar = build_api_resource(&MANAGED_CLUSTER.api_version(), MANAGED_CLUSTER.kind);
        let Some(obj) = self.handles.client.get(&ar, &self.namespace, &self.name()).await? else {
            return Ok(ManagedClusterObservation::default());
        };
        let field = |path: &str| {
            obj.data
                .pointer(path)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Ok(ManagedClusterObservation {
            fqdn: field("/status/fqdn"),
            current_version: field("/status/currentKubernetesVersion"),
        })
    }
}

impl AsoScope for ManagedControlPlaneScope {
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
