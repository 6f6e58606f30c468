use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::ResourceExt;
use parking_lot::RwLock;

use capz_aso::reconciler::INVALID_RESOURCE_REASON;
use capz_common::crd::{AzureASOManagedCluster, AzureASOManagedClusterStatus, Cluster, ResourceStatus};
use capz_common::{Error, ReconcileError};

use super::{controller_reference, namespace_of, AsoScope, ScopeHandles};

/// Scope of one AzureASOManagedCluster reconcile
pub struct AsoManagedClusterScope {
    cluster: Cluster,
    object: AzureASOManagedCluster,
    cluster_name: String,
    namespace: String,
    owner: OwnerReference,
    handles: ScopeHandles,
    status: RwLock<AzureASOManagedClusterStatus>,
}

impl AsoManagedClusterScope {
    pub fn new(
        cluster: Cluster,
        object: AzureASOManagedCluster,
        handles: ScopeHandles,
    ) -> Result<Self, Error> {
        let cluster_name = cluster.name_any();
        let namespace = namespace_of(&object)?;
        let owner = controller_reference(&object)?;
        let status = object.status.clone().unwrap_or_default();
        Ok(Self {
            cluster,
            object,
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

    pub fn object(&self) -> &AzureASOManagedCluster {
        &self.object
    }

    /// `spec.resources` as objects
    ///
    /// A manifest that isn't a Kubernetes object can't succeed until the
    /// spec changes, so it is a terminal error.
    pub fn desired_resources(&self) -> Result<Vec<DynamicObject>, ReconcileError> {
        self.object
            .spec
            .resources
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                serde_json::from_value::<DynamicObject>(raw.clone()).map_err(|e| {
                    ReconcileError::terminal(
                        INVALID_RESOURCE_REASON,
                        format!("spec.resources[{i}] is not a Kubernetes object: {e}"),
                    )
                })
            })
            .collect()
    }

    /// Snapshot of the status buffer
    pub fn status(&self) -> AzureASOManagedClusterStatus {
        self.status.read().clone()
    }

    /// Mutate the status buffer
    pub fn update_status(&self, f: impl FnOnce(&mut AzureASOManagedClusterStatus)) {
        f(&mut self.status.write());
    }
}

impl AsoScope for AsoManagedClusterScope {
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
