//! Per-reconcile scopes
//!
//! A scope bundles what services need for one reconcile of one owner: the
//! owner and its Cluster API parents, resolved credentials, the ASO client
//! and watch handles, and a status buffer. Services write to the buffer;
//! the controller flushes it once when the reconcile ends.

mod aso_managed;
mod cluster;
mod machine;
mod managed;

pub use aso_managed::AsoManagedClusterScope;
pub use cluster::{ClusterScope, DEFAULT_INTERNAL_LB_IP};
pub use machine::{MachineScope, VmObservation};
pub use managed::{ManagedClusterObservation, ManagedControlPlaneScope};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use capz_aso::{ResourceClient, ResourceReconciler, ResourceWatcher};
use capz_common::crd::{IdentityType, ResourceStatus};
use capz_common::{Error, OWNED_TAG_PREFIX};

/// Azure credentials resolved from an identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AzureCredentials {
    /// Subscription the owner's resources live in
    pub subscription_id: String,
    /// Azure AD tenant
    pub tenant_id: String,
    /// Application (client) ID
    pub client_id: String,
    /// Authentication method
    pub identity_type: IdentityType,
    /// ASO credential secret in the owner's namespace, if one was created
    pub aso_secret: Option<String>,
}

/// Handles shared by every scope
#[derive(Clone)]
pub struct ScopeHandles {
    /// ASO object client
    pub client: Arc<dyn ResourceClient>,
    /// Watch registry for ASO kinds
    pub watcher: Arc<dyn ResourceWatcher>,
    /// Resolved credentials
    pub credentials: AzureCredentials,
    /// Delay before checking again on not-ready resources
    pub requeue_after: Duration,
}

/// What ASO-backed services need from a scope
pub trait AsoScope: Send + Sync {
    /// Shared handles
    fn handles(&self) -> &ScopeHandles;

    /// Namespace of the owner and its ASO objects
    fn namespace(&self) -> &str;

    /// Controller reference placed on every ASO object
    fn owner_reference(&self) -> &OwnerReference;

    /// Cluster API cluster name
    fn cluster_name(&self) -> &str;

    /// The owner's current resource status list
    fn resource_statuses(&self) -> Vec<ResourceStatus>;

    /// Replace the owner's resource status list
    fn set_resource_statuses(&self, statuses: Vec<ResourceStatus>);

    /// Engine bound to this scope's owner
    fn engine(&self) -> ResourceReconciler<'_> {
        let handles = self.handles();
        ResourceReconciler::new(
            handles.client.as_ref(),
            handles.watcher.as_ref(),
            self.namespace(),
            self.owner_reference().clone(),
            self.cluster_name(),
        )
        .with_credential_secret(handles.credentials.aso_secret.clone())
    }

    /// Delay before checking again on not-ready resources
    fn requeue_after(&self) -> Duration {
        self.handles().requeue_after
    }
}

/// Controller owner reference for `obj`
pub fn controller_reference<K>(obj: &K) -> Result<OwnerReference, Error>
where
    K: Resource<DynamicType = ()>,
{
    obj.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context(
            "scope",
            format!("{} {} has no uid", K::kind(&()), obj.name_any()),
        )
    })
}

/// Namespace of `obj`, required for every scoped owner
pub fn namespace_of<K: Resource>(obj: &K) -> Result<String, Error> {
    obj.namespace().ok_or_else(|| {
        Error::internal_with_context("scope", format!("{} has no namespace", obj.name_any()))
    })
}

/// Tags put on every Azure resource of a cluster
///
/// The owned tag lets Azure-side tooling find what belongs to the cluster;
/// user tags never override it.
pub fn cluster_tags(
    cluster_name: &str,
    role: Option<&str>,
    additional: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut tags = additional.clone();
    tags.insert(format!("{OWNED_TAG_PREFIX}{cluster_name}"), "owned".to_string());
    if let Some(role) = role {
        tags.insert("sigs.k8s.io_cluster-api-provider-azure_role".to_string(), role.to_string());
    }
    tags
}
