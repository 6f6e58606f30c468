//! The orchestrator seam between controllers and services

use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use capz_common::ReconcileError;

/// Drives the ordered services of one owner object
///
/// Implementations are built per reconcile from a scope; controllers only see
/// this trait and inspect the returned error variant.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Run setup, then reconcile every service in order
    async fn reconcile(&self) -> Result<(), ReconcileError>;

    /// Pause every pausable service
    async fn pause(&self) -> Result<(), ReconcileError>;

    /// Delete the owner's Azure resources
    async fn delete(&self) -> Result<(), ReconcileError>;
}

/// Service owning the resource group(s) of an owner
pub const RESOURCE_GROUPS_SERVICE: &str = "resourcegroups";

/// Service owning peerings, which live outside the resource group
pub const VNET_PEERINGS_SERVICE: &str = "vnetpeerings";

/// Decides how an owner's resources are deleted
///
/// Returns `true` when every service must delete its own resources in
/// reverse order, `false` when deleting the resource group removes
/// everything inside it.
pub type DeletePolicy<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// How a delete was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Each service in reverse order
    Individual,
    /// Out-of-group resources, then the resource group
    Group,
}

impl DeleteMode {
    /// Evaluate `policy` once for `scope`
    pub fn choose<S>(policy: &DeletePolicy<S>, scope: &S) -> Self {
        if policy(scope) {
            Self::Individual
        } else {
            Self::Group
        }
    }
}

/// Services deleted by a group delete, in order
pub const GROUP_DELETE_ORDER: [&str; 2] = [VNET_PEERINGS_SERVICE, RESOURCE_GROUPS_SERVICE];
