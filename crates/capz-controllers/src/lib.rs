//! Controllers for the Azure infrastructure kinds of Cluster API
//!
//! Each controller fetches its object and Cluster API owners, resolves
//! credentials, builds a scope and hands the orchestrator to the shared
//! [`lifecycle`] driver.
//!
//! # Modules
//!
//! - [`azure_cluster`] - AzureCluster: network infrastructure and API endpoint
//! - [`azure_machine`] - AzureMachine: VMs and provider IDs
//! - [`azure_managed_control_plane`] - AzureManagedControlPlane: AKS clusters
//! - [`azure_aso_managed_cluster`] - AzureASOManagedCluster: raw ASO manifests
//! - [`lifecycle`] - Pause, delete and normal reconcile shared by every kind
//! - [`outcome`] - Classification of orchestrator failures
//! - [`credentials`] - Identity resolution and the ASO credential secret
//! - [`context`] - Shared controller context
//! - [`kube_client`] - Kubernetes API seam

pub mod azure_aso_managed_cluster;
pub mod azure_cluster;
pub mod azure_machine;
pub mod azure_managed_control_plane;
pub mod context;
pub mod credentials;
pub mod kube_client;
pub mod lifecycle;
pub mod outcome;

#[cfg(test)]
mod testing;

pub use azure_aso_managed_cluster::AsoResourcesOrchestrator;
pub use context::{Context, ContextBuilder, Orchestrators};
pub use credentials::CredentialCache;
pub use kube_client::{InfraKind, KubeClient, KubeClientImpl};
pub use outcome::ReconcileOutcome;
