//! Common types for the Azure infrastructure operator: CRDs, errors and utilities
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (AzureCluster, AzureMachine, ...) and
//!   read-only mirrors of the Cluster API types we consume
//! - [`error`] - Operator error type and the reconcile error classification
//! - [`events`] - Kubernetes Event publishing
//! - [`kube_utils`] - Finalizer, pause and owner-reference helpers
//! - [`leader_election`] - Lease-based leader election
//! - [`retry`] - Exponential backoff for transient failures
//! - [`telemetry`] - Tracing subscriber and OpenTelemetry setup

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod leader_election;
pub mod retry;
pub mod telemetry;

pub use error::{Error, ReconcileError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side apply issued by the operator
pub const FIELD_MANAGER: &str = "capz-manager";

/// Namespace the operator runs in (leases, operator-scoped resources)
pub const CAPZ_SYSTEM_NAMESPACE: &str = "capz-system";

/// Annotation that pauses reconciliation of a single Cluster API object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Label carrying the owning Cluster API cluster name
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// API group of the Cluster API core types
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// API group of the infrastructure types reconciled here
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// ASO annotation controlling whether ASO reconciles a resource
pub const RECONCILE_POLICY_ANNOTATION: &str = "serviceoperator.azure.com/reconcile-policy";

/// ASO reconcile policy value that stops ASO from touching a resource
pub const RECONCILE_POLICY_SKIP: &str = "skip";

/// ASO annotation naming the credential secret for a resource
pub const CREDENTIAL_FROM_ANNOTATION: &str = "serviceoperator.azure.com/credential-from";

/// Tag key marking Azure resources owned by a cluster
pub const OWNED_TAG_PREFIX: &str = "sigs.k8s.io_cluster-api-provider-azure_cluster_";
