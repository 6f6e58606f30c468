//! Azure services and their orchestration
//!
//! A service owns one slice of an owner's Azure footprint (resource groups,
//! subnets, VMs...) and knows how to reconcile and delete it. Orchestrators
//! run a fixed, ordered list of services for one owner object: forward on
//! reconcile, in reverse on delete, or as a resource group delete when the
//! owner created the group.
//!
//! # Modules
//!
//! - [`service`] - Service capability traits and the ordered [`ServiceList`]
//! - [`orchestrator`] - The [`Orchestrator`] seam used by controllers
//! - [`scope`] - Per-reconcile state shared by an owner's services
//! - [`specs`] - Builders of the ASO objects each service applies
//! - [`aso_service`] - Generic service over the ASO engine
//! - [`cluster_service`], [`machine_service`], [`managed_service`] - The
//!   orchestrators of each infrastructure kind
//! - [`zones`] - Availability zone discovery

pub mod aso_service;
pub mod cluster_service;
pub mod machine_service;
pub mod managed_service;
pub mod orchestrator;
pub mod scope;
pub mod service;
pub mod specs;
pub mod zones;

#[cfg(test)]
mod testing;

pub use aso_service::{AsoService, SpecBuilder};
pub use cluster_service::AzureClusterService;
pub use machine_service::AzureMachineService;
pub use managed_service::AzureManagedControlPlaneService;
pub use orchestrator::{DeleteMode, DeletePolicy, Orchestrator};
pub use scope::{
    AsoManagedClusterScope, AsoScope, AzureCredentials, ClusterScope, MachineScope,
    ManagedControlPlaneScope, ScopeHandles,
};
pub use service::{Pauser, ServiceList, ServiceReconciler};
pub use zones::{StaticZoneResolver, ZoneResolver};
