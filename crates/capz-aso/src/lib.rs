//! Azure Service Operator (ASO) resource engine
//!
//! Every Azure resource the operator manages is an ASO custom resource in
//! the management cluster. This crate applies the desired set of those
//! resources for an owner, reports their readiness, prunes resources that
//! dropped out of the desired set and pauses or deletes them on request.
//!
//! # Modules
//!
//! - [`client`] - Seam over the Kubernetes API for dynamic objects
//! - [`mutators`] - Ownership, credential and pause metadata applied before SSA
//! - [`readiness`] - ASO `Ready` condition evaluation
//! - [`reconciler`] - The apply/prune/pause/delete engine
//! - [`watch`] - Dynamic watches that re-trigger owners on ASO changes

#![deny(missing_docs)]

pub mod client;
pub mod mutators;
pub mod readiness;
pub mod reconciler;
pub mod watch;

pub use client::{DeleteOutcome, KubeResourceClient, ResourceClient};
pub use readiness::{readiness, Readiness};
pub use reconciler::{api_resource_for, status_for, Applied, ResourceReconciler};
pub use watch::{OwnerTrigger, ResourceWatcher, WatchRegistry};

/// Suffix shared by every ASO API group
pub const ASO_GROUP_SUFFIX: &str = ".azure.com";

/// Whether `group` is served by ASO
pub fn is_aso_group(group: &str) -> bool {
    group.ends_with(ASO_GROUP_SUFFIX)
}
