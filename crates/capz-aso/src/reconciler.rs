//! The ASO apply/prune engine
//!
//! The engine compares the desired objects of an owner with the
//! [`ResourceStatus`] list recorded on the owner by the previous run:
//!
//! - desired objects are server-side applied and their readiness recorded
//! - recorded resources missing from the desired set are deleted, matched by
//!   group, kind and name; those whose deletion is still running stay in the
//!   returned list as not ready
//!
//! A resource ASO reports as failed doesn't stop the pass: it is recorded as
//! not ready and listed in [`Applied::failures`]. The caller persists the
//! returned list on the owner's status.

use std::collections::HashSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DynamicObject, TypeMeta};
use kube::core::ApiResource;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use capz_common::crd::{ResourceKey, ResourceStatus};
use capz_common::kube_utils::{api_version, build_api_resource};
use capz_common::ReconcileError;

use crate::client::{DeleteOutcome, ResourceClient};
use crate::mutators;
use crate::readiness::{readiness, Readiness};
use crate::watch::ResourceWatcher;

/// Reason of terminal errors for unusable desired objects
pub const INVALID_RESOURCE_REASON: &str = "InvalidResource";

/// ApiResource of a desired object, from its apiVersion and kind
pub fn api_resource_for(obj: &DynamicObject) -> Result<ApiResource, ReconcileError> {
    match &obj.types {
        Some(TypeMeta { api_version, kind }) if !api_version.is_empty() && !kind.is_empty() => {
            Ok(build_api_resource(api_version, kind))
        }
        _ => Err(ReconcileError::terminal(
            INVALID_RESOURCE_REASON,
            format!("resource {} has no apiVersion or kind", obj.name_any()),
        )),
    }
}

/// Status entry for an object
pub fn status_for(ar: &ApiResource, name: &str, ready: bool) -> ResourceStatus {
    ResourceStatus {
        group: ar.group.clone(),
        version: ar.version.clone(),
        kind: ar.kind.clone(),
        name: name.to_string(),
        ready,
    }
}

fn api_resource_of_status(status: &ResourceStatus) -> ApiResource {
    build_api_resource(&api_version(&status.group, &status.version), &status.kind)
}

/// Outcome of one apply/prune pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    /// The owner's new status list
    pub statuses: Vec<ResourceStatus>,
    /// Resources ASO gave up on, as `Kind/name: reason: message`
    pub failures: Vec<String>,
}

impl Applied {
    /// First problem worth reporting: a failure, else a resource not ready yet
    pub fn blocker(&self) -> Option<String> {
        self.failures.first().cloned().or_else(|| {
            self.statuses
                .iter()
                .find(|s| !s.ready)
                .map(|s| format!("{}/{} not ready", s.kind, s.name))
        })
    }
}

/// Applies, prunes, pauses and deletes the ASO resources of one owner
pub struct ResourceReconciler<'a> {
    client: &'a dyn ResourceClient,
    watcher: &'a dyn ResourceWatcher,
    namespace: String,
    owner: OwnerReference,
    cluster_name: String,
    credential_secret: Option<String>,
}

impl<'a> ResourceReconciler<'a> {
    /// Engine for resources owned by `owner` in `namespace`
    pub fn new(
        client: &'a dyn ResourceClient,
        watcher: &'a dyn ResourceWatcher,
        namespace: impl Into<String>,
        owner: OwnerReference,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            watcher,
            namespace: namespace.into(),
            owner,
            cluster_name: cluster_name.into(),
            credential_secret: None,
        }
    }

    /// Annotate every applied object with this ASO credential secret
    pub fn with_credential_secret(mut self, secret: Option<String>) -> Self {
        self.credential_secret = secret;
        self
    }

    /// Apply `desired` and prune what `previous` has beyond it
    ///
    /// The status list holds one entry per desired object followed by the
    /// pruned entries that still exist.
    #[instrument(skip_all, fields(owner = %self.owner.name, desired = desired.len()))]
    pub async fn reconcile(
        &self,
        desired: Vec<DynamicObject>,
        previous: &[ResourceStatus],
    ) -> Result<Applied, ReconcileError> {
        let mut applied = Applied {
            statuses: Vec::with_capacity(desired.len()),
            failures: Vec::new(),
        };
        let mut desired_keys = HashSet::with_capacity(desired.len());

        for mut obj in desired {
            let ar = api_resource_for(&obj)?;
            let name = obj.name_any();
            self.prepare(&mut obj);
            self.watcher.watch(&ar);

            let live = self
                .client
                .apply(&obj, &ar, true)
                .await
                .map_err(|e| ReconcileError::from(e).wrap(&format!("apply {} {name}", ar.kind)))?;

            let ready = match readiness(&live) {
                Readiness::Ready => true,
                Readiness::NotReady { message } => {
                    debug!(kind = %ar.kind, name = %name, message = %message, "Resource not ready");
                    false
                }
                Readiness::Failed { reason, message } => {
                    warn!(kind = %ar.kind, name = %name, reason = %reason, message = %message, "ASO resource failed");
                    applied
                        .failures
                        .push(format!("{}/{name}: {reason}: {message}", ar.kind));
                    false
                }
            };

            let status = status_for(&ar, &name, ready);
            desired_keys.insert(status.key());
            applied.statuses.push(status);
        }

        let stale: Vec<&ResourceStatus> = previous
            .iter()
            .filter(|p| !desired_keys.contains(&p.key()))
            .collect();
        for status in stale {
            if self.delete_one(status).await? {
                applied.statuses.push(ResourceStatus {
                    ready: false,
                    ..status.clone()
                });
            }
        }

        Ok(applied)
    }

    /// Stop ASO from reconciling every resource in `previous`
    ///
    /// The live spec is re-applied with the owner metadata and the skip
    /// policy, without force so fields owned by other managers are untouched.
    /// Resources that no longer exist are skipped.
    #[instrument(skip_all, fields(owner = %self.owner.name))]
    pub async fn pause(&self, previous: &[ResourceStatus]) -> Result<(), ReconcileError> {
        for status in previous {
            let ar = api_resource_of_status(status);
            let mut obj = DynamicObject::new(&status.name, &ar);
            mutators::pause(&mut obj)?;

            let live = self
                .client
                .get(&ar, &self.namespace, &status.name)
                .await
                .map_err(|e| {
                    ReconcileError::from(e).wrap(&format!("get {} {}", status.kind, status.name))
                })?;
            let Some(live) = live else {
                debug!(kind = %status.kind, name = %status.name, "Resource gone, nothing to pause");
                continue;
            };
            if let Some(spec) = live.data.get("spec") {
                obj.data["spec"] = spec.clone();
            }
            self.prepare(&mut obj);

            self.client
                .apply(&obj, &ar, false)
                .await
                .map_err(|e| {
                    ReconcileError::from(e).wrap(&format!("pause {} {}", status.kind, status.name))
                })?;
        }
        Ok(())
    }

    /// Delete every resource in `previous`
    ///
    /// Returns the resources that still exist. An empty list means the owner
    /// may drop its finalizer.
    #[instrument(skip_all, fields(owner = %self.owner.name))]
    pub async fn delete(
        &self,
        previous: &[ResourceStatus],
    ) -> Result<Vec<ResourceStatus>, ReconcileError> {
        let mut residual = Vec::new();
        for status in previous {
            if self.delete_one(status).await? {
                residual.push(ResourceStatus {
                    ready: false,
                    ..status.clone()
                });
            }
        }
        Ok(residual)
    }

    /// Returns whether the resource still exists
    async fn delete_one(&self, status: &ResourceStatus) -> Result<bool, ReconcileError> {
        let ar = api_resource_of_status(status);
        let outcome = self
            .client
            .delete(&ar, &self.namespace, &status.name)
            .await
            .map_err(|e| {
                ReconcileError::from(e).wrap(&format!("delete {} {}", status.kind, status.name))
            })?;
        if outcome != DeleteOutcome::NotFound {
            info!(kind = %status.kind, name = %status.name, outcome = ?outcome, "Deleted ASO resource");
        }
        Ok(outcome.still_exists())
    }

    fn prepare(&self, obj: &mut DynamicObject) {
        mutators::strip_server_fields(obj);
        obj.metadata.namespace = Some(self.namespace.clone());
        mutators::set_owner_reference(obj, &self.owner);
        mutators::set_cluster_label(obj, &self.cluster_name);
        if let Some(secret) = &self.credential_secret {
            mutators::set_credential_from(obj, secret);
        }
    }
}

/// Keys of a status list
pub fn keys(statuses: &[ResourceStatus]) -> HashSet<ResourceKey> {
    statuses.iter().map(ResourceStatus::key).collect()
}
