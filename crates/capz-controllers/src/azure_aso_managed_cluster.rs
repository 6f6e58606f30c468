//! AzureASOManagedCluster controller
//!
//! The cluster is described as raw ASO manifests. They are applied as-is
//! through the resource engine, tracked in `status.resources`, and pruned
//! when they disappear from the spec.

use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{error, info, instrument};

use capz_common::crd::AzureASOManagedCluster;
use capz_common::events::reasons;
use capz_common::{Error, ReconcileError};
use capz_services::{AsoManagedClusterScope, AsoScope, Orchestrator};

use crate::context::Context;
use crate::credentials::CredentialRequest;
use crate::kube_client::InfraKind;
use crate::lifecycle::{self, Phase, Target};

/// Orchestrator over the user's manifests
///
/// There is no fixed service list here: the manifests are the services.
pub struct AsoResourcesOrchestrator {
    scope: Arc<AsoManagedClusterScope>,
}

impl AsoResourcesOrchestrator {
    pub fn new(scope: Arc<AsoManagedClusterScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Orchestrator for AsoResourcesOrchestrator {
    async fn reconcile(&self) -> Result<(), ReconcileError> {
        let desired = self.scope.desired_resources()?;
        let previous = self.scope.resource_statuses();
        let applied = self.scope.engine().reconcile(desired, &previous).await?;

        let pending: Vec<String> = applied
            .statuses
            .iter()
            .filter(|s| !s.ready)
            .map(|s| format!("{}/{}", s.kind, s.name))
            .collect();
        let failures = applied.failures.join("; ");
        self.scope.set_resource_statuses(applied.statuses);
        if !failures.is_empty() {
            return Err(ReconcileError::transient(
                format!("ASO reported failures: {failures}"),
                self.scope.requeue_after(),
            ));
        }
        if !pending.is_empty() {
            return Err(ReconcileError::transient(
                format!("waiting for {}", pending.join(", ")),
                self.scope.requeue_after(),
            ));
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), ReconcileError> {
        self.scope
            .engine()
            .pause(&self.scope.resource_statuses())
            .await
    }

    async fn delete(&self) -> Result<(), ReconcileError> {
        let residual = self
            .scope
            .engine()
            .delete(&self.scope.resource_statuses())
            .await?;
        self.scope.set_resource_statuses(residual);
        Ok(())
    }
}

/// Reconcile an AzureASOManagedCluster
#[instrument(skip(obj, ctx), fields(aso_managed_cluster = %obj.name_any()))]
pub async fn reconcile(obj: Arc<AzureASOManagedCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    reconcile_inner(&obj, &ctx).await
}

async fn reconcile_inner(obj: &AzureASOManagedCluster, ctx: &Context) -> Result<Action, Error> {
    let target = Target::of(InfraKind::AzureASOManagedCluster, obj)?;
    if obj.meta().deletion_timestamp.is_some() && !target.has_finalizer {
        return Ok(Action::await_change());
    }

    let Some(cluster) = lifecycle::owner_cluster(ctx, obj, &target.namespace).await? else {
        info!("Waiting for Cluster controller to set OwnerRef on AzureASOManagedCluster");
        return Ok(Action::await_change());
    };
    let phase = Phase::of(obj, &cluster);

    // Manifests name their own credentials; the global one is the fallback
    let credentials = lifecycle::resolve_credentials(
        ctx,
        &target,
        CredentialRequest {
            identity: None,
            namespace: &target.namespace,
            cluster_name: &cluster.name_any(),
            subscription_id: "",
            owner: lifecycle::secret_owner(&cluster)?,
        },
    )
    .await?;

    let scope = Arc::new(AsoManagedClusterScope::new(
        cluster,
        obj.clone(),
        ctx.handles(credentials),
    )?);
    let orchestrator = (ctx.orchestrators.aso_managed_cluster)(scope.clone());

    match phase {
        Phase::Paused => {
            lifecycle::pause(ctx, &target, scope.as_ref(), orchestrator.as_ref()).await
        }
        Phase::Deleting => {
            lifecycle::delete(ctx, &target, scope.as_ref(), orchestrator.as_ref()).await
        }
        Phase::Normal => {
            lifecycle::reconcile_normal(
                ctx,
                &target,
                scope.as_ref(),
                orchestrator.as_ref(),
                reasons::INFRASTRUCTURE_READY,
                || async { Ok(()) },
            )
            .await
        }
    }
}

/// Error policy for the AzureASOManagedCluster controller
pub fn error_policy(obj: Arc<AzureASOManagedCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        aso_managed_cluster = %obj.name_any(),
        "AzureASOManagedCluster reconciliation failed"
    );
    lifecycle::requeue_on_error(error, &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    use capz_aso::reconciler::INVALID_RESOURCE_REASON;
    use capz_common::crd::{
        get_condition, AzureASOManagedClusterStatus, ResourceStatus, READY_CONDITION,
    };
    use capz_services::StaticZoneResolver;

    use crate::context::{Orchestrators, DEFAULT_SYNC_PERIOD};
    use crate::testing::{
        aso_managed_cluster, capi_cluster, deleting, resource_group, with_finalizer, FakeKube,
        Harness,
    };

    fn harness() -> Harness {
        let h = Harness::build(
            FakeKube::new(),
            Orchestrators::new(Arc::new(StaticZoneResolver::default())),
        );
        h.kube.add_cluster(capi_cluster("prod"));
        h
    }

    fn object(resources: Vec<serde_json::Value>) -> AzureASOManagedCluster {
        with_finalizer(
            aso_managed_cluster("prod", resources),
            InfraKind::AzureASOManagedCluster,
        )
    }

    fn tracked(name: &str) -> ResourceStatus {
        ResourceStatus {
            group: "resources.azure.com".to_string(),
            version: "v1api20200601".to_string(),
            kind: "ResourceGroup".to_string(),
            name: name.to_string(),
            ready: true,
        }
    }

    fn with_tracked(mut obj: AzureASOManagedCluster, names: &[&str]) -> AzureASOManagedCluster {
        obj.status = Some(AzureASOManagedClusterStatus {
            resources: names.iter().map(|n| tracked(n)).collect(),
            ..Default::default()
        });
        obj
    }

    // =========================================================================
    // Apply and prune
    // =========================================================================

    /// Story: Every manifest is applied and tracked; once all are ready the
    /// cluster is ready.
    #[tokio::test]
    async fn story_manifests_are_applied_and_tracked() {
        let h = harness();
        let obj = object(vec![resource_group("prod-rg")]);

        let action = reconcile(Arc::new(obj), h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_SYNC_PERIOD));
        assert_eq!(h.aso.applied(), vec!["ResourceGroup/prod-rg"]);
        let status: AzureASOManagedClusterStatus = h.kube.last_status();
        assert!(status.ready);
        assert_eq!(status.resources, vec![tracked("prod-rg")]);
    }

    /// Story: A manifest ASO hasn't finished keeps the cluster polling.
    #[tokio::test]
    async fn story_unready_manifest_keeps_polling() {
        let h = harness();
        h.aso.not_ready.lock().push("prod-rg".to_string());

        let action = reconcile(
            Arc::new(object(vec![resource_group("prod-rg")])),
            h.ctx.clone(),
        )
        .await
        .unwrap();

        assert_eq!(action, Action::requeue(h.ctx.requeue_after));
        let status: AzureASOManagedClusterStatus = h.kube.last_status();
        assert!(!status.ready);
        assert_eq!(status.resources.len(), 1);
        assert!(!status.resources[0].ready);
    }

    /// Story: A manifest removed from the spec is deleted from Azure.
    #[tokio::test]
    async fn story_removed_manifest_is_pruned() {
        let h = harness();
        h.aso.insert("ResourceGroup", "old-rg", serde_json::json!({}));
        let obj = with_tracked(object(vec![resource_group("prod-rg")]), &["old-rg"]);

        reconcile(Arc::new(obj), h.ctx.clone()).await.unwrap();

        assert_eq!(h.aso.deleted(), vec!["ResourceGroup/old-rg"]);
        let status: AzureASOManagedClusterStatus = h.kube.last_status();
        assert_eq!(status.resources, vec![tracked("prod-rg")]);
    }

    /// Story: While one manifest is failing in Azure, manifests removed from
    /// the spec are still pruned and the failure is kept on status.
    #[tokio::test]
    async fn story_failed_manifest_does_not_block_pruning() {
        let h = harness();
        h.aso.failed.lock().push("prod-rg".to_string());
        h.aso.insert("ResourceGroup", "old-rg", serde_json::json!({}));
        let obj = with_tracked(
            object(vec![resource_group("prod-rg")]),
            &["prod-rg", "old-rg"],
        );

        let action = reconcile(Arc::new(obj), h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(h.ctx.requeue_after));
        assert_eq!(h.aso.deleted(), vec!["ResourceGroup/old-rg"]);
        let status: AzureASOManagedClusterStatus = h.kube.last_status();
        assert!(!status.ready);
        assert_eq!(
            status.resources,
            vec![ResourceStatus {
                ready: false,
                ..tracked("prod-rg")
            }]
        );
        let ready = get_condition(&status.conditions, READY_CONDITION).unwrap();
        assert!(ready.message.contains("ResourceGroup/prod-rg: BadRequest"));
    }

    /// Story: A manifest that isn't a Kubernetes object can't succeed until
    /// the spec changes.
    #[tokio::test]
    async fn story_invalid_manifest_is_terminal() {
        let h = harness();
        let obj = object(vec![serde_json::json!("not an object")]);

        let action = reconcile(Arc::new(obj), h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        let status: AzureASOManagedClusterStatus = h.kube.last_status();
        let ready = get_condition(&status.conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.reason, INVALID_RESOURCE_REASON);
        assert_eq!(h.events.warnings(), vec![reasons::RECONCILE_TERMINAL]);
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Story: Resources ASO is still deleting hold the finalizer.
    #[tokio::test]
    async fn story_residual_resources_keep_finalizer() {
        let h = harness();
        h.aso.insert("ResourceGroup", "prod-rg", serde_json::json!({}));
        h.aso.slow_delete.lock().push("prod-rg".to_string());
        let obj = deleting(with_tracked(object(vec![]), &["prod-rg"]));

        let action = reconcile(Arc::new(obj), h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(h.ctx.requeue_after));
        let status: AzureASOManagedClusterStatus = h.kube.last_status();
        assert_eq!(status.resources.len(), 1);
        assert!(!h
            .kube
            .calls()
            .iter()
            .any(|c| c.starts_with("remove_finalizer")));
    }

    /// Story: Once every resource is gone the finalizer is released.
    #[tokio::test]
    async fn story_finalizer_released_when_everything_is_gone() {
        let h = harness();
        h.aso.insert("ResourceGroup", "prod-rg", serde_json::json!({}));
        let obj = deleting(with_tracked(object(vec![]), &["prod-rg"]));

        let action = reconcile(Arc::new(obj), h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(h.aso.deleted(), vec!["ResourceGroup/prod-rg"]);
        assert_eq!(
            h.kube.calls().last().map(String::as_str),
            Some("remove_finalizer:AzureASOManagedCluster/prod")
        );
    }

    // =========================================================================
    // Pause
    // =========================================================================

    /// Story: Pausing marks every tracked resource for ASO to skip while
    /// keeping its spec and ownership.
    #[tokio::test]
    async fn story_pause_applies_skip_policy() {
        let h = harness();
        h.kube.add_cluster(crate::testing::paused_cluster("prod"));
        h.aso.insert(
            "ResourceGroup",
            "prod-rg",
            serde_json::json!({"spec": {"location": "eastus"}}),
        );
        let obj = with_tracked(object(vec![resource_group("prod-rg")]), &["prod-rg"]);

        let action = reconcile(Arc::new(obj), h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(h.aso.applied(), vec!["ResourceGroup/prod-rg"]);
        assert_eq!(h.events.reasons(), vec![reasons::PAUSED]);

        let paused = h.aso.objects.lock()[&("ResourceGroup".to_string(), "prod-rg".to_string())].clone();
        assert_eq!(
            paused.annotations().get(capz_common::RECONCILE_POLICY_ANNOTATION).map(String::as_str),
            Some(capz_common::RECONCILE_POLICY_SKIP)
        );
        assert_eq!(paused.data["spec"], serde_json::json!({"location": "eastus"}));
        assert_eq!(paused.owner_references()[0].kind, "AzureASOManagedCluster");
    }

    /// Story: A tracked resource that is already gone isn't recreated by pause.
    #[tokio::test]
    async fn story_pause_skips_missing_resource() {
        let h = harness();
        h.kube.add_cluster(crate::testing::paused_cluster("prod"));
        let obj = with_tracked(object(vec![resource_group("prod-rg")]), &["prod-rg"]);

        let action = reconcile(Arc::new(obj), h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(h.aso.applied().is_empty());
    }
}
