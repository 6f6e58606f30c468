//! AzureManagedControlPlane controller
//!
//! Reconciles an AKS cluster and reports its API server FQDN, running
//! version and whether the kubeconfig secret exists.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{error, info, instrument};

use capz_common::crd::{ApiEndpoint, AzureManagedControlPlane};
use capz_common::events::reasons;
use capz_common::{Error, ReconcileError};
use capz_services::{AsoScope, ManagedControlPlaneScope};

use crate::context::Context;
use crate::credentials::CredentialRequest;
use crate::kube_client::InfraKind;
use crate::lifecycle::{self, Phase, Target};

/// Port of the AKS API server
pub const MANAGED_API_SERVER_PORT: i32 = 443;

/// Name of the kubeconfig secret of a cluster
pub fn kubeconfig_secret_name(cluster: &str) -> String {
    format!("{cluster}-kubeconfig")
}

/// Reconcile an AzureManagedControlPlane
#[instrument(skip(obj, ctx), fields(control_plane = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<AzureManagedControlPlane>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    reconcile_inner(&obj, &ctx).await
}

async fn reconcile_inner(obj: &AzureManagedControlPlane, ctx: &Context) -> Result<Action, Error> {
    let target = Target::of(InfraKind::AzureManagedControlPlane, obj)?;
    if obj.meta().deletion_timestamp.is_some() && !target.has_finalizer {
        return Ok(Action::await_change());
    }

    let Some(cluster) = lifecycle::owner_cluster(ctx, obj, &target.namespace).await? else {
        info!("Waiting for Cluster controller to set OwnerRef on AzureManagedControlPlane");
        return Ok(Action::await_change());
    };
    let phase = Phase::of(obj, &cluster);

    let credentials = lifecycle::resolve_credentials(
        ctx,
        &target,
        CredentialRequest {
            identity: obj.spec.identity_ref.as_ref(),
            namespace: &target.namespace,
            cluster_name: &cluster.name_any(),
            subscription_id: &obj.spec.subscription_id,
            owner: lifecycle::secret_owner(&cluster)?,
        },
    )
    .await?;

    let scope = Arc::new(ManagedControlPlaneScope::new(
        cluster,
        obj.clone(),
        ctx.handles(credentials),
    )?);
    let orchestrator = (ctx.orchestrators.managed_control_plane)(scope.clone());

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
                || report(ctx, &target, scope.as_ref()),
            )
            .await
        }
    }
}

async fn report(
    ctx: &Context,
    target: &Target,
    scope: &ManagedControlPlaneScope,
) -> Result<(), ReconcileError> {
    let observed = scope.observe_managed_cluster().await?;
    let Some(fqdn) = observed.fqdn else {
        return Err(ReconcileError::transient(
            "waiting for the AKS API server FQDN",
            ctx.requeue_after,
        ));
    };

    let endpoint = ApiEndpoint {
        host: fqdn,
        port: MANAGED_API_SERVER_PORT,
    };
    if scope.control_plane().spec.control_plane_endpoint.as_ref() != Some(&endpoint) {
        ctx.kube
            .patch_spec(
                target.kind,
                &target.namespace,
                &target.name,
                &serde_json::json!({ "controlPlaneEndpoint": endpoint }),
            )
            .await?;
        info!(host = %endpoint.host, "Set control plane endpoint");
    }

    let initialized = ctx
        .kube
        .get_secret(
            &target.namespace,
            &kubeconfig_secret_name(scope.cluster_name()),
        )
        .await?
        .is_some();
    scope.update_status(|status| {
        status.version = observed.current_version;
        status.initialized = initialized;
    });
    Ok(())
}

/// Error policy for the AzureManagedControlPlane controller
pub fn error_policy(obj: Arc<AzureManagedControlPlane>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        control_plane = %obj.name_any(),
        "AzureManagedControlPlane reconciliation failed"
    );
    lifecycle::requeue_on_error(error, &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    use capz_common::crd::{AzureManagedControlPlaneStatus, PROVISIONING_REASON};

    use crate::context::DEFAULT_SYNC_PERIOD;
    use crate::testing::{capi_cluster, control_plane, reconciling, with_finalizer, Harness};

    fn seeded(h: &Harness) -> Arc<AzureManagedControlPlane> {
        h.kube.add_cluster(capi_cluster("prod"));
        Arc::new(with_finalizer(
            control_plane("prod"),
            InfraKind::AzureManagedControlPlane,
        ))
    }

    fn aks_running(h: &Harness) {
        h.aso.insert(
            "ManagedCluster",
            "prod",
            serde_json::json!({"status": {
                "fqdn": "prod-dns.hcp.eastus.azmk8s.io",
                "currentKubernetesVersion": "1.29.2"
            }}),
        );
    }

    /// Story: A provisioned AKS cluster reports its endpoint and version.
    #[tokio::test]
    async fn story_aks_cluster_reports_endpoint_and_version() {
        let h = Harness::new(reconciling(|| Ok(())));
        let obj = seeded(&h);
        aks_running(&h);

        let action = reconcile(obj, h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_SYNC_PERIOD));
        assert_eq!(
            h.kube.specs(),
            vec![serde_json::json!({
                "controlPlaneEndpoint": {"host": "prod-dns.hcp.eastus.azmk8s.io", "port": 443}
            })]
        );
        let status: AzureManagedControlPlaneStatus = h.kube.last_status();
        assert!(status.ready);
        assert_eq!(status.version.as_deref(), Some("1.29.2"));
        assert!(!status.initialized);
    }

    /// Story: The control plane is initialized once the kubeconfig exists.
    #[tokio::test]
    async fn story_kubeconfig_marks_initialized() {
        let h = Harness::new(reconciling(|| Ok(())));
        let obj = seeded(&h);
        aks_running(&h);
        h.kube.add_secret("prod-kubeconfig", "value", b"apiVersion: v1");

        reconcile(obj, h.ctx.clone()).await.unwrap();

        let status: AzureManagedControlPlaneStatus = h.kube.last_status();
        assert!(status.initialized);
    }

    /// Story: An unchanged endpoint is not patched again.
    #[tokio::test]
    async fn story_unchanged_endpoint_is_not_patched() {
        let h = Harness::new(reconciling(|| Ok(())));
        let mut obj = (*seeded(&h)).clone();
        obj.spec.control_plane_endpoint = Some(ApiEndpoint {
            host: "prod-dns.hcp.eastus.azmk8s.io".to_string(),
            port: 443,
        });
        aks_running(&h);

        reconcile(Arc::new(obj), h.ctx.clone()).await.unwrap();

        assert!(h.kube.specs().is_empty());
    }

    /// Story: Until AKS reports an FQDN, the control plane keeps polling.
    #[tokio::test]
    async fn story_missing_fqdn_keeps_polling() {
        let h = Harness::new(reconciling(|| Ok(())));
        let obj = seeded(&h);

        let action = reconcile(obj, h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(h.ctx.requeue_after));
        let status: AzureManagedControlPlaneStatus = h.kube.last_status();
        let ready =
            capz_common::crd::get_condition(&status.conditions, capz_common::crd::READY_CONDITION)
                .unwrap();
        assert_eq!(ready.reason, PROVISIONING_REASON);
    }
}
