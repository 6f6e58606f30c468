//! AzureCluster controller
//!
//! Provisions the network infrastructure of a self-managed cluster through
//! [`AzureClusterService`](capz_services::AzureClusterService) and reports the
//! API server endpoint back to Cluster API once Azure assigned an address.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{error, info, instrument};

use capz_common::crd::{
    set_condition, ApiEndpoint, AzureCluster, Condition, API_SERVER_PORT,
    NETWORK_INFRASTRUCTURE_READY_CONDITION,
};
use capz_common::events::reasons;
use capz_common::{Error, ReconcileError};
use capz_services::ClusterScope;

use crate::context::Context;
use crate::credentials::CredentialRequest;
use crate::kube_client::InfraKind;
use crate::lifecycle::{self, Phase, Target};

/// Reconcile an AzureCluster
#[instrument(skip(obj, ctx), fields(azure_cluster = %obj.name_any()))]
pub async fn reconcile(obj: Arc<AzureCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    reconcile_inner(&obj, &ctx).await
}

async fn reconcile_inner(obj: &AzureCluster, ctx: &Context) -> Result<Action, Error> {
    let target = Target::of(InfraKind::AzureCluster, obj)?;
    if obj.meta().deletion_timestamp.is_some() && !target.has_finalizer {
        return Ok(Action::await_change());
    }

    let Some(cluster) = lifecycle::owner_cluster(ctx, obj, &target.namespace).await? else {
        info!("Waiting for Cluster controller to set OwnerRef on AzureCluster");
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

    let scope = Arc::new(ClusterScope::new(
        cluster,
        obj.clone(),
        ctx.handles(credentials),
    )?);
    let orchestrator = (ctx.orchestrators.cluster)(scope.clone());

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

/// Mark the network ready and publish the API server endpoint
async fn report(ctx: &Context, target: &Target, scope: &ClusterScope) -> Result<(), ReconcileError> {
    scope.update_status(|status| {
        set_condition(
            &mut status.conditions,
            Condition::true_(NETWORK_INFRASTRUCTURE_READY_CONDITION),
        );
    });

    let endpoint_set = scope
        .azure_cluster()
        .spec
        .control_plane_endpoint
        .as_ref()
        .is_some_and(|e| !e.is_zero());
    if endpoint_set {
        return Ok(());
    }

    let Some(host) = scope.api_server_address().await? else {
        return Err(ReconcileError::transient(
            "waiting for the API server address",
            ctx.requeue_after,
        ));
    };
    let endpoint = ApiEndpoint {
        host,
        port: API_SERVER_PORT,
    };
    ctx.kube
        .patch_spec(
            target.kind,
            &target.namespace,
            &target.name,
            &serde_json::json!({ "controlPlaneEndpoint": endpoint }),
        )
        .await?;
    info!(host = %endpoint.host, port = endpoint.port, "Set control plane endpoint");
    Ok(())
}

/// Error policy for the AzureCluster controller
pub fn error_policy(obj: Arc<AzureCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        azure_cluster = %obj.name_any(),
        "AzureCluster reconciliation failed"
    );
    lifecycle::requeue_on_error(error, &ctx)
}
