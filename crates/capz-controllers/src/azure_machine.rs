//! AzureMachine controller
//!
//! A machine is only reconciled once its cluster's infrastructure is ready
//! and the bootstrap provider produced data. After the VM services succeed
//! the provider ID, addresses and VM state are copied from Azure onto the
//! AzureMachine.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{error, info, instrument};

use capz_common::crd::{
    set_condition, AzureMachine, Condition, ConditionSeverity, VM_RUNNING_CONDITION,
};
use capz_common::events::reasons;
use capz_common::kube_utils::find_owner_ref;
use capz_common::{Error, ReconcileError, CAPI_GROUP, CLUSTER_NAME_LABEL};
use capz_services::MachineScope;

use crate::context::Context;
use crate::credentials::CredentialRequest;
use crate::kube_client::InfraKind;
use crate::lifecycle::{self, Phase, Target};

/// VMRunning reason while the cluster's infrastructure is provisioning
pub const WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON: &str = "WaitingForClusterInfrastructure";

/// VMRunning reason until the bootstrap provider set the data secret
pub const WAITING_FOR_BOOTSTRAP_DATA_REASON: &str = "WaitingForBootstrapData";

/// Key of the bootstrap data in the Machine's data secret
pub const BOOTSTRAP_DATA_KEY: &str = "value";

/// ASO provisioning state of a running VM
const VM_SUCCEEDED_STATE: &str = "Succeeded";

/// Reconcile an AzureMachine
#[instrument(skip(obj, ctx), fields(azure_machine = %obj.name_any()))]
pub async fn reconcile(obj: Arc<AzureMachine>, ctx: Arc<Context>) -> Result<Action, Error> {
    reconcile_inner(&obj, &ctx).await
}

async fn reconcile_inner(obj: &AzureMachine, ctx: &Context) -> Result<Action, Error> {
    let mut target = Target::of(InfraKind::AzureMachine, obj)?;
    if obj.meta().deletion_timestamp.is_some() && !target.has_finalizer {
        return Ok(Action::await_change());
    }

    let Some(owner) = find_owner_ref(obj.meta(), CAPI_GROUP, "Machine") else {
        info!("Waiting for Machine controller to set OwnerRef on AzureMachine");
        return Ok(Action::await_change());
    };
    let Some(machine) = ctx.kube.get_machine(&target.namespace, &owner.name).await? else {
        info!(machine = %owner.name, "Owner Machine not found");
        return Ok(Action::await_change());
    };

    let cluster_name = obj
        .labels()
        .get(CLUSTER_NAME_LABEL)
        .cloned()
        .unwrap_or_else(|| machine.spec.cluster_name.clone());
    let Some(cluster) = ctx.kube.get_cluster(&target.namespace, &cluster_name).await? else {
        info!(cluster = %cluster_name, "Machine is missing its Cluster");
        return Ok(Action::await_change());
    };
    let azure_cluster_name = cluster
        .spec
        .infrastructure_ref
        .as_ref()
        .and_then(|r| r.name.clone())
        .unwrap_or_else(|| cluster_name.clone());
    let Some(azure_cluster) = ctx
        .kube
        .get_azure_cluster(&target.namespace, &azure_cluster_name)
        .await?
    else {
        info!(azure_cluster = %azure_cluster_name, "AzureCluster not found yet");
        return Ok(Action::requeue(ctx.requeue_after));
    };

    let phase = Phase::of(obj, &cluster);
    if phase == Phase::Normal && has_failed(obj) {
        info!("AzureMachine has failed, waiting for remediation");
        return Ok(Action::await_change());
    }

    let credentials = lifecycle::resolve_credentials(
        ctx,
        &target,
        CredentialRequest {
            identity: azure_cluster.spec.identity_ref.as_ref(),
            namespace: &target.namespace,
            cluster_name: &cluster_name,
            subscription_id: &azure_cluster.spec.subscription_id,
            owner: lifecycle::secret_owner(&cluster)?,
        },
    )
    .await?;

    let infrastructure_ready = cluster.infrastructure_ready();
    let bootstrap_secret = machine.bootstrap_secret_name().map(str::to_string);
    let mut scope = MachineScope::new(
        cluster,
        machine,
        obj.clone(),
        &azure_cluster.spec,
        ctx.handles(credentials),
    )?;

    if phase == Phase::Normal {
        lifecycle::ensure_finalizer(ctx, &target).await?;
        target.has_finalizer = true;

        if !infrastructure_ready {
            return wait_for(ctx, &target, &scope, WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON).await;
        }
        let data = match bootstrap_secret {
            Some(secret) => bootstrap_data(ctx, &target.namespace, &secret).await?,
            None => None,
        };
        match data {
            Some(data) => scope = scope.with_bootstrap_data(data),
            None => return wait_for(ctx, &target, &scope, WAITING_FOR_BOOTSTRAP_DATA_REASON).await,
        }
    }

    let scope = Arc::new(scope);
    let orchestrator = (ctx.orchestrators.machine)(scope.clone());
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
                reasons::VM_READY,
                || report(ctx, &target, scope.as_ref()),
            )
            .await
        }
    }
}

fn has_failed(obj: &AzureMachine) -> bool {
    obj.status
        .as_ref()
        .is_some_and(|s| s.failure_reason.is_some())
}

/// Raw bootstrap data, `None` while the secret doesn't exist
async fn bootstrap_data(
    ctx: &Context,
    namespace: &str,
    secret: &str,
) -> Result<Option<Vec<u8>>, Error> {
    let Some(secret_obj) = ctx.kube.get_secret(namespace, secret).await? else {
        return Ok(None);
    };
    secret_obj
        .data
        .as_ref()
        .and_then(|d| d.get(BOOTSTRAP_DATA_KEY))
        .map(|v| Some(v.0.clone()))
        .ok_or_else(|| {
            Error::validation_for(
                secret,
                format!("bootstrap data secret has no key {BOOTSTRAP_DATA_KEY}"),
            )
        })
}

async fn wait_for(
    ctx: &Context,
    target: &Target,
    scope: &MachineScope,
    reason: &str,
) -> Result<Action, Error> {
    info!(reason, "Waiting before creating the VM");
    scope.update_status(|status| {
        set_condition(
            &mut status.conditions,
            Condition::false_(VM_RUNNING_CONDITION, reason, ConditionSeverity::Info, ""),
        );
    });
    lifecycle::flush(ctx, target, scope).await?;
    Ok(Action::requeue(ctx.requeue_after))
}

/// Copy what Azure assigned to the VM onto the AzureMachine
async fn report(ctx: &Context, target: &Target, scope: &MachineScope) -> Result<(), ReconcileError> {
    let vm = scope.observe_vm().await?;
    let Some(provider_id) = vm.provider_id else {
        return Err(ReconcileError::transient(
            "waiting for the VM to be assigned an ID",
            ctx.requeue_after,
        ));
    };
    if scope.provider_id() != Some(provider_id.as_str()) {
        ctx.kube
            .patch_spec(
                target.kind,
                &target.namespace,
                &target.name,
                &serde_json::json!({ "providerID": provider_id }),
            )
            .await?;
        info!(provider_id = %provider_id, "Set provider ID");
    }

    let state = vm.state.unwrap_or_default();
    let running = state == VM_SUCCEEDED_STATE;
    scope.update_status(|status| {
        status.addresses = vm.addresses;
        status.vm_state = Some(state.clone());
        let condition = if running {
            Condition::true_(VM_RUNNING_CONDITION)
        } else {
            Condition::false_(
                VM_RUNNING_CONDITION,
                state.as_str(),
                ConditionSeverity::Info,
                "",
            )
        };
        set_condition(&mut status.conditions, condition);
    });
    if !running {
        return Err(ReconcileError::transient(
            format!("VM provisioning state is {state:?}"),
            ctx.requeue_after,
        ));
    }
    Ok(())
}

/// Error policy for the AzureMachine controller
pub fn error_policy(obj: Arc<AzureMachine>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        azure_machine = %obj.name_any(),
        "AzureMachine reconciliation failed"
    );
    lifecycle::requeue_on_error(error, &ctx)
}
