//! Pause, delete and normal reconcile shared by every infrastructure kind
//!
//! A controller fetches its object and owners, builds a scope and an
//! orchestrator, then hands off to one of [`pause`], [`delete`] or
//! [`reconcile_normal`]. Those run the orchestrator, classify the failure,
//! record conditions and events, flush the status buffer and decide the
//! requeue.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use capz_common::crd::{
    get_condition, set_condition, AzureASOManagedClusterStatus, AzureClusterStatus,
    AzureMachineStatus, AzureManagedControlPlaneStatus, Cluster, Condition, ConditionSeverity,
    DELETING_REASON, PAUSED_REASON, PROVISIONING_REASON, READY_CONDITION,
    RESOURCES_READY_CONDITION, UPDATE_ERROR_FAILURE_REASON,
};
use capz_common::events::{actions, reasons};
use capz_common::kube_utils::{find_owner_ref, has_finalizer, is_paused};
use capz_common::{Error, ReconcileError, CAPI_GROUP};
use capz_services::scope::namespace_of;
use capz_services::{
    AsoManagedClusterScope, AsoScope, AzureCredentials, ClusterScope, MachineScope,
    ManagedControlPlaneScope, Orchestrator,
};

use crate::context::Context;
use crate::credentials::CredentialRequest;
use crate::kube_client::InfraKind;
use crate::outcome::ReconcileOutcome;

/// Delay before retrying a reconcile that failed with a retryable error
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Which path a reconcile takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Paused,
    Deleting,
    Normal,
}

impl Phase {
    /// Pause wins over deletion: a paused object is left alone entirely
    pub fn of<K: Resource>(obj: &K, cluster: &Cluster) -> Self {
        if is_paused(obj, Some(cluster)) {
            Self::Paused
        } else if obj.meta().deletion_timestamp.is_some() {
            Self::Deleting
        } else {
            Self::Normal
        }
    }
}

// =============================================================================
// Status access
// =============================================================================

/// Status fields the lifecycle writes, common to every kind
pub trait InfraStatus: Serialize + Send {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
    fn is_ready(&self) -> bool;
    fn set_ready(&mut self, ready: bool);

    /// Record a permanent failure for remediation; only machines have one
    fn record_failure(&mut self, _reason: &str, _message: &str) {}
}

macro_rules! infra_status {
    () => {
        fn conditions(&self) -> &[Condition] {
            &self.conditions
        }

        fn conditions_mut(&mut self) -> &mut Vec<Condition> {
            &mut self.conditions
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        fn set_ready(&mut self, ready: bool) {
            self.ready = ready;
        }
    };
}

impl InfraStatus for AzureClusterStatus {
    infra_status!();
}

impl InfraStatus for AzureManagedControlPlaneStatus {
    infra_status!();
}

impl InfraStatus for AzureASOManagedClusterStatus {
    infra_status!();
}

impl InfraStatus for AzureMachineStatus {
    infra_status!();

    fn record_failure(&mut self, reason: &str, message: &str) {
        self.failure_reason = Some(reason.to_string());
        self.failure_message = Some(message.to_string());
    }
}

/// A scope whose status buffer the lifecycle updates and flushes
pub trait StatusScope: AsoScope {
    type Status: InfraStatus;

    fn snapshot(&self) -> Self::Status;
    fn modify(&self, f: impl FnOnce(&mut Self::Status));
}

macro_rules! status_scope {
    ($scope:ty, $status:ty) => {
        impl StatusScope for $scope {
            type Status = $status;

            fn snapshot(&self) -> $status {
                self.status()
            }

            fn modify(&self, f: impl FnOnce(&mut $status)) {
                self.update_status(f)
            }
        }
    };
}

status_scope!(ClusterScope, AzureClusterStatus);
status_scope!(MachineScope, AzureMachineStatus);
status_scope!(ManagedControlPlaneScope, AzureManagedControlPlaneStatus);
status_scope!(AsoManagedClusterScope, AzureASOManagedClusterStatus);

// =============================================================================
// Target object
// =============================================================================

/// The object being reconciled
#[derive(Debug, Clone)]
pub struct Target {
    pub kind: InfraKind,
    pub namespace: String,
    pub name: String,
    pub reference: ObjectReference,
    pub has_finalizer: bool,
}

impl Target {
    pub fn of<K>(kind: InfraKind, obj: &K) -> Result<Self, Error>
    where
        K: Resource<DynamicType = ()>,
    {
        Ok(Self {
            kind,
            namespace: namespace_of(obj)?,
            name: obj.name_any(),
            reference: obj.object_ref(&()),
            has_finalizer: has_finalizer(obj, &kind.finalizer()),
        })
    }
}

/// The Cluster API `Cluster` owning `obj`, once the owner reference is set
pub async fn owner_cluster<K: Resource>(
    ctx: &Context,
    obj: &K,
    namespace: &str,
) -> Result<Option<Cluster>, Error> {
    let Some(owner) = find_owner_ref(obj.meta(), CAPI_GROUP, "Cluster") else {
        return Ok(None);
    };
    ctx.kube.get_cluster(namespace, &owner.name).await
}

/// Owner of the cluster's ASO credential secret
pub fn secret_owner(cluster: &Cluster) -> Result<OwnerReference, Error> {
    cluster.owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context(
            "credentials",
            format!("Cluster {} has no uid", cluster.name_any()),
        )
    })
}

/// Resolve the owner's credentials, surfacing failures as a Warning event
pub async fn resolve_credentials(
    ctx: &Context,
    target: &Target,
    request: CredentialRequest<'_>,
) -> Result<AzureCredentials, Error> {
    match ctx.credentials.resolve(ctx.kube.as_ref(), request).await {
        Ok(credentials) => Ok(credentials),
        Err(e) => {
            warn!(kind = %target.kind, name = %target.name, error = %e, "Failed to resolve credentials");
            publish(
                ctx,
                target,
                EventType::Warning,
                reasons::CREDENTIALS_FAILED,
                actions::RECONCILE,
                e.to_string(),
            )
            .await;
            Err(e)
        }
    }
}

/// Bound the Azure-facing part of a reconcile by the configured deadline
///
/// An elapsed deadline becomes a retryable failure that the caller settles
/// like any other, so the status gathered so far is still written.
pub async fn with_deadline<F>(
    target: &Target,
    timeout: Duration,
    work: F,
) -> Result<(), ReconcileError>
where
    F: Future<Output = Result<(), ReconcileError>>,
{
    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(
            format!("reconcile {} {}", target.kind, target.name),
            timeout,
        )
        .into()),
    }
}

/// Requeue directive for a reconcile that returned an error
pub fn requeue_on_error(error: &Error, ctx: &Context) -> Action {
    if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE)
    } else {
        Action::requeue(ctx.sync_period)
    }
}

// =============================================================================
// Status and events
// =============================================================================

/// Write the scope's status buffer to the API server
pub async fn flush<S: StatusScope>(ctx: &Context, target: &Target, scope: &S) -> Result<(), Error> {
    let status = serde_json::to_value(scope.snapshot())
        .map_err(|e| Error::serialization_for_kind(target.kind.kind(), e.to_string()))?;
    ctx.kube
        .patch_status(target.kind, &target.namespace, &target.name, &status)
        .await
}

async fn publish(
    ctx: &Context,
    target: &Target,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&target.reference, type_, reason, action, Some(note))
        .await;
}

fn ready_reason<S: StatusScope>(scope: &S) -> Option<String> {
    get_condition(scope.snapshot().conditions(), READY_CONDITION).map(|c| c.reason.clone())
}

fn event_reason(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Terminal { .. } => reasons::RECONCILE_TERMINAL,
        ReconcileOutcome::VmDeleted(_) => reasons::VM_DELETED,
        ReconcileOutcome::Transient { .. } | ReconcileOutcome::Fatal(_) => reasons::RECONCILE_ERROR,
    }
}

/// Record a failed orchestrator call and turn it into the requeue directive
async fn settle_failure<S: StatusScope>(
    ctx: &Context,
    target: &Target,
    scope: &S,
    err: ReconcileError,
    action: &str,
    transient_reason: &str,
) -> Result<Action, Error> {
    let outcome = ReconcileOutcome::from(err);
    let reason = outcome.reason(transient_reason).to_string();
    let message = outcome.message();
    let severity = match outcome {
        ReconcileOutcome::Transient { .. } => ConditionSeverity::Info,
        ReconcileOutcome::Fatal(_) => ConditionSeverity::Warning,
        _ => ConditionSeverity::Error,
    };
    let vm_deleted = matches!(outcome, ReconcileOutcome::VmDeleted(_));

    scope.modify(|status| {
        set_condition(
            status.conditions_mut(),
            Condition::false_(READY_CONDITION, &reason, severity, &message),
        );
        if vm_deleted {
            status.set_ready(false);
            status.record_failure(UPDATE_ERROR_FAILURE_REASON, &message);
        }
    });
    flush(ctx, target, scope).await?;

    if outcome.is_warning() {
        warn!(kind = %target.kind, name = %target.name, reason = %reason, message = %message, "Reconcile failed");
        publish(ctx, target, EventType::Warning, event_reason(&outcome), action, message).await;
    } else {
        debug!(kind = %target.kind, name = %target.name, message = %message, "Waiting on Azure resources");
    }
    outcome.into_action()
}

// =============================================================================
// Paths
// =============================================================================

/// Add and persist the finalizer before any Azure resource is created
pub async fn ensure_finalizer(ctx: &Context, target: &Target) -> Result<(), Error> {
    if target.has_finalizer {
        return Ok(());
    }
    let finalizer = target.kind.finalizer();
    ctx.kube
        .add_finalizer(target.kind, &target.namespace, &target.name, &finalizer)
        .await?;
    info!(kind = %target.kind, name = %target.name, finalizer = %finalizer, "Added finalizer");
    Ok(())
}

/// Stop ASO from touching the owner's resources
pub async fn pause<S: StatusScope>(
    ctx: &Context,
    target: &Target,
    scope: &S,
    orchestrator: &dyn Orchestrator,
) -> Result<Action, Error> {
    if let Err(e) = with_deadline(target, ctx.reconcile_timeout, orchestrator.pause()).await {
        return settle_failure(ctx, target, scope, e, actions::PAUSE, PAUSED_REASON).await;
    }

    let was_paused = get_condition(scope.snapshot().conditions(), RESOURCES_READY_CONDITION)
        .is_some_and(|c| c.reason == PAUSED_REASON);
    scope.modify(|status| {
        set_condition(
            status.conditions_mut(),
            Condition::false_(
                RESOURCES_READY_CONDITION,
                PAUSED_REASON,
                ConditionSeverity::Info,
                "reconciliation is paused",
            ),
        );
    });
    flush(ctx, target, scope).await?;

    if !was_paused {
        info!(kind = %target.kind, name = %target.name, "Paused Azure resources");
        publish(
            ctx,
            target,
            EventType::Normal,
            reasons::PAUSED,
            actions::PAUSE,
            "Azure resources paused".to_string(),
        )
        .await;
    }
    Ok(Action::await_change())
}

/// Delete the owner's resources; drop the finalizer once none remain
pub async fn delete<S: StatusScope>(
    ctx: &Context,
    target: &Target,
    scope: &S,
    orchestrator: &dyn Orchestrator,
) -> Result<Action, Error> {
    if ready_reason(scope).as_deref() != Some(DELETING_REASON) {
        publish(
            ctx,
            target,
            EventType::Normal,
            reasons::DELETION_STARTED,
            actions::DELETE,
            format!("Deleting Azure resources of {} {}", target.kind, target.name),
        )
        .await;
    }

    if let Err(e) = with_deadline(target, ctx.reconcile_timeout, orchestrator.delete()).await {
        return settle_failure(ctx, target, scope, e, actions::DELETE, DELETING_REASON).await;
    }

    let remaining = scope.resource_statuses().len();
    let message = if remaining == 0 {
        "all Azure resources deleted".to_string()
    } else {
        format!("waiting for {remaining} Azure resources to be deleted")
    };
    scope.modify(|status| {
        status.set_ready(false);
        set_condition(
            status.conditions_mut(),
            Condition::false_(READY_CONDITION, DELETING_REASON, ConditionSeverity::Info, &message),
        );
    });
    flush(ctx, target, scope).await?;

    if remaining > 0 {
        debug!(kind = %target.kind, name = %target.name, remaining, "Resources still deleting");
        return Ok(Action::requeue(ctx.requeue_after));
    }

    ctx.kube
        .remove_finalizer(
            target.kind,
            &target.namespace,
            &target.name,
            &target.kind.finalizer(),
        )
        .await?;
    info!(kind = %target.kind, name = %target.name, "Deletion complete, finalizer removed");
    publish(
        ctx,
        target,
        EventType::Normal,
        reasons::DELETION_COMPLETE,
        actions::DELETE,
        message,
    )
    .await;
    Ok(Action::await_change())
}

/// Reconcile the owner's resources, then report kind-specific state
///
/// `report` runs only after every service succeeded; it reads what Azure
/// assigned (addresses, IDs, versions) into the object and may itself ask
/// to wait.
pub async fn reconcile_normal<S, F, Fut>(
    ctx: &Context,
    target: &Target,
    scope: &S,
    orchestrator: &dyn Orchestrator,
    ready_event: &str,
    report: F,
) -> Result<Action, Error>
where
    S: StatusScope,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), ReconcileError>>,
{
    ensure_finalizer(ctx, target).await?;

    let was_ready = scope.snapshot().is_ready();
    let work = async {
        orchestrator.reconcile().await?;
        report().await
    };
    if let Err(e) = with_deadline(target, ctx.reconcile_timeout, work).await {
        return settle_failure(ctx, target, scope, e, actions::RECONCILE, PROVISIONING_REASON).await;
    }

    scope.modify(|status| {
        status.set_ready(true);
        set_condition(status.conditions_mut(), Condition::true_(READY_CONDITION));
        set_condition(status.conditions_mut(), Condition::true_(RESOURCES_READY_CONDITION));
    });
    flush(ctx, target, scope).await?;

    if !was_ready {
        info!(kind = %target.kind, name = %target.name, "Azure resources ready");
        publish(
            ctx,
            target,
            EventType::Normal,
            ready_event,
            actions::RECONCILE,
            format!("{} {} is ready", target.kind, target.name),
        )
        .await;
    }
    Ok(Action::requeue(ctx.sync_period))
}
