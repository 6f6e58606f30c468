//! Kubernetes Event recording for the infrastructure controllers.
//!
//! Events are how reconcile failures reach users (`kubectl describe`).
//! Publishing is fire-and-forget: failures are logged and never propagate.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event about `resource_ref`
    ///
    /// `reason` is the machine-readable REASON column, `action` what the
    /// controller was doing, `note` the human-readable message.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name` from `instance` (usually the pod name)
    pub fn new(client: Client, controller_name: &str, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                object = ?resource_ref.name,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every event.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// Every owned Azure resource is ready
    pub const INFRASTRUCTURE_READY: &str = "InfrastructureReady";
    /// A virtual machine is running
    pub const VM_READY: &str = "VMReady";
    /// A virtual machine was removed outside the operator
    pub const VM_DELETED: &str = "VMDeleted";
    /// Reconciliation hit an error that needs a spec change
    pub const RECONCILE_TERMINAL: &str = "ReconcileTerminalError";
    /// Reconciliation failed and will be retried with backoff
    pub const RECONCILE_ERROR: &str = "ReconcileError";
    /// Azure resources paused (ASO reconcile-policy skip)
    pub const PAUSED: &str = "Paused";
    /// Deletion of Azure resources started
    pub const DELETION_STARTED: &str = "DeletionStarted";
    /// All Azure resources are gone, finalizer removed
    pub const DELETION_COMPLETE: &str = "DeletionComplete";
    /// Spec validation failed
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Credentials could not be resolved
    pub const CREDENTIALS_FAILED: &str = "CredentialsFailed";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Pausing owned resources
    pub const PAUSE: &str = "Pause";
    /// Deleting owned resources
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        let publisher = NoopEventPublisher;
        publisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::VM_DELETED,
                actions::RECONCILE,
                Some("vm gone".to_string()),
            )
            .await;
    }
}
