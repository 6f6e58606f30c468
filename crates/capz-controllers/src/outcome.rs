//! Classification of orchestrator failures into controller outcomes
//!
//! Services and orchestrators only wrap errors; this is the one place that
//! looks at the variant and decides what Kubernetes sees.

use std::time::Duration;

use kube::runtime::controller::Action;

use capz_common::crd::{RECONCILE_FAILED_REASON, VM_DELETED_REASON};
use capz_common::{Error, ReconcileError};

/// What a failed reconcile means for the object
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Needs a spec change; stop without requeue
    Terminal { reason: String, message: String },
    /// Converging; check again after the delay
    Transient { message: String, retry_after: Duration },
    /// The VM was removed outside the operator
    VmDeleted(String),
    /// Unclassified; hand to the controller's backoff
    Fatal(Error),
}

impl From<ReconcileError> for ReconcileOutcome {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Terminal { reason, message } => Self::Terminal { reason, message },
            ReconcileError::Transient {
                message,
                retry_after,
            } => Self::Transient {
                message,
                retry_after,
            },
            ReconcileError::VmDeleted { message } => Self::VmDeleted(message),
            ReconcileError::Fatal(e) => Self::Fatal(e),
        }
    }
}

impl ReconcileOutcome {
    /// Condition reason recorded for this outcome
    ///
    /// Transient outcomes use `transient_reason`, which depends on what the
    /// controller was doing.
    pub fn reason<'a>(&'a self, transient_reason: &'a str) -> &'a str {
        match self {
            Self::Terminal { reason, .. } => reason,
            Self::Transient { .. } => transient_reason,
            Self::VmDeleted(_) => VM_DELETED_REASON,
            Self::Fatal(_) => RECONCILE_FAILED_REASON,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Terminal { message, .. } => message.clone(),
            Self::Transient { message, .. } => message.clone(),
            Self::VmDeleted(message) => message.clone(),
            Self::Fatal(e) => e.to_string(),
        }
    }

    /// Whether the failure should be surfaced as a Warning event
    pub fn is_warning(&self) -> bool {
        !matches!(self, Self::Transient { .. })
    }

    /// The requeue directive, or the error for the controller's backoff
    pub fn into_action(self) -> Result<Action, Error> {
        match self {
            Self::Terminal { .. } | Self::VmDeleted(_) => Ok(Action::await_change()),
            Self::Transient { retry_after, .. } => Ok(Action::requeue(retry_after)),
            Self::Fatal(e) => Err(e),
        }
    }
}
