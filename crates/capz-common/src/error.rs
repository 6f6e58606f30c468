//! Error types for the Azure infrastructure operator
//!
//! Two layers of errors live here:
//!
//! - [`Error`] is the structured operator error. Each variant carries enough
//!   context (object names, kinds, operations) to debug a failure from logs.
//! - [`ReconcileError`] is the classification that decides the Kubernetes-level
//!   outcome of a reconcile: stop, requeue after a delay, or hand the failure
//!   to the controller's backoff.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs
    #[error("validation error for {object}: {message}")]
    Validation {
        /// Name of the object with invalid configuration
        object: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.networkSpec.vnet")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Azure credentials could not be resolved for an identity
    #[error("credentials error for identity {identity}: {message}")]
    Credentials {
        /// `namespace/name` of the identity reference
        identity: String,
        /// Description of what failed
        message: String,
    },

    /// A referenced object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// `namespace/name` of the missing object
        name: String,
    },

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was running when the deadline hit
        operation: String,
        /// The configured deadline
        after: Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "orchestrator", "scope")
        context: String,
    },

    /// Another error annotated with the step that produced it
    #[error("{context}: {source}")]
    Context {
        /// The step that failed (e.g., a service name)
        context: String,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            object: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a named object
    pub fn validation_for(object: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a named object and field path
    pub fn validation_for_field(
        object: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a credentials error for an identity reference
    pub fn credentials(identity: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Credentials {
            identity: identity.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Annotate this error with the step that produced it
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, serialization and credentials errors need a spec or secret
    /// change. Kubernetes errors are retryable unless the API server rejected
    /// the request with a 4xx other than a conflict.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Credentials { .. } => false,
            Error::NotFound { .. } => true,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
            Error::Context { source, .. } => source.is_retryable(),
        }
    }

    /// Whether this error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            Error::NotFound { .. } => true,
            Error::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Classification of a failed reconcile
///
/// Services and orchestrators return this type; only controllers inspect the
/// variant to decide what the work queue should do next.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The current spec cannot succeed. Mark the object failed, don't requeue.
    #[error("{message}")]
    Terminal {
        /// Machine-readable reason used for the failure condition
        reason: String,
        /// Human-readable message
        message: String,
    },

    /// Expected to resolve on its own (e.g. an Azure operation still running)
    #[error("{message} (retry after {retry_after:?})")]
    Transient {
        /// Human-readable message
        message: String,
        /// Delay before the next reconcile
        retry_after: Duration,
    },

    /// A virtual machine disappeared out-of-band
    ///
    /// Handled like a terminal error, but the failure reason is recorded on the
    /// machine so remediation can replace it.
    #[error("VM deleted: {message}")]
    VmDeleted {
        /// Human-readable message
        message: String,
    },

    /// Unclassified failure, retried with the controller's backoff
    #[error(transparent)]
    Fatal(#[from] Error),
}

impl ReconcileError {
    /// Create a terminal error
    pub fn terminal(reason: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Terminal {
            reason: reason.into(),
            message: msg.into(),
        }
    }

    /// Create a transient error that requeues after `retry_after`
    pub fn transient(msg: impl Into<String>, retry_after: Duration) -> Self {
        Self::Transient {
            message: msg.into(),
            retry_after,
        }
    }

    /// Create a VM-deleted error
    pub fn vm_deleted(msg: impl Into<String>) -> Self {
        Self::VmDeleted {
            message: msg.into(),
        }
    }

    /// Prefix the message with `context` without changing the classification
    pub fn wrap(self, context: &str) -> Self {
        match self {
            Self::Terminal { reason, message } => Self::Terminal {
                reason,
                message: format!("{context}: {message}"),
            },
            Self::Transient {
                message,
                retry_after,
            } => Self::Transient {
                message: format!("{context}: {message}"),
                retry_after,
            },
            Self::VmDeleted { message } => Self::VmDeleted {
                message: format!("{context}: {message}"),
            },
            Self::Fatal(err) => Self::Fatal(err.context(context)),
        }
    }

    /// Delay requested by a transient error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether this error stops reconciliation without a requeue
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. } | Self::VmDeleted { .. })
    }
}

impl From<kube::Error> for ReconcileError {
    fn from(source: kube::Error) -> Self {
        Self::Fatal(Error::from(source))
    }
}
