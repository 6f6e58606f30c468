//! Shared types used across the infrastructure CRDs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type summarizing overall readiness of an object
pub const READY_CONDITION: &str = "Ready";

/// Condition type for the cluster network (vnet, subnets, load balancers)
pub const NETWORK_INFRASTRUCTURE_READY_CONDITION: &str = "NetworkInfrastructureReady";

/// Condition type for a machine's virtual machine
pub const VM_RUNNING_CONDITION: &str = "VMRunning";

/// Condition type for the ASO resources owned by an object
pub const RESOURCES_READY_CONDITION: &str = "ResourcesReady";

/// Reason recorded while reconciliation is paused
pub const PAUSED_REASON: &str = "Paused";

/// Reason recorded while the object is being deleted
pub const DELETING_REASON: &str = "Deleting";

/// Reason recorded when Azure resources are still being provisioned
pub const PROVISIONING_REASON: &str = "Provisioning";

/// Reason recorded when a virtual machine disappeared out-of-band
pub const VM_DELETED_REASON: &str = "VMDeleted";

/// Reason recorded for unclassified reconcile failures
pub const RECONCILE_FAILED_REASON: &str = "ReconcileFailed";

/// Reason recorded when the spec can't be reconciled as written
pub const INVALID_SPEC_REASON: &str = "InvalidSpec";

/// Reason recorded once everything is provisioned
pub const SUCCEEDED_REASON: &str = "Succeeded";

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How bad a false condition is (Cluster API convention)
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    /// The object cannot make progress without intervention
    Error,
    /// Something is degraded but progress may still happen
    Warning,
    /// Expected transient state (e.g. provisioning)
    Info,
}

/// Kubernetes-style condition with a Cluster API severity
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready, VMRunning)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Severity, only meaningful when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            severity: None,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// A `True` condition
    pub fn true_(type_: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::True, SUCCEEDED_REASON, "")
    }

    /// A `False` condition with a severity
    pub fn false_(
        type_: impl Into<String>,
        reason: impl Into<String>,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Some(severity),
            ..Self::new(type_, ConditionStatus::False, reason, message)
        }
    }
}

/// Insert or replace the condition of the same type
///
/// `last_transition_time` is kept from the existing condition when the status
/// did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Find a condition by type
pub fn get_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether the condition of the given type is present and `True`
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    get_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Identity of an ASO resource within an owner's status list
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    /// API group (e.g. `network.azure.com`)
    pub group: String,
    /// Kind (e.g. `VirtualNetwork`)
    pub kind: String,
    /// Object name
    pub name: String,
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}/{}", self.kind, self.group, self.name)
    }
}

/// One ASO resource recorded in an owner's status
///
/// Identity is `(group, kind, name)`; the version records what was last
/// applied so the same object can be addressed on delete.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// Kind
    pub kind: String,
    /// Object name (same namespace as the owner)
    pub name: String,
    /// Whether ASO reported the resource ready for the current generation
    #[serde(default)]
    pub ready: bool,
}

impl ResourceStatus {
    /// Identity key used for set comparisons
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            group: self.group.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }
}

/// Reference to an identity object (e.g. AzureClusterIdentity)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    /// Kind of the referenced object
    #[serde(default = "default_identity_kind")]
    pub kind: String,
    /// Name of the referenced object
    pub name: String,
    /// Namespace of the referenced object (defaults to the referrer's)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

fn default_identity_kind() -> String {
    "AzureClusterIdentity".to_string()
}

/// Reference to a Kubernetes Secret
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Secret name
    pub name: String,
    /// Secret namespace (defaults to the referrer's)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Key within the secret data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Endpoint used to reach a cluster's API server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    /// Host name or IP address
    #[serde(default)]
    pub host: String,
    /// Port
    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    /// Whether neither host nor port are set
    pub fn is_zero(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }
}

/// A failure domain (availability zone) advertised to Cluster API
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomainSpec {
    /// Whether control plane machines may be placed here
    #[serde(default)]
    pub control_plane: bool,
    /// Free-form attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Failure domains keyed by zone name
pub type FailureDomains = BTreeMap<String, FailureDomainSpec>;

/// Address of a machine
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineAddress {
    /// Address type (InternalIP, ExternalIP, Hostname)
    #[serde(rename = "type")]
    pub type_: String,
    /// The address
    pub address: String,
}
