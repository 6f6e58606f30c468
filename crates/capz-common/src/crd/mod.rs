//! Custom Resource Definitions for the Azure infrastructure operator
//!
//! The `infrastructure.cluster.x-k8s.io` kinds are owned and installed by
//! this operator; the `cluster.x-k8s.io` kinds are read-only mirrors.

mod azure_aso_managed_cluster;
mod azure_cluster;
mod azure_machine;
mod azure_managed_control_plane;
mod capi;
mod identity;
mod types;

pub use azure_aso_managed_cluster::{
    AzureASOManagedCluster, AzureASOManagedClusterSpec, AzureASOManagedClusterStatus,
};
pub use azure_cluster::{
    AzureCluster, AzureClusterSpec, AzureClusterStatus, BastionSpec, LoadBalancerSpec,
    LoadBalancerType, NatGatewaySpec, NetworkSpec, PrivateEndpointSpec, SecurityGroupSpec,
    SecurityRule, SubnetRole, SubnetSpec, VnetPeeringSpec, VnetSpec, API_SERVER_PORT,
    BASTION_SUBNET_NAME, DEFAULT_BASTION_SUBNET_CIDR, DEFAULT_CONTROL_PLANE_SUBNET_CIDR,
    DEFAULT_NODE_SUBNET_CIDR, DEFAULT_VNET_CIDR,
};
pub use azure_machine::{
    provider_id_for, AzureMachine, AzureMachineSpec, AzureMachineStatus, ImageSpec,
    MarketplaceImage, OsDisk, VmExtensionSpec, PROVIDER_ID_PREFIX, UPDATE_ERROR_FAILURE_REASON,
};
pub use azure_managed_control_plane::{
    normalize_version, AzureManagedControlPlane, AzureManagedControlPlaneSpec,
    AzureManagedControlPlaneStatus, ManagedSubnet, ManagedVirtualNetwork, SystemPool,
};
pub use capi::{
    Bootstrap, Cluster, ClusterSpec, ClusterStatus, Machine, MachineSpec, MachineStatus,
    CONTROL_PLANE_LABEL,
};
pub use identity::{
    AllowedNamespaces, AzureClusterIdentity, AzureClusterIdentitySpec, IdentityType,
    CLIENT_SECRET_KEY,
};
pub use types::{
    get_condition, is_condition_true, set_condition, ApiEndpoint, Condition, ConditionSeverity,
    ConditionStatus, FailureDomainSpec, FailureDomains, IdentityRef, MachineAddress,
    ResourceKey, ResourceStatus, SecretRef, DELETING_REASON, INVALID_SPEC_REASON,
    NETWORK_INFRASTRUCTURE_READY_CONDITION, PAUSED_REASON, PROVISIONING_REASON,
    READY_CONDITION, RECONCILE_FAILED_REASON, RESOURCES_READY_CONDITION, SUCCEEDED_REASON,
    VM_DELETED_REASON, VM_RUNNING_CONDITION,
};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// CRDs installed by the operator, in installation order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        AzureClusterIdentity::crd(),
        AzureCluster::crd(),
        AzureMachine::crd(),
        AzureManagedControlPlane::crd(),
        AzureASOManagedCluster::crd(),
    ]
}
