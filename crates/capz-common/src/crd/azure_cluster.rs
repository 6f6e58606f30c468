//! AzureCluster CRD: the Azure infrastructure of a Cluster API cluster
//!
//! Network objects are optional in the manifest; [`AzureClusterSpec::with_defaults`]
//! fills in the names and address ranges used when the user leaves them out.

use std::collections::{BTreeMap, HashSet};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApiEndpoint, Condition, FailureDomains, IdentityRef, ResourceStatus};
use crate::Error;

/// Default address space of a generated virtual network
pub const DEFAULT_VNET_CIDR: &str = "10.0.0.0/8";

/// Default address range of the control plane subnet
pub const DEFAULT_CONTROL_PLANE_SUBNET_CIDR: &str = "10.0.0.0/16";

/// Default address range of the node subnet
pub const DEFAULT_NODE_SUBNET_CIDR: &str = "10.1.0.0/16";

/// Default address range of the bastion subnet
pub const DEFAULT_BASTION_SUBNET_CIDR: &str = "10.255.255.224/27";

/// Subnet name Azure requires for bastion hosts
pub const BASTION_SUBNET_NAME: &str = "AzureBastionSubnet";

/// Port of the workload API server
pub const API_SERVER_PORT: i32 = 6443;

/// AzureCluster defines the Azure network and shared infrastructure of a cluster.
///
/// Example:
/// ```yaml
/// apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
/// kind: AzureCluster
/// metadata:
///   name: prod
/// spec:
///   location: westeurope
///   subscriptionID: 00000000-0000-0000-0000-000000000000
///   identityRef:
///     name: prod-identity
///   networkSpec:
///     vnet:
///       cidrBlocks: ["10.0.0.0/8"]
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureCluster",
    namespaced,
    status = "AzureClusterStatus",
    shortname = "azc",
    category = "cluster-api",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Location","type":"string","jsonPath":".spec.location"}"#,
    printcolumn = r#"{"name":"ResourceGroup","type":"string","jsonPath":".spec.resourceGroup"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterSpec {
    /// Azure region
    pub location: String,

    /// Resource group holding the cluster's resources (defaults to the cluster name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    /// Subscription the cluster lives in
    #[serde(rename = "subscriptionID", default)]
    pub subscription_id: String,

    /// Identity used to authenticate against Azure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_ref: Option<IdentityRef>,

    /// Network layout
    #[serde(default)]
    pub network_spec: NetworkSpec,

    /// Bastion host configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion_spec: Option<BastionSpec>,

    /// Private endpoints attached to cluster subnets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_endpoints: Vec<PrivateEndpointSpec>,

    /// Explicit failure domains; overrides zone discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domains: Option<FailureDomains>,

    /// Extra tags applied to every Azure resource
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,

    /// Endpoint of the workload API server (reported when not user-set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

/// Network layout of a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Virtual network
    #[serde(default)]
    pub vnet: VnetSpec,

    /// Subnets of the virtual network
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetSpec>,

    /// Load balancer in front of the API server
    #[serde(
        rename = "apiServerLB",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub api_server_lb: Option<LoadBalancerSpec>,

    /// Private DNS zone for internal API server load balancers
    #[serde(
        rename = "privateDNSZoneName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub private_dns_zone_name: Option<String>,
}

/// Virtual network configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VnetSpec {
    /// Name (defaults to `<cluster>-vnet`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Address space
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidr_blocks: Vec<String>,

    /// Resource group of a pre-existing vnet (defaults to the cluster's)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    /// Peerings to other virtual networks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peerings: Vec<VnetPeeringSpec>,
}

/// Peering with a remote virtual network
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VnetPeeringSpec {
    /// Name of the remote virtual network
    pub remote_vnet_name: String,

    /// Resource group of the remote virtual network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

/// Role a subnet plays in the cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetRole {
    /// Hosts control plane machines
    ControlPlane,
    /// Hosts worker machines
    #[default]
    Node,
}

/// Subnet configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Subnet name
    pub name: String,

    /// Role of the subnet
    #[serde(default)]
    pub role: SubnetRole,

    /// Address ranges
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidr_blocks: Vec<String>,

    /// Network security group attached to the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group: Option<SecurityGroupSpec>,

    /// Route table attached to the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table: Option<String>,

    /// NAT gateway attached to the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway: Option<NatGatewaySpec>,
}

/// Network security group
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupSpec {
    /// Name of the security group
    pub name: String,

    /// Rules of the security group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_rules: Vec<SecurityRule>,
}

/// A single security rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    /// Rule name
    pub name: String,
    /// Protocol (Tcp, Udp, *)
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Inbound or Outbound
    #[serde(default = "default_direction")]
    pub direction: String,
    /// Priority (100-4096)
    pub priority: i32,
    /// Source address prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Destination port range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ports: Option<String>,
    /// Allow or Deny
    #[serde(default = "default_action")]
    pub action: String,
}

fn default_protocol() -> String {
    "Tcp".to_string()
}

fn default_direction() -> String {
    "Inbound".to_string()
}

fn default_action() -> String {
    "Allow".to_string()
}

/// NAT gateway of a subnet
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NatGatewaySpec {
    /// Name of the NAT gateway
    pub name: String,
}

/// Load balancer type
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum LoadBalancerType {
    /// Internet facing
    #[default]
    Public,
    /// Private to the virtual network
    Internal,
}

/// API server load balancer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    /// Name (defaults to `<cluster>-public-lb` or `<cluster>-internal-lb`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Public or internal
    #[serde(rename = "type", default)]
    pub lb_type: LoadBalancerType,

    /// Private frontend address for internal load balancers
    #[serde(
        rename = "frontendIP",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub frontend_ip: Option<String>,
}

/// Bastion host
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BastionSpec {
    /// Name (defaults to `<cluster>-bastion`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Address range of the `AzureBastionSubnet`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_cidr_block: Option<String>,
}

/// Private endpoint in a cluster subnet
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateEndpointSpec {
    /// Endpoint name
    pub name: String,

    /// Subnet the endpoint lives in
    pub subnet_name: String,

    /// ARM ID of the private link service or resource
    pub private_link_service_id: String,

    /// Sub-resources (group IDs) to connect to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_ids: Vec<String>,
}

/// Observed state of an AzureCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterStatus {
    /// Whether all infrastructure is provisioned
    #[serde(default)]
    pub ready: bool,

    /// Failure domains available to machines
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_domains: FailureDomains,

    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// ASO resources owned by this cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,
}

impl AzureClusterSpec {
    /// Validate the spec
    pub fn validate(&self) -> Result<(), Error> {
        if self.location.is_empty() {
            return Err(Error::validation("location cannot be empty"));
        }

        let mut names = HashSet::new();
        for subnet in &self.network_spec.subnets {
            if subnet.name.is_empty() {
                return Err(Error::validation("subnet name cannot be empty"));
            }
            if !names.insert(subnet.name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate subnet name: {}",
                    subnet.name
                )));
            }
        }

        for endpoint in &self.private_endpoints {
            if !names.contains(endpoint.subnet_name.as_str()) {
                return Err(Error::validation(format!(
                    "private endpoint {} references unknown subnet {}",
                    endpoint.name, endpoint.subnet_name
                )));
            }
        }

        Ok(())
    }

    /// Return a copy with every optional network field resolved for `cluster`
    pub fn with_defaults(&self, cluster: &str) -> Self {
        let mut spec = self.clone();

        spec.resource_group.get_or_insert_with(|| cluster.to_string());

        let vnet = &mut spec.network_spec.vnet;
        vnet.name.get_or_insert_with(|| format!("{cluster}-vnet"));
        if vnet.cidr_blocks.is_empty() {
            vnet.cidr_blocks.push(DEFAULT_VNET_CIDR.to_string());
        }

        let subnets = &mut spec.network_spec.subnets;
        if !subnets.iter().any(|s| s.role == SubnetRole::ControlPlane) {
            subnets.push(SubnetSpec {
                name: format!("{cluster}-controlplane-subnet"),
                role: SubnetRole::ControlPlane,
                cidr_blocks: vec![DEFAULT_CONTROL_PLANE_SUBNET_CIDR.to_string()],
                ..Default::default()
            });
        }
        if !subnets.iter().any(|s| s.role == SubnetRole::Node) {
            subnets.push(SubnetSpec {
                name: format!("{cluster}-node-subnet"),
                role: SubnetRole::Node,
                cidr_blocks: vec![DEFAULT_NODE_SUBNET_CIDR.to_string()],
                ..Default::default()
            });
        }
        for subnet in subnets.iter_mut() {
            let role = match subnet.role {
                SubnetRole::ControlPlane => "controlplane",
                SubnetRole::Node => "node",
            };
            subnet.security_group.get_or_insert_with(|| SecurityGroupSpec {
                name: format!("{cluster}-{role}-nsg"),
                security_rules: Vec::new(),
            });
            if subnet.role == SubnetRole::Node {
                subnet
                    .route_table
                    .get_or_insert_with(|| format!("{cluster}-node-routetable"));
            }
        }

        let lb = spec
            .network_spec
            .api_server_lb
            .get_or_insert_with(LoadBalancerSpec::default);
        let lb_type = lb.lb_type;
        lb.name.get_or_insert_with(|| match lb_type {
            LoadBalancerType::Public => format!("{cluster}-public-lb"),
            LoadBalancerType::Internal => format!("{cluster}-internal-lb"),
        });

        if let Some(bastion) = spec.bastion_spec.as_mut() {
            bastion.name.get_or_insert_with(|| format!("{cluster}-bastion"));
            bastion
                .subnet_cidr_block
                .get_or_insert_with(|| DEFAULT_BASTION_SUBNET_CIDR.to_string());
        }

        spec
    }

    /// Resolved resource group name
    pub fn resource_group_name(&self, cluster: &str) -> String {
        self.resource_group
            .clone()
            .unwrap_or_else(|| cluster.to_string())
    }

    /// Whether the virtual network lives in a resource group we don't manage
    pub fn is_vnet_external(&self, cluster: &str) -> bool {
        self.network_spec
            .vnet
            .resource_group
            .as_ref()
            .is_some_and(|rg| *rg != self.resource_group_name(cluster))
    }

    /// The control plane subnet, once defaults are applied
    pub fn control_plane_subnet(&self) -> Option<&SubnetSpec> {
        self.network_spec
            .subnets
            .iter()
            .find(|s| s.role == SubnetRole::ControlPlane)
    }

    /// Look up a subnet by name
    pub fn subnet(&self, name: &str) -> Option<&SubnetSpec> {
        self.network_spec.subnets.iter().find(|s| s.name == name)
    }

    /// The first node subnet, once defaults are applied
    pub fn node_subnet(&self) -> Option<&SubnetSpec> {
        self.network_spec
            .subnets
            .iter()
            .find(|s| s.role == SubnetRole::Node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> AzureClusterSpec {
        AzureClusterSpec {
            location: "westeurope".to_string(),
            subscription_id: "sub".to_string(),
            ..Default::default()
        }
    }

    // ==========================================================================
    // Story Tests: Defaults
    // ==========================================================================

    /// Story: A minimal manifest gets a full network layout named after the cluster
    #[test]
    fn story_minimal_spec_gets_named_network_defaults() {
        let spec = sample_spec().with_defaults("prod");

        assert_eq!(spec.resource_group.as_deref(), Some("prod"));
        assert_eq!(spec.network_spec.vnet.name.as_deref(), Some("prod-vnet"));
        assert_eq!(spec.network_spec.vnet.cidr_blocks, vec![DEFAULT_VNET_CIDR]);

        let cp = spec.control_plane_subnet().unwrap();
        assert_eq!(cp.name, "prod-controlplane-subnet");
        assert_eq!(
            cp.security_group.as_ref().unwrap().name,
            "prod-controlplane-nsg"
        );
        assert!(cp.route_table.is_none());

        let node = spec.node_subnet().unwrap();
        assert_eq!(node.route_table.as_deref(), Some("prod-node-routetable"));

        let lb = spec.network_spec.api_server_lb.unwrap();
        assert_eq!(lb.name.as_deref(), Some("prod-public-lb"));
    }

    /// Story: User-provided values survive defaulting
    #[test]
    fn story_user_values_win_over_defaults() {
        let mut spec = sample_spec();
        spec.resource_group = Some("shared-rg".into());
        spec.network_spec.vnet.name = Some("corp-vnet".into());
        spec.network_spec.api_server_lb = Some(LoadBalancerSpec {
            name: None,
            lb_type: LoadBalancerType::Internal,
            frontend_ip: Some("10.0.0.100".into()),
        });

        let spec = spec.with_defaults("prod");
        assert_eq!(spec.resource_group.as_deref(), Some("shared-rg"));
        assert_eq!(spec.network_spec.vnet.name.as_deref(), Some("corp-vnet"));
        assert_eq!(
            spec.network_spec.api_server_lb.unwrap().name.as_deref(),
            Some("prod-internal-lb")
        );
    }

    #[test]
    fn test_defaults_are_idempotent() {
        let once = sample_spec().with_defaults("prod");
        assert_eq!(once.with_defaults("prod"), once);
    }

    // ==========================================================================
    // Story Tests: Validation
    // ==========================================================================

    #[test]
    fn test_empty_location_rejected() {
        let spec = AzureClusterSpec::default();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_duplicate_subnets_rejected() {
        let mut spec = sample_spec();
        let subnet = SubnetSpec {
            name: "a".into(),
            ..Default::default()
        };
        spec.network_spec.subnets = vec![subnet.clone(), subnet];
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate subnet name"));
    }

    #[test]
    fn test_private_endpoint_must_reference_known_subnet() {
        let mut spec = sample_spec();
        spec.private_endpoints.push(PrivateEndpointSpec {
            name: "pe".into(),
            subnet_name: "missing".into(),
            private_link_service_id: "/subscriptions/x".into(),
            group_ids: vec![],
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_vnet_external_detection() {
        let mut spec = sample_spec();
        assert!(!spec.is_vnet_external("prod"));
        spec.network_spec.vnet.resource_group = Some("prod".into());
        assert!(!spec.is_vnet_external("prod"));
        spec.network_spec.vnet.resource_group = Some("network-rg".into());
        assert!(spec.is_vnet_external("prod"));
    }

    #[test]
    fn test_subnet_role_serializes_kebab_case() {
        let json = serde_json::to_string(&SubnetRole::ControlPlane).unwrap();
        assert_eq!(json, "\"control-plane\"");
    }
}
