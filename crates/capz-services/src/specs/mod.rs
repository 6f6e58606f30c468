//! Builders for the ASO objects the services apply
//!
//! Each builder returns a bare `DynamicObject` holding only the fields the
//! operator owns; the engine adds namespace, ownership and credential
//! metadata before applying it.

pub mod compute;
pub mod managed;
pub mod network;

use std::collections::BTreeMap;

use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
use serde_json::{json, Value};

use capz_common::crd::ResourceStatus;
use capz_common::kube_utils::api_version;

/// An ASO kind at the version the operator applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsoKind {
    /// API group
    pub group: &'static str,
    /// API version applied
    pub version: &'static str,
    /// Kind
    pub kind: &'static str,
}

impl AsoKind {
    const fn new(group: &'static str, version: &'static str, kind: &'static str) -> Self {
        Self {
            group,
            version,
            kind,
        }
    }

    /// `group/version`
    pub fn api_version(&self) -> String {
        api_version(self.group, self.version)
    }

    /// Whether a status entry is of this kind, at any version
    pub fn matches(&self, status: &ResourceStatus) -> bool {
        status.group == self.group && status.kind == self.kind
    }

    /// Bare object of this kind
    pub fn object(&self, name: &str, spec: Value) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: self.api_version(),
                kind: self.kind.to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: json!({ "spec": spec }),
        }
    }

    /// Reference to an object of this kind by Kubernetes name
    pub fn reference(&self, name: &str) -> Value {
        json!({ "group": self.group, "kind": self.kind, "name": name })
    }
}

pub const RESOURCE_GROUP: AsoKind =
    AsoKind::new("resources.azure.com", "v1api20200601", "ResourceGroup");
pub const VIRTUAL_NETWORK: AsoKind =
    AsoKind::new("network.azure.com", "v1api20201101", "VirtualNetwork");
pub const SUBNET: AsoKind =
    AsoKind::new("network.azure.com", "v1api20201101", "VirtualNetworksSubnet");
pub const VNET_PEERING: AsoKind = AsoKind::new(
    "network.azure.com",
    "v1api20201101",
    "VirtualNetworksVirtualNetworkPeering",
);
pub const SECURITY_GROUP: AsoKind =
    AsoKind::new("network.azure.com", "v1api20201101", "NetworkSecurityGroup");
pub const SECURITY_RULE: AsoKind = AsoKind::new(
    "network.azure.com",
    "v1api20201101",
    "NetworkSecurityGroupsSecurityRule",
);
pub const ROUTE_TABLE: AsoKind =
    AsoKind::new("network.azure.com", "v1api20201101", "RouteTable");
pub const PUBLIC_IP: AsoKind =
    AsoKind::new("network.azure.com", "v1api20201101", "PublicIPAddress");
pub const NAT_GATEWAY: AsoKind =
    AsoKind::new("network.azure.com", "v1api20220701", "NatGateway");
pub const LOAD_BALANCER: AsoKind =
    AsoKind::new("network.azure.com", "v1api20210301", "LoadBalancer");
pub const PRIVATE_DNS_ZONE: AsoKind =
    AsoKind::new("network.azure.com", "v1api20180901", "PrivateDnsZone");
pub const PRIVATE_DNS_LINK: AsoKind = AsoKind::new(
    "network.azure.com",
    "v1api20200601",
    "PrivateDnsZonesVirtualNetworkLink",
);
pub const PRIVATE_DNS_RECORD: AsoKind =
    AsoKind::new("network.azure.com", "v1api20200601", "PrivateDnsZonesARecord");
pub const BASTION_HOST: AsoKind =
    AsoKind::new("network.azure.com", "v1api20220701", "BastionHost");
pub const PRIVATE_ENDPOINT: AsoKind =
    AsoKind::new("network.azure.com", "v1api20220701", "PrivateEndpoint");
pub const NETWORK_INTERFACE: AsoKind =
    AsoKind::new("network.azure.com", "v1api20201101", "NetworkInterface");
pub const VIRTUAL_MACHINE: AsoKind =
    AsoKind::new("compute.azure.com", "v1api20220301", "VirtualMachine");
pub const VM_EXTENSION: AsoKind = AsoKind::new(
    "compute.azure.com",
    "v1api20220301",
    "VirtualMachinesExtension",
);
pub const MANAGED_CLUSTER: AsoKind = AsoKind::new(
    "containerservice.azure.com",
    "v1api20231001",
    "ManagedCluster",
);

/// ASO owner pointing at another ASO object by name
pub fn owner(name: &str) -> Value {
    json!({ "name": name })
}

/// Reference to an Azure resource by ARM ID
pub fn arm_reference(id: &str) -> Value {
    json!({ "armId": id })
}

/// ARM ID of a resource group
pub fn resource_group_id(subscription_id: &str, resource_group: &str) -> String {
    format!("/subscriptions/{subscription_id}/resourceGroups/{resource_group}")
}

/// ARM ID of a network resource
pub fn network_resource_id(
    subscription_id: &str,
    resource_group: &str,
    provider_type: &str,
    name: &str,
) -> String {
    format!(
        "{}/providers/Microsoft.Network/{provider_type}/{name}",
        resource_group_id(subscription_id, resource_group)
    )
}

/// Tags as a JSON object
pub fn tags(tags: &BTreeMap<String, String>) -> Value {
    json!(tags)
}
