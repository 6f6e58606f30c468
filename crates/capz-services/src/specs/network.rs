//! Resource group and network builders

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use serde_json::{json, Value};

use capz_common::crd::SecurityRule;

use super::*;

pub fn resource_group(name: &str, location: &str, tags: &BTreeMap<String, String>) -> DynamicObject {
    RESOURCE_GROUP.object(
        name,
        json!({
            "azureName": name,
            "location": location,
            "tags": super::tags(tags),
        }),
    )
}

pub fn virtual_network(
    name: &str,
    resource_group: &str,
    location: &str,
    cidr_blocks: &[String],
    tags: &BTreeMap<String, String>,
) -> DynamicObject {
    VIRTUAL_NETWORK.object(
        name,
        json!({
            "azureName": name,
            "owner": owner(resource_group),
            "location": location,
            "addressSpace": {"addressPrefixes": cidr_blocks},
            "tags": super::tags(tags),
        }),
    )
}

/// Kubernetes name of a subnet object, unique per vnet
pub fn subnet_object_name(vnet: &str, subnet: &str) -> String {
    format!("{vnet}-{subnet}").to_lowercase()
}

/// Where a subnet's virtual network lives
#[derive(Debug, Clone)]
pub enum VnetOwner<'a> {
    /// Managed here, referenced by object name
    Managed(&'a str),
    /// Pre-existing, referenced by ARM ID
    External(String),
}

impl VnetOwner<'_> {
    fn to_json(&self) -> Value {
        match self {
            Self::Managed(name) => owner(name),
            Self::External(id) => arm_reference(id),
        }
    }

    fn reference(&self) -> Value {
        match self {
            Self::Managed(name) => VIRTUAL_NETWORK.reference(name),
            Self::External(id) => arm_reference(id),
        }
    }
}

/// Optional attachments of a subnet, by object name
#[derive(Debug, Default, Clone)]
pub struct SubnetAttachments<'a> {
    pub security_group: Option<&'a str>,
    pub route_table: Option<&'a str>,
    pub nat_gateway: Option<&'a str>,
}

pub fn subnet(
    object_name: &str,
    azure_name: &str,
    vnet: &VnetOwner<'_>,
    cidr_blocks: &[String],
    attachments: &SubnetAttachments<'_>,
) -> DynamicObject {
    let mut spec = json!({
        "azureName": azure_name,
        "owner": vnet.to_json(),
        "addressPrefixes": cidr_blocks,
    });
    if let Some(nsg) = attachments.security_group {
        spec["networkSecurityGroup"] = json!({"reference": SECURITY_GROUP.reference(nsg)});
    }
    if let Some(rt) = attachments.route_table {
        spec["routeTable"] = json!({"reference": ROUTE_TABLE.reference(rt)});
    }
    if let Some(nat) = attachments.nat_gateway {
        spec["natGateway"] = json!({"reference": NAT_GATEWAY.reference(nat)});
    }
    SUBNET.object(object_name, spec)
}

pub fn security_group(
    name: &str,
    resource_group: &str,
    location: &str,
    tags: &BTreeMap<String, String>,
) -> DynamicObject {
    SECURITY_GROUP.object(
        name,
        json!({
            "azureName": name,
            "owner": owner(resource_group),
            "location": location,
            "tags": super::tags(tags),
        }),
    )
}

pub fn security_rule(security_group: &str, rule: &SecurityRule) -> DynamicObject {
    SECURITY_RULE.object(
        &format!("{security_group}-{}", rule.name.to_lowercase().replace('_', "-")),
        json!({
            "azureName": rule.name,
            "owner": owner(security_group),
            "protocol": rule.protocol,
            "direction": rule.direction,
            "priority": rule.priority,
            "access": rule.action,
            "sourceAddressPrefix": rule.source.as_deref().unwrap_or("*"),
            "sourcePortRange": "*",
            "destinationAddressPrefix": "*",
            "destinationPortRange": rule.destination_ports.as_deref().unwrap_or("*"),
        }),
    )
}

pub fn route_table(
    name: &str,
    resource_group: &str,
    location: &str,
    tags: &BTreeMap<String, String>,
) -> DynamicObject {
    ROUTE_TABLE.object(
        name,
        json!({
            "azureName": name,
            "owner": owner(resource_group),
            "location": location,
            "tags": super::tags(tags),
        }),
    )
}

/// Static standard-SKU IPv4 public IP
pub fn public_ip(
    name: &str,
    resource_group: &str,
    location: &str,
    dns_label: Option<&str>,
    zones: &[String],
    tags: &BTreeMap<String, String>,
) -> DynamicObject {
    let mut spec = json!({
        "azureName": name,
        "owner": owner(resource_group),
        "location": location,
        "sku": {"name": "Standard"},
        "publicIPAllocationMethod": "Static",
        "publicIPAddressVersion": "IPv4",
        "tags": super::tags(tags),
    });
    if let Some(label) = dns_label {
        spec["dnsSettings"] = json!({"domainNameLabel": label});
    }
    if !zones.is_empty() {
        spec["zones"] = json!(zones);
    }
    PUBLIC_IP.object(name, spec)
}

pub fn nat_gateway(
    name: &str,
    resource_group: &str,
    location: &str,
    public_ip: &str,
    tags: &BTreeMap<String, String>,
) -> DynamicObject {
    NAT_GATEWAY.object(
        name,
        json!({
            "azureName": name,
            "owner": owner(resource_group),
            "location": location,
            "sku": {"name": "Standard"},
            "publicIpAddresses": [{"reference": PUBLIC_IP.reference(public_ip)}],
            "tags": super::tags(tags),
        }),
    )
}

pub fn vnet_peering(
    vnet_name: &str,
    vnet: &VnetOwner<'_>,
    remote_vnet_id: &str,
    remote_name: &str,
) -> DynamicObject {
    let azure_name = format!("{vnet_name}-To-{remote_name}");
    VNET_PEERING.object(
        &azure_name.to_lowercase(),
        json!({
            "azureName": azure_name,
            "owner": vnet.to_json(),
            "remoteVirtualNetwork": {"reference": arm_reference(remote_vnet_id)},
            "allowVirtualNetworkAccess": true,
            "allowForwardedTraffic": true,
        }),
    )
}

/// Frontend of the API server load balancer
#[derive(Debug, Clone)]
pub enum LoadBalancerFrontend<'a> {
    /// Public IP object
    Public { public_ip: &'a str },
    /// Static private address in a subnet object
    Internal { subnet: &'a str, address: &'a str },
}

/// Load balancer in front of the API server on `port`
pub fn api_server_load_balancer(
    name: &str,
    resource_group: &str,
    location: &str,
    lb_id: &str,
    frontend: &LoadBalancerFrontend<'_>,
    port: i32,
    tags: &BTreeMap<String, String>,
) -> DynamicObject {
    let frontend_name = format!("{name}-frontEnd");
    let pool_name = format!("{name}-backendPool");
    let probe_name = "HTTPSProbe";

    let frontend_config = match frontend {
        LoadBalancerFrontend::Public { public_ip } => json!({
            "name": frontend_name,
            "publicIPAddress": {"reference": PUBLIC_IP.reference(public_ip)},
        }),
        LoadBalancerFrontend::Internal { subnet, address } => json!({
            "name": frontend_name,
            "privateIPAllocationMethod": "Static",
            "privateIPAddress": address,
            "subnet": {"reference": SUBNET.reference(subnet)},
        }),
    };

    LOAD_BALANCER.object(
        name,
        json!({
            "azureName": name,
            "owner": owner(resource_group),
            "location": location,
            "sku": {"name": "Standard"},
            "frontendIPConfigurations": [frontend_config],
            "backendAddressPools": [{"name": pool_name}],
            "probes": [{
                "name": probe_name,
                "protocol": "Https",
                "port": port,
                "requestPath": "/readyz",
                "intervalInSeconds": 15,
                "numberOfProbes": 4,
            }],
            "loadBalancingRules": [{
                "name": "LBRuleHTTPS",
                "protocol": "Tcp",
                "frontendPort": port,
                "backendPort": port,
                "idleTimeoutInMinutes": 4,
                "enableFloatingIP": false,
                "loadDistribution": "Default",
                "frontendIPConfiguration": {"reference": arm_reference(
                    &format!("{lb_id}/frontendIPConfigurations/{frontend_name}")
                )},
                "backendAddressPool": {"reference": arm_reference(
                    &format!("{lb_id}/backendAddressPools/{pool_name}")
                )},
                "probe": {"reference": arm_reference(&format!("{lb_id}/probes/{probe_name}"))},
            }],
            "tags": super::tags(tags),
        }),
    )
}

/// Kubernetes name of a private DNS zone object
pub fn dns_zone_object_name(zone: &str) -> String {
    zone.replace('.', "-").to_lowercase()
}

pub fn private_dns_zone(
    zone: &str,
    resource_group: &str,
    tags: &BTreeMap<String, String>,
) -> DynamicObject {
    PRIVATE_DNS_ZONE.object(
        &dns_zone_object_name(zone),
        json!({
            "azureName": zone,
            "owner": owner(resource_group),
            "location": "global",
            "tags": super::tags(tags),
        }),
    )
}

pub fn private_dns_link(zone: &str, vnet_name: &str, vnet: &VnetOwner<'_>) -> DynamicObject {
    let zone_object = dns_zone_object_name(zone);
    PRIVATE_DNS_LINK.object(
        &format!("{zone_object}-{vnet_name}-link").to_lowercase(),
        json!({
            "azureName": format!("{vnet_name}-link"),
            "owner": owner(&zone_object),
            "location": "global",
            "registrationEnabled": false,
            "virtualNetwork": {"reference": vnet.reference()},
        }),
    )
}

pub fn private_dns_record(zone: &str, host: &str, address: &str) -> DynamicObject {
    let zone_object = dns_zone_object_name(zone);
    PRIVATE_DNS_RECORD.object(
        &format!("{zone_object}-{host}"),
        json!({
            "azureName": host,
            "owner": owner(&zone_object),
            "ttl": 300,
            "aRecords": [{"ipv4Address": address}],
        }),
    )
}

pub fn bastion_host(
    name: &str,
    resource_group: &str,
    location: &str,
    public_ip: &str,
    subnet: &str,
    tags: &BTreeMap<String, String>,
) -> DynamicObject {
    BASTION_HOST.object(
        name,
        json!({
            "azureName": name,
            "owner": owner(resource_group),
            "location": location,
            "ipConfigurations": [{
                "name": format!("{name}-bastionIP"),
                "publicIPAddress": {"reference": PUBLIC_IP.reference(public_ip)},
                "subnet": {"reference": SUBNET.reference(subnet)},
            }],
            "tags": super::tags(tags),
        }),
    )
}

pub fn private_endpoint(
    name: &str,
    resource_group: &str,
    location: &str,
    subnet: &str,
    link_service_id: &str,
    group_ids: &[String],
    tags: &BTreeMap<String, String>,
) -> DynamicObject {
    PRIVATE_ENDPOINT.object(
        name,
        json!({
            "azureName": name,
            "owner": owner(resource_group),
            "location": location,
            "subnet": {"reference": SUBNET.reference(subnet)},
            "privateLinkServiceConnections": [{
                "name": name,
                "privateLinkServiceReference": arm_reference(link_service_id),
                "groupIds": group_ids,
            }],
            "tags": super::tags(tags),
        }),
    )
}
