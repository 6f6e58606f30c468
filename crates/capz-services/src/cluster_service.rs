//! AzureCluster orchestration
//!
//! The cluster network is built in dependency order: resource group, virtual
//! network, the objects subnets attach to, subnets, then what lives in
//! subnets. Deletion either walks the services in reverse or, when the
//! cluster owns its resource group, deletes the group and lets Azure remove
//! everything inside it.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::{debug, info, instrument};

use capz_common::crd::{
    FailureDomainSpec, FailureDomains, SecurityRule, SubnetRole, API_SERVER_PORT,
    BASTION_SUBNET_NAME,
};
use capz_common::ReconcileError;

use crate::aso_service::{AsoService, SpecBuilder};
use crate::orchestrator::{
    DeleteMode, DeletePolicy, Orchestrator, GROUP_DELETE_ORDER, RESOURCE_GROUPS_SERVICE,
    VNET_PEERINGS_SERVICE,
};
use crate::scope::{AsoScope, ClusterScope};
use crate::service::{ServiceList, ServiceReconciler};
use crate::specs::network::{self, LoadBalancerFrontend, SubnetAttachments, VnetOwner};
use crate::specs::{
    AsoKind, BASTION_HOST, LOAD_BALANCER, NAT_GATEWAY, PRIVATE_DNS_LINK, PRIVATE_DNS_RECORD,
    PRIVATE_DNS_ZONE, PRIVATE_ENDPOINT, PUBLIC_IP, RESOURCE_GROUP, ROUTE_TABLE, SECURITY_GROUP,
    SECURITY_RULE, SUBNET, VIRTUAL_NETWORK, VNET_PEERING,
};
use crate::zones::ZoneResolver;

/// Host name of the API server record in the private DNS zone
pub const API_SERVER_DNS_HOST: &str = "apiserver";

/// Services of an AzureCluster in reconcile order
pub const CLUSTER_SERVICES: [&str; 12] = [
    RESOURCE_GROUPS_SERVICE,
    "virtualnetworks",
    "securitygroups",
    "routetables",
    "publicips",
    "natgateways",
    "subnets",
    VNET_PEERINGS_SERVICE,
    "loadbalancers",
    "privatedns",
    "bastionhosts",
    "privateendpoints",
];

/// Delete individually unless the cluster created both its resource group
/// and its virtual network
pub fn should_delete_individually(scope: &ClusterScope) -> bool {
    let group = scope.resource_group();
    let owns_group = scope
        .resource_statuses()
        .iter()
        .any(|s| RESOURCE_GROUP.matches(s) && s.name == group);
    !(owns_group && scope.is_vnet_managed())
}

/// The default [`DeletePolicy`] for clusters
pub fn default_delete_policy() -> DeletePolicy<ClusterScope> {
    Arc::new(should_delete_individually)
}

/// Orchestrator of an AzureCluster's Azure resources
pub struct AzureClusterService {
    scope: Arc<ClusterScope>,
    zones: Arc<dyn ZoneResolver>,
    policy: DeletePolicy<ClusterScope>,
    services: ServiceList,
}

fn service(
    name: &'static str,
    kinds: &'static [AsoKind],
    build: SpecBuilder<ClusterScope>,
    scope: &Arc<ClusterScope>,
) -> Arc<dyn ServiceReconciler> {
    Arc::new(AsoService::new(name, kinds, build, scope.clone()))
}

impl AzureClusterService {
    /// Orchestrator with the standard service list
    pub fn new(
        scope: Arc<ClusterScope>,
        zones: Arc<dyn ZoneResolver>,
        policy: DeletePolicy<ClusterScope>,
    ) -> Self {
        let services = ServiceList::new(vec![
            service(RESOURCE_GROUPS_SERVICE, &[RESOURCE_GROUP], resource_groups, &scope),
            service("virtualnetworks", &[VIRTUAL_NETWORK], virtual_networks, &scope),
            service("securitygroups", &[SECURITY_GROUP, SECURITY_RULE], security_groups, &scope),
            service("routetables", &[ROUTE_TABLE], route_tables, &scope),
            service("publicips", &[PUBLIC_IP], public_ips, &scope),
            service("natgateways", &[NAT_GATEWAY], nat_gateways, &scope),
            service("subnets", &[SUBNET], subnets, &scope),
            service(VNET_PEERINGS_SERVICE, &[VNET_PEERING], vnet_peerings, &scope),
            service("loadbalancers", &[LOAD_BALANCER], load_balancers, &scope),
            service(
                "privatedns",
                &[PRIVATE_DNS_ZONE, PRIVATE_DNS_LINK, PRIVATE_DNS_RECORD],
                private_dns,
                &scope,
            ),
            service("bastionhosts", &[BASTION_HOST], bastion_hosts, &scope),
            service("privateendpoints", &[PRIVATE_ENDPOINT], private_endpoints, &scope),
        ]);
        Self::with_services(scope, zones, policy, services)
    }

    /// Orchestrator over an explicit service list
    pub fn with_services(
        scope: Arc<ClusterScope>,
        zones: Arc<dyn ZoneResolver>,
        policy: DeletePolicy<ClusterScope>,
        services: ServiceList,
    ) -> Self {
        Self {
            scope,
            zones,
            policy,
            services,
        }
    }

    pub fn services(&self) -> &ServiceList {
        &self.services
    }

    /// Publish failure domains; an explicit list in the spec wins over discovery
    async fn setup(&self) -> Result<(), ReconcileError> {
        let domains: FailureDomains = match &self.scope.spec().failure_domains {
            Some(domains) => domains.clone(),
            None => self
                .zones
                .zones(self.scope.location())
                .await
                .map_err(|e| e.wrap("zones"))?
                .into_iter()
                .map(|zone| {
                    (
                        zone,
                        FailureDomainSpec {
                            control_plane: true,
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        };
        debug!(zones = domains.len(), "Resolved failure domains");
        self.scope.update_status(|s| s.failure_domains = domains);
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for AzureClusterService {
    #[instrument(skip(self), fields(cluster = %self.scope.cluster_name()))]
    async fn reconcile(&self) -> Result<(), ReconcileError> {
        self.setup().await?;
        self.services.reconcile_all().await
    }

    async fn pause(&self) -> Result<(), ReconcileError> {
        self.services.pause_all().await
    }

    #[instrument(skip(self), fields(cluster = %self.scope.cluster_name()))]
    async fn delete(&self) -> Result<(), ReconcileError> {
        match DeleteMode::choose(&self.policy, self.scope.as_ref()) {
            DeleteMode::Individual => self.services.delete_all_reverse().await,
            DeleteMode::Group => {
                info!("Deleting cluster resource group");
                self.services.delete_named(&GROUP_DELETE_ORDER).await?;
                // Everything else went with the group
                self.scope.set_resource_statuses(Vec::new());
                Ok(())
            }
        }
    }
}

fn vnet_owner<'a>(scope: &ClusterScope, vnet: &'a str) -> VnetOwner<'a> {
    if scope.is_vnet_managed() {
        VnetOwner::Managed(vnet)
    } else {
        VnetOwner::External(crate::specs::network_resource_id(
            scope.subscription_id(),
            &scope.vnet_resource_group(),
            "virtualNetworks",
            vnet,
        ))
    }
}

/// Rules of a control plane security group without user rules
fn default_control_plane_rules() -> Vec<SecurityRule> {
    vec![
        SecurityRule {
            name: "allow_ssh".to_string(),
            protocol: "Tcp".to_string(),
            direction: "Inbound".to_string(),
            priority: 2200,
            source: Some("*".to_string()),
            destination_ports: Some("22".to_string()),
            action: "Allow".to_string(),
        },
        SecurityRule {
            name: "allow_apiserver".to_string(),
            protocol: "Tcp".to_string(),
            direction: "Inbound".to_string(),
            priority: 2201,
            source: Some("*".to_string()),
            destination_ports: Some(API_SERVER_PORT.to_string()),
            action: "Allow".to_string(),
        },
    ]
}

fn nat_gateway_ip_name(nat_gateway: &str) -> String {
    format!("{nat_gateway}-pip")
}

fn bastion_ip_name(bastion: &str) -> String {
    format!("{bastion}-pip")
}

fn resource_groups(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    Ok(vec![network::resource_group(
        &scope.resource_group(),
        scope.location(),
        &scope.tags(None),
    )])
}

fn virtual_networks(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    if !scope.is_vnet_managed() {
        return Ok(Vec::new());
    }
    Ok(vec![network::virtual_network(
        &scope.vnet_name(),
        &scope.resource_group(),
        scope.location(),
        &scope.spec().network_spec.vnet.cidr_blocks,
        &scope.tags(None),
    )])
}

fn security_groups(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let mut seen = BTreeSet::new();
    let mut objects = Vec::new();
    for subnet in &scope.spec().network_spec.subnets {
        let Some(nsg) = &subnet.security_group else {
            continue;
        };
        if !seen.insert(nsg.name.clone()) {
            continue;
        }
        objects.push(network::security_group(
            &nsg.name,
            &scope.resource_group(),
            scope.location(),
            &scope.tags(None),
        ));
        let rules = if nsg.security_rules.is_empty() && subnet.role == SubnetRole::ControlPlane {
            default_control_plane_rules()
        } else {
            nsg.security_rules.clone()
        };
        objects.extend(rules.iter().map(|r| network::security_rule(&nsg.name, r)));
    }
    Ok(objects)
}

fn route_tables(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let names: BTreeSet<&String> = scope
        .spec()
        .network_spec
        .subnets
        .iter()
        .filter_map(|s| s.route_table.as_ref())
        .collect();
    Ok(names
        .into_iter()
        .map(|name| {
            network::route_table(name, &scope.resource_group(), scope.location(), &scope.tags(None))
        })
        .collect())
}

fn public_ips(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let group = scope.resource_group();
    let tags = scope.tags(None);
    let zones = scope.zones();
    let mut objects = Vec::new();

    if let Some(name) = scope.api_server_public_ip_name() {
        objects.push(network::public_ip(
            &name,
            &group,
            scope.location(),
            Some(&scope.api_server_dns_label()),
            &zones,
            &tags,
        ));
    }
    let nat_gateways: BTreeSet<&String> = scope
        .spec()
        .network_spec
        .subnets
        .iter()
        .filter_map(|s| s.nat_gateway.as_ref().map(|n| &n.name))
        .collect();
    for nat in nat_gateways {
        objects.push(network::public_ip(
            &nat_gateway_ip_name(nat),
            &group,
            scope.location(),
            None,
            &zones,
            &tags,
        ));
    }
    if let Some(bastion) = &scope.spec().bastion_spec {
        if let Some(name) = &bastion.name {
            objects.push(network::public_ip(
                &bastion_ip_name(name),
                &group,
                scope.location(),
                None,
                &[],
                &tags,
            ));
        }
    }
    Ok(objects)
}

fn nat_gateways(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let names: BTreeSet<&String> = scope
        .spec()
        .network_spec
        .subnets
        .iter()
        .filter_map(|s| s.nat_gateway.as_ref().map(|n| &n.name))
        .collect();
    Ok(names
        .into_iter()
        .map(|name| {
            network::nat_gateway(
                name,
                &scope.resource_group(),
                scope.location(),
                &nat_gateway_ip_name(name),
                &scope.tags(None),
            )
        })
        .collect())
}

fn subnets(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let vnet = scope.vnet_name();
    let owner = vnet_owner(scope, &vnet);
    let mut objects: Vec<DynamicObject> = scope
        .spec()
        .network_spec
        .subnets
        .iter()
        .map(|subnet| {
            network::subnet(
                &network::subnet_object_name(&vnet, &subnet.name),
                &subnet.name,
                &owner,
                &subnet.cidr_blocks,
                &SubnetAttachments {
                    security_group: subnet.security_group.as_ref().map(|g| g.name.as_str()),
                    route_table: subnet.route_table.as_deref(),
                    nat_gateway: subnet.nat_gateway.as_ref().map(|n| n.name.as_str()),
                },
            )
        })
        .collect();
    if let Some(cidr) = scope
        .spec()
        .bastion_spec
        .as_ref()
        .and_then(|b| b.subnet_cidr_block.clone())
    {
        objects.push(network::subnet(
            &network::subnet_object_name(&vnet, BASTION_SUBNET_NAME),
            BASTION_SUBNET_NAME,
            &owner,
            &[cidr],
            &SubnetAttachments::default(),
        ));
    }
    Ok(objects)
}

fn vnet_peerings(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let vnet = scope.vnet_name();
    let owner = vnet_owner(scope, &vnet);
    Ok(scope
        .spec()
        .network_spec
        .vnet
        .peerings
        .iter()
        .map(|peering| {
            let remote_group = peering
                .resource_group
                .clone()
                .unwrap_or_else(|| scope.resource_group());
            let remote_id = crate::specs::network_resource_id(
                scope.subscription_id(),
                &remote_group,
                "virtualNetworks",
                &peering.remote_vnet_name,
            );
            network::vnet_peering(&vnet, &owner, &remote_id, &peering.remote_vnet_name)
        })
        .collect())
}

fn load_balancers(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let name = scope.api_server_lb_name();
    let lb_id = scope.network_id("loadBalancers", &name);
    let vnet = scope.vnet_name();

    let public_ip = scope.api_server_public_ip_name();
    let internal_ip = scope.internal_lb_ip();
    let cp_subnet = scope
        .spec()
        .control_plane_subnet()
        .map(|s| network::subnet_object_name(&vnet, &s.name))
        .unwrap_or_default();
    let frontend = match &public_ip {
        Some(pip) => LoadBalancerFrontend::Public { public_ip: pip },
        None => LoadBalancerFrontend::Internal {
            subnet: &cp_subnet,
            address: &internal_ip,
        },
    };

    Ok(vec![network::api_server_load_balancer(
        &name,
        &scope.resource_group(),
        scope.location(),
        &lb_id,
        &frontend,
        API_SERVER_PORT,
        &scope.tags(Some("control-plane")),
    )])
}

fn private_dns(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let Some(zone) = scope.private_dns_zone() else {
        return Ok(Vec::new());
    };
    let vnet = scope.vnet_name();
    Ok(vec![
        network::private_dns_zone(&zone, &scope.resource_group(), &scope.tags(None)),
        network::private_dns_link(&zone, &vnet, &vnet_owner(scope, &vnet)),
        network::private_dns_record(&zone, API_SERVER_DNS_HOST, &scope.internal_lb_ip()),
    ])
}

fn bastion_hosts(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let Some(name) = scope.spec().bastion_spec.as_ref().and_then(|b| b.name.as_ref()) else {
        return Ok(Vec::new());
    };
    Ok(vec![network::bastion_host(
        name,
        &scope.resource_group(),
        scope.location(),
        &bastion_ip_name(name),
        &network::subnet_object_name(&scope.vnet_name(), BASTION_SUBNET_NAME),
        &scope.tags(None),
    )])
}

fn private_endpoints(scope: &ClusterScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let vnet = scope.vnet_name();
    Ok(scope
        .spec()
        .private_endpoints
        .iter()
        .map(|pe| {
            network::private_endpoint(
                &pe.name,
                &scope.resource_group(),
                scope.location(),
                &network::subnet_object_name(&vnet, &pe.subnet_name),
                &pe.private_link_service_id,
                &pe.group_ids,
                &scope.tags(None),
            )
        })
        .collect())
}
