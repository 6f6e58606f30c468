//! AzureManagedControlPlane orchestration
//!
//! AKS needs a resource group, a virtual network with one subnet for the
//! system pool, and the managed cluster itself. ASO exports the admin
//! kubeconfig to a secret next to the control plane object.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::{debug, info, instrument};

use capz_common::crd::INVALID_SPEC_REASON;
use capz_common::ReconcileError;

use crate::aso_service::{AsoService, SpecBuilder};
use crate::orchestrator::{DeleteMode, DeletePolicy, Orchestrator, RESOURCE_GROUPS_SERVICE};
use crate::scope::{AsoScope, ManagedControlPlaneScope};
use crate::service::{ServiceList, ServiceReconciler};
use crate::specs::managed::{self, ManagedClusterParams};
use crate::specs::network::{self, subnet_object_name, SubnetAttachments, VnetOwner};
use crate::specs::{AsoKind, MANAGED_CLUSTER, RESOURCE_GROUP, SUBNET, VIRTUAL_NETWORK};

/// Services of an AzureManagedControlPlane in reconcile order
pub const MANAGED_SERVICES: [&str; 4] = [
    RESOURCE_GROUPS_SERVICE,
    "virtualnetworks",
    "subnets",
    "managedclusters",
];

/// Delete individually unless the control plane created its resource group
pub fn should_delete_individually(scope: &ManagedControlPlaneScope) -> bool {
    let group = scope.resource_group();
    !scope
        .resource_statuses()
        .iter()
        .any(|s| RESOURCE_GROUP.matches(s) && s.name == group)
}

/// The default [`DeletePolicy`] for managed control planes
pub fn default_delete_policy() -> DeletePolicy<ManagedControlPlaneScope> {
    Arc::new(should_delete_individually)
}

fn invalid_spec(err: capz_common::Error) -> ReconcileError {
    ReconcileError::terminal(INVALID_SPEC_REASON, err.to_string())
}

/// Orchestrator of an AKS control plane's Azure resources
pub struct AzureManagedControlPlaneService {
    scope: Arc<ManagedControlPlaneScope>,
    policy: DeletePolicy<ManagedControlPlaneScope>,
    services: ServiceList,
}

fn service(
    name: &'static str,
    kinds: &'static [AsoKind],
    build: SpecBuilder<ManagedControlPlaneScope>,
    scope: &Arc<ManagedControlPlaneScope>,
) -> Arc<dyn ServiceReconciler> {
    Arc::new(AsoService::new(name, kinds, build, scope.clone()))
}

impl AzureManagedControlPlaneService {
    pub fn new(
        scope: Arc<ManagedControlPlaneScope>,
        policy: DeletePolicy<ManagedControlPlaneScope>,
    ) -> Self {
        let services = ServiceList::new(vec![
            service(RESOURCE_GROUPS_SERVICE, &[RESOURCE_GROUP], resource_groups, &scope),
            service("virtualnetworks", &[VIRTUAL_NETWORK], virtual_networks, &scope),
            service("subnets", &[SUBNET], subnets, &scope),
            service("managedclusters", &[MANAGED_CLUSTER], managed_clusters, &scope),
        ]);
        Self {
            scope,
            policy,
            services,
        }
    }

    pub fn services(&self) -> &ServiceList {
        &self.services
    }
}

#[async_trait]
impl Orchestrator for AzureManagedControlPlaneService {
    #[instrument(skip(self), fields(cluster = %self.scope.cluster_name()))]
    async fn reconcile(&self) -> Result<(), ReconcileError> {
        let version = self.scope.version().map_err(invalid_spec)?;
        debug!(%version, dns_prefix = %self.scope.dns_prefix(), "Resolved control plane settings");
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
                info!(resource_group = %self.scope.resource_group(), "Deleting control plane resource group");
                self.services.delete_named(&[RESOURCE_GROUPS_SERVICE]).await?;
                self.scope.set_resource_statuses(Vec::new());
                Ok(())
            }
        }
    }
}

fn resource_groups(
    scope: &ManagedControlPlaneScope,
) -> Result<Vec<DynamicObject>, ReconcileError> {
    Ok(vec![network::resource_group(
        scope.resource_group(),
        scope.location(),
        &scope.tags(),
    )])
}

fn virtual_networks(
    scope: &ManagedControlPlaneScope,
) -> Result<Vec<DynamicObject>, ReconcileError> {
    Ok(vec![network::virtual_network(
        &scope.vnet_name(),
        scope.resource_group(),
        scope.location(),
        &[scope.spec().virtual_network.cidr_block.clone()],
        &scope.tags(),
    )])
}

fn subnets(scope: &ManagedControlPlaneScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let vnet = scope.vnet_name();
    let subnet = scope.subnet_name();
    Ok(vec![network::subnet(
        &subnet_object_name(&vnet, &subnet),
        &subnet,
        &VnetOwner::Managed(&vnet),
        &[scope.spec().virtual_network.subnet.cidr_block.clone()],
        &SubnetAttachments::default(),
    )])
}

fn managed_clusters(
    scope: &ManagedControlPlaneScope,
) -> Result<Vec<DynamicObject>, ReconcileError> {
    let version = scope.version().map_err(invalid_spec)?;
    let spec = scope.spec();
    let name = scope.name();
    let subnet = subnet_object_name(&scope.vnet_name(), &scope.subnet_name());
    let tags = scope.tags();
    Ok(vec![managed::managed_cluster(&ManagedClusterParams {
        name: &name,
        cluster_name: scope.cluster_name(),
        resource_group: scope.resource_group(),
        location: scope.location(),
        version: &version,
        dns_prefix: &scope.dns_prefix(),
        sku_tier: spec.sku.as_deref(),
        network_plugin: spec.network_plugin.as_deref(),
        system_pool: &spec.system_pool,
        subnet: &subnet,
        tags: &tags,
    })])
}

#[cfg(test)]
mod tests {
    use super::*;

    use capz_common::crd::AzureManagedControlPlaneSpec;

    use crate::testing::{capi_cluster, control_plane, handles, FakeAso};

    fn spec(version: &str) -> AzureManagedControlPlaneSpec {
        AzureManagedControlPlaneSpec {
            location: "westeurope".to_string(),
            resource_group_name: "prod-aks".to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    fn scope_with(fake: &Arc<FakeAso>, spec: AzureManagedControlPlaneSpec) -> Arc<ManagedControlPlaneScope> {
        Arc::new(
            ManagedControlPlaneScope::new(
                capi_cluster("prod"),
                control_plane("prod-cp", spec),
                handles(fake.clone()),
            )
            .unwrap(),
        )
    }

    fn orchestrator(scope: &Arc<ManagedControlPlaneScope>) -> AzureManagedControlPlaneService {
        AzureManagedControlPlaneService::new(scope.clone(), default_delete_policy())
    }

    // =========================================================================
    // Reconcile Stories
    // =========================================================================

    #[tokio::test]
    async fn story_aks_resources_are_applied_in_order() {
        let fake = FakeAso::new();
        let scope = scope_with(&fake, spec("v1.29.2"));

        orchestrator(&scope).reconcile().await.unwrap();

        assert_eq!(
            fake.applied(),
            vec![
                format!("{}/prod-aks", RESOURCE_GROUP.kind),
                format!("{}/prod-cp-vnet", VIRTUAL_NETWORK.kind),
                format!("{}/prod-cp-vnet-prod-cp-subnet", SUBNET.kind),
                format!("{}/prod-cp", MANAGED_CLUSTER.kind),
            ]
        );
    }

    #[tokio::test]
    async fn story_version_is_normalized_and_dns_prefix_defaulted() {
        let fake = FakeAso::new();
        let scope = scope_with(&fake, spec("v1.29.2"));

        orchestrator(&scope).reconcile().await.unwrap();

        let aks = fake.object(MANAGED_CLUSTER.kind, "prod-cp").unwrap();
        assert_eq!(aks.data["spec"]["kubernetesVersion"], "1.29.2");
        assert_eq!(aks.data["spec"]["dnsPrefix"], "prod-cp");
        assert_eq!(
            aks.data["spec"]["agentPoolProfiles"][0]["vnetSubnetReference"]["name"],
            "prod-cp-vnet-prod-cp-subnet"
        );
    }

    #[tokio::test]
    async fn story_invalid_version_is_terminal_before_any_apply() {
        let fake = FakeAso::new();
        let scope = scope_with(&fake, spec("latest"));

        let err = orchestrator(&scope).reconcile().await.unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Terminal { ref reason, .. } if reason == INVALID_SPEC_REASON
        ));
        assert!(fake.applied().is_empty());
    }

    // =========================================================================
    // Delete Stories
    // =========================================================================

    #[tokio::test]
    async fn story_owned_group_is_deleted_as_a_whole() {
        let fake = FakeAso::new();
        let scope = scope_with(&fake, spec("1.29.2"));
        let service = orchestrator(&scope);
        service.reconcile().await.unwrap();

        service.delete().await.unwrap();

        assert_eq!(fake.deleted(), vec![format!("{}/prod-aks", RESOURCE_GROUP.kind)]);
        assert!(scope.resource_statuses().is_empty());
    }

    #[tokio::test]
    async fn story_without_group_record_deletes_in_reverse() {
        let fake = FakeAso::new();
        let scope = scope_with(&fake, spec("1.29.2"));
        let service = AzureManagedControlPlaneService::new(scope.clone(), Arc::new(|_: &ManagedControlPlaneScope| true));
        service.reconcile().await.unwrap();

        service.delete().await.unwrap();

        assert_eq!(
            fake.deleted(),
            vec![
                format!("{}/prod-cp", MANAGED_CLUSTER.kind),
                format!("{}/prod-cp-vnet-prod-cp-subnet", SUBNET.kind),
                format!("{}/prod-cp-vnet", VIRTUAL_NETWORK.kind),
                format!("{}/prod-aks", RESOURCE_GROUP.kind),
            ]
        );
    }

    #[test]
    fn story_service_names_follow_reconcile_order() {
        let fake = FakeAso::new();
        let scope = scope_with(&fake, spec("1.29.2"));
        assert_eq!(orchestrator(&scope).services().names(), MANAGED_SERVICES);
    }
}
