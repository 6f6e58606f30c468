//! AzureMachine orchestration
//!
//! A machine is a public IP (optional), a NIC in the cluster's subnet, the VM
//! and its extensions. Deletion always walks the list in reverse; a machine
//! never owns a resource group.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::{instrument, warn};

use capz_common::crd::INVALID_SPEC_REASON;
use capz_common::ReconcileError;

use crate::aso_service::{AsoService, SpecBuilder};
use crate::orchestrator::Orchestrator;
use crate::scope::{AsoScope, MachineScope};
use crate::service::{Pauser, ServiceList, ServiceReconciler};
use crate::specs::compute::{self, machine_public_ip_name, nic_name, VirtualMachineParams};
use crate::specs::network::{self, subnet_object_name};
use crate::specs::{AsoKind, NETWORK_INTERFACE, PUBLIC_IP, VIRTUAL_MACHINE, VM_EXTENSION};

/// Services of an AzureMachine in reconcile order
pub const MACHINE_SERVICES: [&str; 4] = [
    "publicips",
    "networkinterfaces",
    "virtualmachines",
    "vmextensions",
];

/// Orchestrator of one AzureMachine's Azure resources
pub struct AzureMachineService {
    scope: Arc<MachineScope>,
    services: ServiceList,
}

fn service(
    name: &'static str,
    kinds: &'static [AsoKind],
    build: SpecBuilder<MachineScope>,
    scope: &Arc<MachineScope>,
) -> Arc<dyn ServiceReconciler> {
    Arc::new(AsoService::new(name, kinds, build, scope.clone()))
}

impl AzureMachineService {
    pub fn new(scope: Arc<MachineScope>) -> Self {
        let services = ServiceList::new(vec![
            service("publicips", &[PUBLIC_IP], public_ips, &scope),
            service("networkinterfaces", &[NETWORK_INTERFACE], network_interfaces, &scope),
            Arc::new(VirtualMachineService::new(scope.clone())),
            service("vmextensions", &[VM_EXTENSION], vm_extensions, &scope),
        ]);
        Self { scope, services }
    }

    pub fn services(&self) -> &ServiceList {
        &self.services
    }
}

#[async_trait]
impl Orchestrator for AzureMachineService {
    #[instrument(skip(self), fields(machine = %self.scope.name()))]
    async fn reconcile(&self) -> Result<(), ReconcileError> {
        if self.scope.custom_data().is_none() {
            return Err(ReconcileError::transient(
                "waiting for bootstrap data",
                self.scope.requeue_after(),
            ));
        }
        self.services.reconcile_all().await
    }

    async fn pause(&self) -> Result<(), ReconcileError> {
        self.services.pause_all().await
    }

    #[instrument(skip(self), fields(machine = %self.scope.name()))]
    async fn delete(&self) -> Result<(), ReconcileError> {
        self.services.delete_all_reverse().await
    }
}

/// VM service that refuses to recreate a VM deleted behind our back
///
/// Once a machine has a provider ID its VM existed. If the ASO object is gone
/// now, applying it again would boot a fresh VM under an old identity.
struct VirtualMachineService {
    scope: Arc<MachineScope>,
    inner: AsoService<MachineScope>,
}

impl VirtualMachineService {
    fn new(scope: Arc<MachineScope>) -> Self {
        Self {
            inner: AsoService::new(
                "virtualmachines",
                &[VIRTUAL_MACHINE],
                virtual_machines,
                scope.clone(),
            ),
            scope,
        }
    }
}

#[async_trait]
impl ServiceReconciler for VirtualMachineService {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn reconcile(&self) -> Result<(), ReconcileError> {
        if let Some(provider_id) = self.scope.provider_id() {
            if !self.scope.vm_exists().await? {
                warn!(provider_id, "Virtual machine deleted out of band");
                return Err(ReconcileError::vm_deleted(format!(
                    "virtual machine {} ({provider_id}) no longer exists",
                    self.scope.name()
                )));
            }
        }
        self.inner.reconcile().await
    }

    async fn delete(&self) -> Result<(), ReconcileError> {
        self.inner.delete().await
    }

    fn as_pauser(&self) -> Option<&dyn Pauser> {
        self.inner.as_pauser()
    }
}

fn public_ips(scope: &MachineScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    if !scope.spec().allocate_public_ip {
        return Ok(Vec::new());
    }
    let zones: Vec<String> = scope.zone().into_iter().collect();
    Ok(vec![network::public_ip(
        &machine_public_ip_name(&scope.name()),
        &scope.resource_group(),
        scope.location(),
        None,
        &zones,
        &scope.tags(),
    )])
}

fn network_interfaces(scope: &MachineScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let subnet = scope
        .subnet_name()
        .map_err(|e| ReconcileError::terminal(INVALID_SPEC_REASON, e.to_string()))?;
    let name = scope.name();
    let public_ip = scope
        .spec()
        .allocate_public_ip
        .then(|| machine_public_ip_name(&name));
    Ok(vec![compute::network_interface(
        &nic_name(&name),
        &scope.resource_group(),
        scope.location(),
        &subnet_object_name(&scope.vnet_name(), &subnet),
        public_ip.as_deref(),
        &scope.tags(),
    )])
}

fn virtual_machines(scope: &MachineScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let custom_data = scope.custom_data().ok_or_else(|| {
        ReconcileError::transient("waiting for bootstrap data", scope.requeue_after())
    })?;
    let name = scope.name();
    let spec = scope.spec();
    let zone = scope.zone();
    let tags = scope.tags();
    Ok(vec![compute::virtual_machine(&VirtualMachineParams {
        name: &name,
        resource_group: &scope.resource_group(),
        location: scope.location(),
        vm_size: &spec.vm_size,
        image: spec.image.as_ref(),
        os_disk: &spec.os_disk,
        ssh_public_key: &spec.ssh_public_key,
        custom_data: &custom_data,
        nic: &nic_name(&name),
        zone: zone.as_deref(),
        tags: &tags,
    })])
}

fn vm_extensions(scope: &MachineScope) -> Result<Vec<DynamicObject>, ReconcileError> {
    let name = scope.name();
    Ok(scope
        .spec()
        .vm_extensions
        .iter()
        .map(|ext| compute::vm_extension(&name, scope.location(), ext))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    use capz_common::crd::{AzureMachineSpec, VmExtensionSpec};

    use crate::testing::{
        azure_machine, capi_cluster, cluster_spec, handles, machine, machine_spec, FakeAso,
    };

    fn scope_with(
        fake: &Arc<FakeAso>,
        spec: AzureMachineSpec,
        bootstrap: Option<&str>,
    ) -> Arc<MachineScope> {
        let scope = MachineScope::new(
            capi_cluster("prod"),
            machine("prod-md-0-abcde", false),
            azure_machine("prod-md-0-abcde", spec),
            &cluster_spec(),
            handles(fake.clone()),
        )
        .unwrap();
        Arc::new(match bootstrap {
            Some(data) => scope.with_bootstrap_data(data.as_bytes().to_vec()),
            None => scope,
        })
    }

    // =========================================================================
    // Reconcile Stories
    // =========================================================================

    #[tokio::test]
    async fn story_machine_resources_are_applied_in_order() {
        let fake = FakeAso::new();
        let mut spec = machine_spec();
        spec.allocate_public_ip = true;
        spec.vm_extensions = vec![VmExtensionSpec {
            name: "CustomScript".to_string(),
            publisher: "Microsoft.Azure.Extensions".to_string(),
            version: "2.1".to_string(),
            ..Default::default()
        }];
        let scope = scope_with(&fake, spec, Some("#cloud-config"));

        AzureMachineService::new(scope.clone())
            .reconcile()
            .await
            .unwrap();

        assert_eq!(
            fake.applied(),
            vec![
                format!("{}/prod-md-0-abcde-pip", PUBLIC_IP.kind),
                format!("{}/prod-md-0-abcde-nic", NETWORK_INTERFACE.kind),
                format!("{}/prod-md-0-abcde", VIRTUAL_MACHINE.kind),
                format!("{}/prod-md-0-abcde-customscript", VM_EXTENSION.kind),
            ]
        );
        assert_eq!(scope.resource_statuses().len(), 4);
    }

    #[tokio::test]
    async fn story_bootstrap_data_becomes_custom_data() {
        let fake = FakeAso::new();
        let scope = scope_with(&fake, machine_spec(), Some("#cloud-config"));

        AzureMachineService::new(scope).reconcile().await.unwrap();

        let vm = fake.object(VIRTUAL_MACHINE.kind, "prod-md-0-abcde").unwrap();
        assert_eq!(
            vm.data["spec"]["osProfile"]["customData"],
            "I2Nsb3VkLWNvbmZpZw=="
        );
        assert_eq!(vm.data["spec"]["zones"], serde_json::json!(["2"]));
    }

    #[tokio::test]
    async fn story_nic_joins_the_node_subnet_without_public_ip() {
        let fake = FakeAso::new();
        let scope = scope_with(&fake, machine_spec(), Some("data"));

        AzureMachineService::new(scope).reconcile().await.unwrap();

        assert!(fake.object(PUBLIC_IP.kind, "prod-md-0-abcde-pip").is_none());
        let nic = fake
            .object(NETWORK_INTERFACE.kind, "prod-md-0-abcde-nic")
            .unwrap();
        let config = &nic.data["spec"]["ipConfigurations"][0];
        assert_eq!(config["subnet"]["reference"]["name"], "prod-vnet-prod-node-subnet");
        assert!(config.get("publicIPAddress").is_none());
    }

    #[tokio::test]
    async fn story_missing_bootstrap_data_waits() {
        let fake = FakeAso::new();
        let scope = scope_with(&fake, machine_spec(), None);

        let err = AzureMachineService::new(scope).reconcile().await.unwrap_err();

        assert!(err.retry_after().is_some());
        assert!(fake.applied().is_empty());
    }

    #[tokio::test]
    async fn story_explicit_subnet_wins_over_role() {
        let fake = FakeAso::new();
        let mut spec = machine_spec();
        spec.subnet_name = Some("prod-controlplane-subnet".to_string());
        let scope = scope_with(&fake, spec, Some("data"));

        AzureMachineService::new(scope).reconcile().await.unwrap();

        let nic = fake
            .object(NETWORK_INTERFACE.kind, "prod-md-0-abcde-nic")
            .unwrap();
        assert_eq!(
            nic.data["spec"]["ipConfigurations"][0]["subnet"]["reference"]["name"],
            "prod-vnet-prod-controlplane-subnet"
        );
    }

    // =========================================================================
    // Out-of-band Deletion Stories
    // =========================================================================

    #[tokio::test]
    async fn story_vanished_vm_is_reported_not_recreated() {
        let fake = FakeAso::new();
        let mut spec = machine_spec();
        spec.provider_id = Some(
            "azure:///subscriptions/sub/resourceGroups/prod/providers/Microsoft.Compute/virtualMachines/prod-md-0-abcde"
                .to_string(),
        );
        let scope = scope_with(&fake, spec, Some("data"));

        let err = AzureMachineService::new(scope).reconcile().await.unwrap_err();

        assert!(matches!(err, ReconcileError::VmDeleted { .. }));
        assert!(err.to_string().contains("virtualmachines"));
        assert!(fake.object(VIRTUAL_MACHINE.kind, "prod-md-0-abcde").is_none());
    }

    #[tokio::test]
    async fn story_existing_vm_with_provider_id_reconciles() {
        let fake = FakeAso::new();
        fake.insert(VIRTUAL_MACHINE.kind, "prod-md-0-abcde", serde_json::json!({}));
        let mut spec = machine_spec();
        spec.provider_id = Some("azure:///vm".to_string());
        let scope = scope_with(&fake, spec, Some("data"));

        AzureMachineService::new(scope).reconcile().await.unwrap();

        assert!(fake
            .applied()
            .contains(&format!("{}/prod-md-0-abcde", VIRTUAL_MACHINE.kind)));
    }

    // =========================================================================
    // Delete Stories
    // =========================================================================

    #[tokio::test]
    async fn story_machine_deletes_in_reverse() {
        let fake = FakeAso::new();
        let mut spec = machine_spec();
        spec.allocate_public_ip = true;
        let scope = scope_with(&fake, spec, Some("data"));
        let service = AzureMachineService::new(scope.clone());
        service.reconcile().await.unwrap();

        service.delete().await.unwrap();

        assert_eq!(
            fake.deleted(),
            vec![
                format!("{}/prod-md-0-abcde", VIRTUAL_MACHINE.kind),
                format!("{}/prod-md-0-abcde-nic", NETWORK_INTERFACE.kind),
                format!("{}/prod-md-0-abcde-pip", PUBLIC_IP.kind),
            ]
        );
        assert!(scope.resource_statuses().is_empty());
    }

    #[test]
    fn story_service_names_follow_reconcile_order() {
        let fake = FakeAso::new();
        let scope = scope_with(&fake, machine_spec(), None);
        assert_eq!(AzureMachineService::new(scope).services().names(), MACHINE_SERVICES);
    }
}
