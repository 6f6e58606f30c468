use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use parking_lot::RwLock;

use capz_aso::ResourceClient;
use capz_common::crd::{
    provider_id_for, AzureClusterSpec, AzureMachine, AzureMachineSpec, AzureMachineStatus,
    Cluster, Machine, MachineAddress, ResourceStatus,
};
use capz_common::kube_utils::build_api_resource;
use capz_common::Error;

use super::{cluster_tags, controller_reference, namespace_of, AsoScope, ScopeHandles};
use crate::specs::compute::nic_name;
use crate::specs::{AsoKind, NETWORK_INTERFACE, VIRTUAL_MACHINE};

/// What Azure reports about a machine's VM
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmObservation {
    /// `azure://` provider ID, once the VM has an ARM ID
    pub provider_id: Option<String>,
    /// Azure provisioning state
    pub state: Option<String>,
    /// Private addresses of the NIC
    pub addresses: Vec<MachineAddress>,
}

/// Scope of one AzureMachine reconcile
pub struct MachineScope {
    cluster: Cluster,
    machine: Machine,
    azure_machine: AzureMachine,
    cluster_spec: AzureClusterSpec,
    cluster_name: String,
    namespace: String,
    owner: OwnerReference,
    handles: ScopeHandles,
    bootstrap_data: Option<Vec<u8>>,
    status: RwLock<AzureMachineStatus>,
}

impl MachineScope {
    /// Build the scope
    ///
    /// `cluster_spec` is the owning AzureCluster's spec; its network defaults
    /// are resolved here so subnets resolve the same way as for the cluster.
    pub fn new(
        cluster: Cluster,
        machine: Machine,
        azure_machine: AzureMachine,
        cluster_spec: &AzureClusterSpec,
        handles: ScopeHandles,
    ) -> Result<Self, Error> {
        let cluster_name = cluster.name_any();
        let namespace = namespace_of(&azure_machine)?;
        let owner = controller_reference(&azure_machine)?;
        let status = azure_machine.status.clone().unwrap_or_default();
        Ok(Self {
            cluster_spec: cluster_spec.with_defaults(&cluster_name),
            cluster,
            machine,
            azure_machine,
            cluster_name,
            namespace,
            owner,
            handles,
            bootstrap_data: None,
            status: RwLock::new(status),
        })
    }

    /// Attach the raw bootstrap data read from the machine's data secret
    pub fn with_bootstrap_data(mut self, data: Vec<u8>) -> Self {
        self.bootstrap_data = Some(data);
        self
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn azure_machine(&self) -> &AzureMachine {
        &self.azure_machine
    }

    pub fn spec(&self) -> &AzureMachineSpec {
        &self.azure_machine.spec
    }

    /// VM name; the AzureMachine's name
    pub fn name(&self) -> String {
        self.azure_machine.name_any()
    }

    pub fn role(&self) -> &'static str {
        if self.machine.is_control_plane() {
            "control-plane"
        } else {
            "node"
        }
    }

    pub fn location(&self) -> &str {
        &self.cluster_spec.location
    }

    pub fn resource_group(&self) -> String {
        self.cluster_spec.resource_group_name(&self.cluster_name)
    }

    pub fn vnet_name(&self) -> String {
        self.cluster_spec
            .network_spec
            .vnet
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-vnet", self.cluster_name))
    }

    /// Subnet of the NIC: explicit, else by role
    pub fn subnet_name(&self) -> Result<String, Error> {
        if let Some(name) = &self.azure_machine.spec.subnet_name {
            return Ok(name.clone());
        }
        let subnet = if self.machine.is_control_plane() {
            self.cluster_spec.control_plane_subnet()
        } else {
            self.cluster_spec.node_subnet()
        };
        subnet.map(|s| s.name.clone()).ok_or_else(|| {
            Error::validation_for(
                self.name(),
                format!("cluster has no {} subnet", self.role()),
            )
        })
    }

    /// Zone of the VM; the Machine's failure domain wins
    pub fn zone(&self) -> Option<String> {
        self.machine
            .spec
            .failure_domain
            .clone()
            .or_else(|| self.azure_machine.spec.failure_domain.clone())
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.azure_machine.spec.additional_tags.clone();
        tags.extend(self.cluster_spec.additional_tags.clone());
        cluster_tags(&self.cluster_name, Some(self.role()), &tags)
    }

    /// Bootstrap data encoded as VM custom data
    pub fn custom_data(&self) -> Option<String> {
        self.bootstrap_data.as_ref().map(|d| STANDARD.encode(d))
    }

    pub fn provider_id(&self) -> Option<&str> {
        self.azure_machine.spec.provider_id.as_deref()
    }

    /// Snapshot of the status buffer
    pub fn status(&self) -> AzureMachineStatus {
        self.status.read().clone()
    }

    /// Mutate the status buffer
    pub fn update_status(&self, f: impl FnOnce(&mut AzureMachineStatus)) {
        f(&mut self.status.write());
    }

    async fn get(&self, kind: &AsoKind, name: &str) -> Result<Option<kube::api::DynamicObject>, Error> {
        let ar = build_api_resource(&kind.api_version(), kind.kind);
        self.handles.client.get(&ar, &self.namespace, name).await
    }

    /// Whether the VM's ASO object exists
    pub async fn vm_exists(&self) -> Result<bool, Error> {
        Ok(self.get(&VIRTUAL_MACHINE, &self.name()).await?.is_some())
    }

    /// Read provider ID, state and addresses from the VM and NIC objects
    pub async fn observe_vm(&self) -> Result<VmObservation, Error> {
        let mut observation = VmObservation::default();
        if let Some(vm) = self.get(&VIRTUAL_MACHINE, &self.name()).await? {
            observation.provider_id = vm
                .data
                .pointer("/status/id")
                .and_then(|v| v.as_str())
                .map(provider_id_for);
            observation.state = vm
                .data
                .pointer("/status/provisioningState")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
        if let Some(nic) = self.get(&NETWORK_INTERFACE, &nic_name(&self.name())).await? {
            let configs = nic
                .data
                .pointer("/status/ipConfigurations")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            observation.addresses = configs
                .iter()
                .filter_map(|c| c.get("privateIPAddress").and_then(|v| v.as_str()))
                .map(|address| MachineAddress {
                    type_: "InternalIP".to_string(),
                    address: address.to_string(),
                })
                .collect();
        }
        observation.addresses.insert(
            0,
            MachineAddress {
                type_: "Hostname".to_string(),
                address: self.name(),
            },
        );
        Ok(observation)
    }
}

impl AsoScope for MachineScope {
    fn handles(&self) -> &ScopeHandles {
        &self.handles
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn owner_reference(&self) -> &OwnerReference {
        &self.owner
    }

    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn resource_statuses(&self) -> Vec<ResourceStatus> {
        self.status.read().resources.clone()
    }

    fn set_resource_statuses(&self, statuses: Vec<ResourceStatus>) {
        self.status.write().resources = statuses;
    }
}
