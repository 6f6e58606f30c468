//! AzureMachine CRD: one virtual machine backing a Cluster API Machine

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, MachineAddress, ResourceStatus};
use crate::Error;

/// Failure reason recorded when a machine cannot be reconciled anymore
pub const UPDATE_ERROR_FAILURE_REASON: &str = "UpdateError";

/// Prefix of Azure provider IDs
pub const PROVIDER_ID_PREFIX: &str = "azure://";

/// AzureMachine defines the virtual machine for a Cluster API Machine.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureMachine",
    namespaced,
    status = "AzureMachineStatus",
    shortname = "azm",
    category = "cluster-api",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.vmState"}"#,
    printcolumn = r#"{"name":"Size","type":"string","jsonPath":".spec.vmSize"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachineSpec {
    /// Azure VM size (e.g. Standard_D2s_v3)
    pub vm_size: String,

    /// OS image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,

    /// OS disk
    #[serde(default)]
    pub os_disk: OsDisk,

    /// Base64-encoded SSH public key
    #[serde(default)]
    pub ssh_public_key: String,

    /// Give the VM a public IP
    #[serde(rename = "allocatePublicIP", default)]
    pub allocate_public_ip: bool,

    /// Subnet for the VM NIC (defaults by machine role)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_name: Option<String>,

    /// Availability zone (overridden by the Machine's failure domain)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,

    /// Provider ID, set once the VM exists
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Extra tags applied to the VM and its NIC
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,

    /// VM extensions to install
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vm_extensions: Vec<VmExtensionSpec>,
}

/// OS image reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// ARM ID of a custom image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Marketplace image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace: Option<MarketplaceImage>,
}

/// Azure marketplace image
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceImage {
    /// Publisher
    pub publisher: String,
    /// Offer
    pub offer: String,
    /// SKU
    pub sku: String,
    /// Version
    pub version: String,
}

/// OS disk configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    /// Disk size in GB
    #[serde(rename = "diskSizeGB", default = "default_disk_size")]
    pub disk_size_gb: i32,

    /// Managed disk storage account type
    #[serde(default = "default_storage_account_type")]
    pub storage_account_type: String,
}

impl Default for OsDisk {
    fn default() -> Self {
        Self {
            disk_size_gb: default_disk_size(),
            storage_account_type: default_storage_account_type(),
        }
    }
}

fn default_disk_size() -> i32 {
    128
}

fn default_storage_account_type() -> String {
    "Premium_LRS".to_string()
}

/// VM extension
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmExtensionSpec {
    /// Extension name
    pub name: String,
    /// Publisher
    pub publisher: String,
    /// Extension type handler version
    pub version: String,
    /// Public settings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

/// Observed state of an AzureMachine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachineStatus {
    /// Whether the VM is provisioned
    #[serde(default)]
    pub ready: bool,

    /// Addresses of the VM
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Provisioning state reported by Azure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_state: Option<String>,

    /// Terminal failure reason for Cluster API remediation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// ASO resources owned by this machine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,
}

impl AzureMachineSpec {
    /// Validate the spec
    pub fn validate(&self) -> Result<(), Error> {
        if self.vm_size.is_empty() {
            return Err(Error::validation("vmSize cannot be empty"));
        }
        if let Some(image) = &self.image {
            if image.id.is_some() == image.marketplace.is_some() {
                return Err(Error::validation(
                    "image must set exactly one of id or marketplace",
                ));
            }
        }
        if self.os_disk.disk_size_gb <= 0 {
            return Err(Error::validation("osDisk.diskSizeGB must be positive"));
        }
        let mut names = std::collections::HashSet::new();
        for ext in &self.vm_extensions {
            if !names.insert(ext.name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate VM extension: {}",
                    ext.name
                )));
            }
        }
        Ok(())
    }
}

/// Build the provider ID for a VM ARM ID
pub fn provider_id_for(vm_id: &str) -> String {
    format!("{PROVIDER_ID_PREFIX}{vm_id}")
}
