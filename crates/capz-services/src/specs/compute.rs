//! Machine builders: network interface, virtual machine, extensions

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use serde_json::json;

use capz_common::crd::{ImageSpec, OsDisk, VmExtensionSpec};

use super::*;

/// Admin user created on every VM
pub const ADMIN_USERNAME: &str = "capi";

/// Marketplace image used when the machine doesn't name one
pub const DEFAULT_IMAGE: (&str, &str, &str, &str) =
    ("cncf-upstream", "capi", "ubuntu-2204-gen1", "latest");

/// Kubernetes name of a machine's NIC
pub fn nic_name(machine: &str) -> String {
    format!("{machine}-nic")
}

/// Kubernetes name of a machine's public IP
pub fn machine_public_ip_name(machine: &str) -> String {
    format!("{machine}-pip")
}

pub fn network_interface(
    name: &str,
    resource_group: &str,
    location: &str,
    subnet: &str,
    public_ip: Option<&str>,
    tags: &BTreeMap<String, String>,
) -> DynamicObject {
    let mut ip_config = json!({
        "name": "pipConfig",
        "primary": true,
        "privateIPAllocationMethod": "Dynamic",
        "subnet": {"reference": SUBNET.reference(subnet)},
    });
    if let Some(pip) = public_ip {
        ip_config["publicIPAddress"] = json!({"reference": PUBLIC_IP.reference(pip)});
    }
    NETWORK_INTERFACE.object(
        name,
        json!({
            "azureName": name,
            "owner": owner(resource_group),
            "location": location,
            "ipConfigurations": [ip_config],
            "tags": super::tags(tags),
        }),
    )
}

/// Everything that describes one VM
#[derive(Debug, Clone)]
pub struct VirtualMachineParams<'a> {
    pub name: &'a str,
    pub resource_group: &'a str,
    pub location: &'a str,
    pub vm_size: &'a str,
    pub image: Option<&'a ImageSpec>,
    pub os_disk: &'a OsDisk,
    pub ssh_public_key: &'a str,
    /// Base64-encoded bootstrap data
    pub custom_data: &'a str,
    pub nic: &'a str,
    pub zone: Option<&'a str>,
    pub tags: &'a BTreeMap<String, String>,
}

fn image_reference(image: Option<&ImageSpec>) -> serde_json::Value {
    match image {
        Some(ImageSpec { id: Some(id), .. }) => json!({"reference": arm_reference(id)}),
        Some(ImageSpec {
            marketplace: Some(m),
            ..
        }) => json!({
            "publisher": m.publisher,
            "offer": m.offer,
            "sku": m.sku,
            "version": m.version,
        }),
        _ => {
            let (publisher, offer, sku, version) = DEFAULT_IMAGE;
            json!({"publisher": publisher, "offer": offer, "sku": sku, "version": version})
        }
    }
}

pub fn virtual_machine(params: &VirtualMachineParams<'_>) -> DynamicObject {
    let mut spec = json!({
        "azureName": params.name,
        "owner": owner(params.resource_group),
        "location": params.location,
        "hardwareProfile": {"vmSize": params.vm_size},
        "osProfile": {
            "computerName": params.name,
            "adminUsername": ADMIN_USERNAME,
            "customData": params.custom_data,
            "linuxConfiguration": {
                "disablePasswordAuthentication": true,
                "ssh": {"publicKeys": [{
                    "path": format!("/home/{ADMIN_USERNAME}/.ssh/authorized_keys"),
                    "keyData": params.ssh_public_key,
                }]},
            },
        },
        "storageProfile": {
            "imageReference": image_reference(params.image),
            "osDisk": {
                "name": format!("{}_OSDisk", params.name),
                "createOption": "FromImage",
                "diskSizeGB": params.os_disk.disk_size_gb,
                "managedDisk": {"storageAccountType": params.os_disk.storage_account_type},
            },
        },
        "networkProfile": {
            "networkInterfaces": [{"reference": NETWORK_INTERFACE.reference(params.nic)}],
        },
        "tags": super::tags(params.tags),
    });
    if let Some(zone) = params.zone {
        spec["zones"] = json!([zone]);
    }
    VIRTUAL_MACHINE.object(params.name, spec)
}

pub fn vm_extension(vm: &str, location: &str, ext: &VmExtensionSpec) -> DynamicObject {
    VM_EXTENSION.object(
        &format!("{vm}-{}", ext.name.to_lowercase()),
        json!({
            "azureName": ext.name,
            "owner": owner(vm),
            "location": location,
            "publisher": ext.publisher,
            "type": ext.name,
            "typeHandlerVersion": ext.version,
            "settings": ext.settings,
        }),
    )
}
