//! Fakes and fixtures shared by the unit tests of this crate

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{DynamicObject, ObjectMeta};
use kube::core::ApiResource;
use kube::ResourceExt;
use parking_lot::Mutex;

use capz_aso::{DeleteOutcome, ResourceClient, ResourceWatcher};
use capz_common::crd::{
    AzureCluster, AzureClusterSpec, AzureMachine, AzureMachineSpec, AzureManagedControlPlane,
    AzureManagedControlPlaneSpec, Cluster, ClusterSpec, Machine, MachineSpec,
    CONTROL_PLANE_LABEL,
};
use capz_common::crd::IdentityType;
use capz_common::Error;

use crate::scope::{AzureCredentials, ScopeHandles};

/// In-memory ASO API
///
/// Applied objects are stored by kind and name. Objects come back ready
/// unless their name is in `not_ready`; deletes of names in `slow_delete`
/// report `Deleting` and leave the object in place.
#[derive(Default)]
pub struct FakeAso {
    pub objects: Mutex<BTreeMap<(String, String), DynamicObject>>,
    pub applied: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub not_ready: Mutex<Vec<String>>,
    pub slow_delete: Mutex<Vec<String>>,
}

impl FakeAso {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed an object as if ASO had created it
    pub fn insert(&self, kind: &str, name: &str, data: serde_json::Value) {
        let obj = DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data,
        };
        self.objects
            .lock()
            .insert((kind.to_string(), name.to_string()), obj);
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Applied object of `kind` named `name`
    pub fn object(&self, kind: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .get(&(kind.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ResourceClient for FakeAso {
    async fn apply(
        &self,
        obj: &DynamicObject,
        ar: &ApiResource,
        _force: bool,
    ) -> Result<DynamicObject, Error> {
        let name = obj.name_any();
        self.applied.lock().push(format!("{}/{name}", ar.kind));

        let mut stored = obj.clone();
        stored.metadata.generation = Some(1);
        let status = if self.not_ready.lock().contains(&name) {
            "False"
        } else {
            "True"
        };
        stored.data["status"] = serde_json::json!({
            "conditions": [{"type": "Ready", "status": status, "observedGeneration": 1}]
        });
        self.objects
            .lock()
            .insert((ar.kind.clone(), name), stored.clone());
        Ok(stored)
    }

    async fn get(
        &self,
        ar: &ApiResource,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.object(&ar.kind, name))
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        _namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome, Error> {
        self.deleted.lock().push(format!("{}/{name}", ar.kind));
        if self.slow_delete.lock().iter().any(|n| n == name) {
            return Ok(DeleteOutcome::Deleting);
        }
        let removed = self
            .objects
            .lock()
            .remove(&(ar.kind.clone(), name.to_string()));
        Ok(match removed {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }
}

/// Watcher that ignores every request
pub struct NoopWatcher;

impl ResourceWatcher for NoopWatcher {
    fn watch(&self, _ar: &ApiResource) {}
}

pub fn credentials() -> AzureCredentials {
    AzureCredentials {
        subscription_id: "00000000-0000-0000-0000-000000000001".to_string(),
        tenant_id: "tenant".to_string(),
        client_id: "client".to_string(),
        identity_type: IdentityType::ServicePrincipal,
        aso_secret: Some("prod-aso-credentials".to_string()),
    }
}

pub fn handles(client: Arc<FakeAso>) -> ScopeHandles {
    ScopeHandles {
        client,
        watcher: Arc::new(NoopWatcher),
        credentials: credentials(),
        requeue_after: Duration::from_secs(15),
    }
}

fn meta(name: &str, uid: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        uid: Some(uid.to_string()),
        ..Default::default()
    }
}

pub fn capi_cluster(name: &str) -> Cluster {
    let mut cluster = Cluster::new(name, ClusterSpec::default());
    cluster.metadata = meta(name, "cluster-uid");
    cluster
}

pub fn cluster_spec() -> AzureClusterSpec {
    AzureClusterSpec {
        location: "eastus".to_string(),
        subscription_id: "sub".to_string(),
        ..Default::default()
    }
}

pub fn azure_cluster(name: &str, spec: AzureClusterSpec) -> AzureCluster {
    let mut obj = AzureCluster::new(name, spec);
    obj.metadata = meta(name, "azure-cluster-uid");
    obj
}

pub fn machine(name: &str, control_plane: bool) -> Machine {
    let mut machine = Machine::new(
        name,
        MachineSpec {
            cluster_name: "prod".to_string(),
            failure_domain: Some("2".to_string()),
            ..Default::default()
        },
    );
    machine.metadata = meta(name, "machine-uid");
    if control_plane {
        machine
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(CONTROL_PLANE_LABEL.to_string(), String::new());
    }
    machine
}

pub fn azure_machine(name: &str, spec: AzureMachineSpec) -> AzureMachine {
    let mut obj = AzureMachine::new(name, spec);
    obj.metadata = meta(name, "azure-machine-uid");
    obj
}

pub fn machine_spec() -> AzureMachineSpec {
    AzureMachineSpec {
        vm_size: "Standard_D2s_v3".to_string(),
        ssh_public_key: "c3NoLXJzYQ==".to_string(),
        ..Default::default()
    }
}

pub fn control_plane(name: &str, spec: AzureManagedControlPlaneSpec) -> AzureManagedControlPlane {
    let mut obj = AzureManagedControlPlane::new(name, spec);
    obj.metadata = meta(name, "control-plane-uid");
    obj
}
