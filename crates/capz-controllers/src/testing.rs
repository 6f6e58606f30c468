//! Fakes and fixtures shared by the controller tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use k8s_openapi::ByteString;
use kube::api::{DynamicObject, ObjectMeta};
use kube::core::ApiResource;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use mockall::mock;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use capz_aso::{DeleteOutcome, ResourceClient, ResourceWatcher};
use capz_common::crd::{
    AzureASOManagedCluster, AzureASOManagedClusterSpec, AzureCluster, AzureClusterIdentity,
    AzureClusterSpec, AzureMachine, AzureMachineSpec, AzureManagedControlPlane,
    AzureManagedControlPlaneSpec, Cluster, ClusterSpec, ClusterStatus, Machine, MachineSpec,
};
use capz_common::events::EventPublisher;
use capz_common::{Error, ReconcileError, CAPI_GROUP, CLUSTER_NAME_LABEL};
use capz_services::{
    AsoManagedClusterScope, ClusterScope, MachineScope, ManagedControlPlaneScope, Orchestrator,
};

use crate::context::{Context, Orchestrators};
use crate::kube_client::{InfraKind, KubeClient};

pub const NAMESPACE: &str = "default";

// =============================================================================
// Orchestrator mock
// =============================================================================

mock! {
    pub Orchestrator {}

    #[async_trait]
    impl Orchestrator for Orchestrator {
        async fn reconcile(&self) -> Result<(), ReconcileError>;
        async fn pause(&self) -> Result<(), ReconcileError>;
        async fn delete(&self) -> Result<(), ReconcileError>;
    }
}

/// Factories that hand out `orchestrator` for every kind
pub fn orchestrators_with(orchestrator: Arc<dyn Orchestrator>) -> Orchestrators {
    let cluster = orchestrator.clone();
    let machine = orchestrator.clone();
    let managed = orchestrator.clone();
    let aso = orchestrator;
    Orchestrators {
        cluster: Arc::new(move |_: Arc<ClusterScope>| -> Arc<dyn Orchestrator> { cluster.clone() }),
        machine: Arc::new(move |_: Arc<MachineScope>| -> Arc<dyn Orchestrator> { machine.clone() }),
        managed_control_plane: Arc::new(
            move |_: Arc<ManagedControlPlaneScope>| -> Arc<dyn Orchestrator> { managed.clone() },
        ),
        aso_managed_cluster: Arc::new(
            move |_: Arc<AsoManagedClusterScope>| -> Arc<dyn Orchestrator> { aso.clone() },
        ),
    }
}

/// An orchestrator whose `reconcile` returns `result` once per call
pub fn reconciling(result: fn() -> Result<(), ReconcileError>) -> Arc<dyn Orchestrator> {
    let mut mock = MockOrchestrator::new();
    mock.expect_reconcile().returning(move || result());
    Arc::new(mock)
}

/// An orchestrator whose calls never return
pub struct Stalled;

#[async_trait]
impl Orchestrator for Stalled {
    async fn reconcile(&self) -> Result<(), ReconcileError> {
        std::future::pending().await
    }

    async fn pause(&self) -> Result<(), ReconcileError> {
        std::future::pending().await
    }

    async fn delete(&self) -> Result<(), ReconcileError> {
        std::future::pending().await
    }
}

// =============================================================================
// Kubernetes fake
// =============================================================================

/// In-memory Kubernetes API
///
/// Objects are keyed by name; every write is recorded in `calls` so tests can
/// assert ordering.
#[derive(Default)]
pub struct FakeKube {
    pub clusters: Mutex<BTreeMap<String, Cluster>>,
    pub machines: Mutex<BTreeMap<String, Machine>>,
    pub azure_clusters: Mutex<BTreeMap<String, AzureCluster>>,
    pub identities: Mutex<BTreeMap<String, AzureClusterIdentity>>,
    pub secrets: Mutex<BTreeMap<String, Secret>>,
    pub calls: Mutex<Vec<String>>,
    pub statuses: Mutex<Vec<serde_json::Value>>,
    pub specs: Mutex<Vec<serde_json::Value>>,
    pub fail_status: Mutex<bool>,
}

impl FakeKube {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_cluster(&self, cluster: Cluster) {
        self.clusters.lock().insert(cluster.name_any(), cluster);
    }

    pub fn add_machine(&self, machine: Machine) {
        self.machines.lock().insert(machine.name_any(), machine);
    }

    pub fn add_azure_cluster(&self, obj: AzureCluster) {
        self.azure_clusters.lock().insert(obj.name_any(), obj);
    }

    /// Store a secret with one data key
    pub fn add_secret(&self, name: &str, key: &str, value: &[u8]) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                key.to_string(),
                ByteString(value.to_vec()),
            )])),
            ..Default::default()
        };
        self.secrets.lock().insert(name.to_string(), secret);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// The last status written, as `T`
    pub fn last_status<T: DeserializeOwned>(&self) -> T {
        let status = self
            .statuses
            .lock()
            .last()
            .cloned()
            .expect("a status should have been written");
        serde_json::from_value(status).expect("status should deserialize")
    }

    pub fn specs(&self) -> Vec<serde_json::Value> {
        self.specs.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_cluster(&self, _namespace: &str, name: &str) -> Result<Option<Cluster>, Error> {
        Ok(self.clusters.lock().get(name).cloned())
    }

    async fn get_machine(&self, _namespace: &str, name: &str) -> Result<Option<Machine>, Error> {
        Ok(self.machines.lock().get(name).cloned())
    }

    async fn get_azure_cluster(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<AzureCluster>, Error> {
        Ok(self.azure_clusters.lock().get(name).cloned())
    }

    async fn get_identity(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<AzureClusterIdentity>, Error> {
        Ok(self.identities.lock().get(name).cloned())
    }

    async fn get_secret(&self, _namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.secrets.lock().get(name).cloned())
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        self.record(format!("apply_secret:{}", secret.name_any()));
        self.secrets
            .lock()
            .insert(secret.name_any(), secret.clone());
        Ok(())
    }

    async fn patch_status(
        &self,
        kind: InfraKind,
        _namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<(), Error> {
        if *self.fail_status.lock() {
            return Err(Error::internal("status patch rejected"));
        }
        self.record(format!("patch_status:{kind}/{name}"));
        self.statuses.lock().push(status.clone());
        Ok(())
    }

    async fn patch_spec(
        &self,
        kind: InfraKind,
        _namespace: &str,
        name: &str,
        spec: &serde_json::Value,
    ) -> Result<(), Error> {
        self.record(format!("patch_spec:{kind}/{name}"));
        self.specs.lock().push(spec.clone());
        Ok(())
    }

    async fn add_finalizer(
        &self,
        kind: InfraKind,
        _namespace: &str,
        name: &str,
        _finalizer: &str,
    ) -> Result<(), Error> {
        self.record(format!("add_finalizer:{kind}/{name}"));
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        kind: InfraKind,
        _namespace: &str,
        name: &str,
        _finalizer: &str,
    ) -> Result<(), Error> {
        self.record(format!("remove_finalizer:{kind}/{name}"));
        Ok(())
    }
}

// =============================================================================
// ASO fake
// =============================================================================

/// In-memory ASO API
///
/// Applied objects come back ready unless their name is in `not_ready`;
/// deletes of names in `slow_delete` report `Deleting`.
#[derive(Default)]
pub struct FakeAso {
    pub objects: Mutex<BTreeMap<(String, String), DynamicObject>>,
    pub applied: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub not_ready: Mutex<Vec<String>>,
    pub failed: Mutex<Vec<String>>,
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
        let ready = if self.failed.lock().contains(&name) {
            serde_json::json!({
                "type": "Ready",
                "status": "False",
                "severity": "Error",
                "reason": "BadRequest",
                "message": "invalid location",
                "observedGeneration": 1
            })
        } else {
            let status = if self.not_ready.lock().contains(&name) {
                "False"
            } else {
                "True"
            };
            serde_json::json!({"type": "Ready", "status": status, "observedGeneration": 1})
        };
        stored.data["status"] = serde_json::json!({ "conditions": [ready] });
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
        Ok(self
            .objects
            .lock()
            .get(&(ar.kind.clone(), name.to_string()))
            .cloned())
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

// =============================================================================
// Events
// =============================================================================

/// Records `(type, reason)` of every published event
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(EventType, String)>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(t, _)| *t == EventType::Warning)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.events.lock().push((type_, reason.to_string()));
    }
}

/// Everything a controller test drives and inspects
pub struct Harness {
    pub ctx: Arc<Context>,
    pub kube: Arc<FakeKube>,
    pub aso: Arc<FakeAso>,
    pub events: Arc<RecordingEvents>,
}

impl Harness {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self::build(FakeKube::new(), orchestrators_with(orchestrator))
    }

    /// Harness around an existing fake, for orchestrators that inspect it
    pub fn build(kube: Arc<FakeKube>, orchestrators: Orchestrators) -> Self {
        let aso = FakeAso::new();
        let events = Arc::new(RecordingEvents::default());
        let ctx = Context::for_testing(kube.clone(), aso.clone(), orchestrators, events.clone());
        Self {
            ctx: Arc::new(ctx),
            kube,
            aso,
            events,
        }
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        Arc::get_mut(&mut self.ctx)
            .expect("context is not shared yet")
            .reconcile_timeout = timeout;
        self
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn meta(name: &str, uid: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some(uid.to_string()),
        ..Default::default()
    }
}

fn owner_ref(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: format!("{CAPI_GROUP}/v1beta1"),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("{name}-uid"),
        controller: Some(true),
        ..Default::default()
    }
}

/// Add a Cluster API owner reference
pub fn owned_by<K: Resource>(mut obj: K, kind: &str, name: &str) -> K {
    obj.meta_mut()
        .owner_references
        .get_or_insert_with(Vec::new)
        .push(owner_ref(kind, name));
    obj
}

/// Mark as carrying the kind's finalizer
pub fn with_finalizer<K: Resource>(mut obj: K, kind: InfraKind) -> K {
    obj.meta_mut()
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(kind.finalizer());
    obj
}

/// Mark as being deleted
pub fn deleting<K: Resource>(mut obj: K) -> K {
    obj.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
    obj
}

pub fn capi_cluster(name: &str) -> Cluster {
    let mut cluster = Cluster::new(name, ClusterSpec::default());
    cluster.metadata = meta(name, &format!("{name}-uid"));
    cluster.spec.infrastructure_ref = Some(ObjectReference {
        kind: Some("AzureCluster".to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    });
    cluster
}

/// Cluster whose infrastructure Cluster API considers ready
pub fn ready_cluster(name: &str) -> Cluster {
    let mut cluster = capi_cluster(name);
    cluster.status = Some(ClusterStatus {
        infrastructure_ready: true,
        ..Default::default()
    });
    cluster
}

pub fn paused_cluster(name: &str) -> Cluster {
    let mut cluster = capi_cluster(name);
    cluster.spec.paused = true;
    cluster
}

pub fn cluster_spec() -> AzureClusterSpec {
    AzureClusterSpec {
        location: "eastus".to_string(),
        subscription_id: "sub".to_string(),
        ..Default::default()
    }
}

/// AzureCluster `name` owned by Cluster `name`
pub fn azure_cluster(name: &str) -> AzureCluster {
    let mut obj = AzureCluster::new(name, cluster_spec());
    obj.metadata = meta(name, "azure-cluster-uid");
    owned_by(obj, "Cluster", name)
}

/// Machine of cluster `prod`, bootstrapped unless `bootstrap` is `None`
pub fn machine(name: &str, bootstrap: Option<&str>) -> Machine {
    let mut machine = Machine::new(
        name,
        MachineSpec {
            cluster_name: "prod".to_string(),
            ..Default::default()
        },
    );
    machine.metadata = meta(name, &format!("{name}-uid"));
    machine.spec.bootstrap.data_secret_name = bootstrap.map(str::to_string);
    machine
}

/// AzureMachine `name` owned by Machine `name` in cluster `prod`
pub fn azure_machine(name: &str) -> AzureMachine {
    let mut obj = AzureMachine::new(
        name,
        AzureMachineSpec {
            vm_size: "Standard_D2s_v3".to_string(),
            ssh_public_key: "c3NoLXJzYQ==".to_string(),
            ..Default::default()
        },
    );
    obj.metadata = meta(name, "azure-machine-uid");
    obj.metadata.labels = Some(BTreeMap::from([(
        CLUSTER_NAME_LABEL.to_string(),
        "prod".to_string(),
    )]));
    owned_by(obj, "Machine", name)
}

/// AzureManagedControlPlane `name` owned by Cluster `name`
pub fn control_plane(name: &str) -> AzureManagedControlPlane {
    let mut obj = AzureManagedControlPlane::new(
        name,
        AzureManagedControlPlaneSpec {
            location: "eastus".to_string(),
            resource_group_name: format!("{name}-rg"),
            subscription_id: "sub".to_string(),
            version: "v1.29.2".to_string(),
            ..Default::default()
        },
    );
    obj.metadata = meta(name, "control-plane-uid");
    owned_by(obj, "Cluster", name)
}

/// AzureASOManagedCluster `name` owned by Cluster `name`
pub fn aso_managed_cluster(name: &str, resources: Vec<serde_json::Value>) -> AzureASOManagedCluster {
    let mut obj = AzureASOManagedCluster::new(
        name,
        AzureASOManagedClusterSpec {
            resources,
            ..Default::default()
        },
    );
    obj.metadata = meta(name, "aso-managed-uid");
    owned_by(obj, "Cluster", name)
}

/// An ASO resource group manifest
pub fn resource_group(name: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "resources.azure.com/v1api20200601",
        "kind": "ResourceGroup",
        "metadata": {"name": name},
        "spec": {"location": "eastus"}
    })
}
