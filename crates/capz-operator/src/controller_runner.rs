//! Controller runner - builds one controller future per infrastructure kind
//!
//! Every controller also receives reconcile requests from the ASO watch
//! registry, so a change on an Azure resource wakes its owner.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;

use capz_aso::WatchRegistry;
use capz_common::crd::{
    AzureASOManagedCluster, AzureCluster, AzureMachine, AzureManagedControlPlane, Cluster, Machine,
};
use capz_controllers::{
    azure_aso_managed_cluster, azure_cluster, azure_machine, azure_managed_control_plane, Context,
};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// The object of kind `K` a Cluster API reference points at
///
/// References without a namespace resolve in the referrer's namespace.
pub fn referenced<K>(
    reference: Option<&ObjectReference>,
    referrer_namespace: Option<String>,
) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    let reference = reference?;
    if reference.kind.as_deref() != Some(K::kind(&()).as_ref()) {
        return None;
    }
    let name = reference.name.as_deref()?;
    let namespace = reference.namespace.clone().or(referrer_namespace)?;
    Some(ObjectRef::new(name).within(&namespace))
}

/// Build all infrastructure controllers
pub fn build_controllers(
    client: Client,
    ctx: Arc<Context>,
    registry: Arc<WatchRegistry>,
    namespace: Option<&str>,
) -> Vec<ControllerFuture> {
    let cluster_ctrl = Controller::new(api::<AzureCluster>(&client, namespace), watcher_config())
        .watches(
            api::<Cluster>(&client, namespace),
            watcher_config(),
            |cluster| {
                let ns = cluster.namespace();
                referenced::<AzureCluster>(cluster.spec.infrastructure_ref.as_ref(), ns)
            },
        )
        .reconcile_on(registry.subscribe::<AzureCluster>())
        .shutdown_on_signal()
        .run(azure_cluster::reconcile, azure_cluster::error_policy, ctx.clone())
        .for_each(log_reconcile_result("AzureCluster"));

    let machine_ctrl = Controller::new(api::<AzureMachine>(&client, namespace), watcher_config())
        .watches(
            api::<Machine>(&client, namespace),
            watcher_config(),
            |machine| {
                let ns = machine.namespace();
                referenced::<AzureMachine>(machine.spec.infrastructure_ref.as_ref(), ns)
            },
        )
        .reconcile_on(registry.subscribe::<AzureMachine>())
        .shutdown_on_signal()
        .run(azure_machine::reconcile, azure_machine::error_policy, ctx.clone())
        .for_each(log_reconcile_result("AzureMachine"));

    let control_plane_ctrl = Controller::new(
        api::<AzureManagedControlPlane>(&client, namespace),
        watcher_config(),
    )
    .watches(
        api::<Cluster>(&client, namespace),
        watcher_config(),
        |cluster| {
            let ns = cluster.namespace();
            referenced::<AzureManagedControlPlane>(cluster.spec.control_plane_ref.as_ref(), ns)
        },
    )
    .reconcile_on(registry.subscribe::<AzureManagedControlPlane>())
    .shutdown_on_signal()
    .run(
        azure_managed_control_plane::reconcile,
        azure_managed_control_plane::error_policy,
        ctx.clone(),
    )
    .for_each(log_reconcile_result("AzureManagedControlPlane"));

    let aso_ctrl = Controller::new(
        api::<AzureASOManagedCluster>(&client, namespace),
        watcher_config(),
    )
    .watches(
        api::<Cluster>(&client, namespace),
        watcher_config(),
        |cluster| {
            let ns = cluster.namespace();
            referenced::<AzureASOManagedCluster>(cluster.spec.infrastructure_ref.as_ref(), ns)
        },
    )
    .reconcile_on(registry.subscribe::<AzureASOManagedCluster>())
    .shutdown_on_signal()
    .run(
        azure_aso_managed_cluster::reconcile,
        azure_aso_managed_cluster::error_policy,
        ctx,
    )
    .for_each(log_reconcile_result("AzureASOManagedCluster"));

    tracing::info!("- AzureCluster controller");
    tracing::info!("- AzureMachine controller");
    tracing::info!("- AzureManagedControlPlane controller");
    tracing::info!("- AzureASOManagedCluster controller");

    vec![
        Box::pin(cluster_ctrl),
        Box::pin(machine_ctrl),
        Box::pin(control_plane_ctrl),
        Box::pin(aso_ctrl),
    ]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: Debug, E: Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
