//! Dynamic watches on ASO kinds
//!
//! ASO kinds are only known once an owner first applies them, so watches are
//! started lazily, one per kind. Every event is mapped back through the
//! object's controller owner reference into an [`OwnerTrigger`], which the
//! owning controller turns into a reconcile request.

use std::sync::Arc;

use dashmap::DashSet;
use futures::{Stream, StreamExt};
use kube::api::{Api, DynamicObject};
use kube::core::ApiResource;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use capz_common::kube_utils::parse_api_version;
use capz_common::INFRASTRUCTURE_GROUP;

const TRIGGER_BUFFER: usize = 1024;

/// An owner that must be reconciled because one of its ASO objects changed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerTrigger {
    /// Owner kind (e.g. `AzureCluster`)
    pub kind: String,
    /// Owner name
    pub name: String,
    /// Owner namespace (same as the ASO object's)
    pub namespace: String,
}

/// Starts watches for ASO kinds
#[cfg_attr(test, automock)]
pub trait ResourceWatcher: Send + Sync {
    /// Ensure a watch on `ar` is running
    fn watch(&self, ar: &ApiResource);
}

/// Map an ASO object to its infrastructure owner
pub fn owner_trigger(obj: &DynamicObject) -> Option<OwnerTrigger> {
    let namespace = obj.namespace()?;
    obj.owner_references()
        .iter()
        .filter(|r| r.controller == Some(true))
        .find(|r| parse_api_version(&r.api_version).0 == INFRASTRUCTURE_GROUP)
        .map(|r| OwnerTrigger {
            kind: r.kind.clone(),
            name: r.name.clone(),
            namespace,
        })
}

/// Turn raw triggers into reconcile requests for the kind `K`
pub fn triggers_for<K>(rx: broadcast::Receiver<OwnerTrigger>) -> impl Stream<Item = ObjectRef<K>>
where
    K: Resource<DynamicType = ()> + 'static,
{
    let kind = K::kind(&()).to_string();
    BroadcastStream::new(rx).filter_map(move |trigger| {
        let kind = kind.clone();
        async move {
            match trigger {
                Ok(t) if t.kind == kind => Some(ObjectRef::new(&t.name).within(&t.namespace)),
                Ok(_) => None,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Dropped ASO watch triggers");
                    None
                }
            }
        }
    })
}

/// [`ResourceWatcher`] that runs kube watchers and fans events out to owners
pub struct WatchRegistry {
    client: Client,
    namespace: Option<String>,
    watched: DashSet<String>,
    triggers: broadcast::Sender<OwnerTrigger>,
}

impl WatchRegistry {
    /// Create a registry; `namespace` restricts watches to one namespace
    pub fn new(client: Client, namespace: Option<String>) -> Arc<Self> {
        let (triggers, _) = broadcast::channel(TRIGGER_BUFFER);
        Arc::new(Self {
            client,
            namespace,
            watched: DashSet::new(),
            triggers,
        })
    }

    /// Reconcile requests for owners of kind `K`
    pub fn subscribe<K>(&self) -> impl Stream<Item = ObjectRef<K>>
    where
        K: Resource<DynamicType = ()> + 'static,
    {
        triggers_for(self.triggers.subscribe())
    }

    fn api(&self, ar: &ApiResource) -> Api<DynamicObject> {
        match &self.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }
}

impl ResourceWatcher for WatchRegistry {
    fn watch(&self, ar: &ApiResource) {
        let key = format!("{}/{}", ar.api_version, ar.kind);
        if !self.watched.insert(key.clone()) {
            return;
        }
        info!(resource = %key, "Starting ASO watch");

        let api = self.api(ar);
        let tx = self.triggers.clone();
        tokio::spawn(async move {
            let stream = watcher(api, watcher::Config::default().timeout(25))
                .default_backoff()
                .touched_objects();
            let mut stream = std::pin::pin!(stream);
            while let Some(event) = stream.next().await {
                match event {
                    Ok(obj) => {
                        if let Some(trigger) = owner_trigger(&obj) {
                            debug!(owner = %trigger.name, kind = %trigger.kind, "ASO object changed");
                            // No receivers just means no controller is running yet
                            let _ = tx.send(trigger);
                        }
                    }
                    Err(e) => warn!(resource = %key, error = %e, "ASO watch error"),
                }
            }
            warn!(resource = %key, "ASO watch ended");
        });
    }
}
