//! Shared controller context
//!
//! Everything a reconcile needs beyond the object itself: API seams, the
//! credential cache, and the factories that build an orchestrator from a
//! scope. Factories are injected so tests can swap in mocks.

use std::sync::Arc;
use std::time::Duration;

use kube::Client;

use capz_aso::{KubeResourceClient, ResourceClient, ResourceWatcher, WatchRegistry};
use capz_common::events::{EventPublisher, KubeEventPublisher};
use capz_services::cluster_service::{self, AzureClusterService};
use capz_services::managed_service::{self, AzureManagedControlPlaneService};
use capz_services::{
    AsoManagedClusterScope, AzureCredentials, AzureMachineService, ClusterScope, MachineScope,
    ManagedControlPlaneScope, Orchestrator, ScopeHandles, StaticZoneResolver, ZoneResolver,
};

use crate::azure_aso_managed_cluster::AsoResourcesOrchestrator;
use crate::credentials::CredentialCache;
use crate::kube_client::{KubeClient, KubeClientImpl};

/// Name the controllers report events as
pub const CONTROLLER_NAME: &str = "capz-controller";

/// Deadline of a single reconcile
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(90);

/// Delay before polling again on a transient condition
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(15);

/// Resync period after a successful reconcile
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(600);

/// Builds the orchestrator of one owner from its scope
pub type OrchestratorFactory<S> = Arc<dyn Fn(Arc<S>) -> Arc<dyn Orchestrator> + Send + Sync>;

/// Orchestrator factories, one per infrastructure kind
#[derive(Clone)]
pub struct Orchestrators {
    pub cluster: OrchestratorFactory<ClusterScope>,
    pub machine: OrchestratorFactory<MachineScope>,
    pub managed_control_plane: OrchestratorFactory<ManagedControlPlaneScope>,
    pub aso_managed_cluster: OrchestratorFactory<AsoManagedClusterScope>,
}

impl Orchestrators {
    /// The production orchestrators, with `zones` for availability zone discovery
    pub fn new(zones: Arc<dyn ZoneResolver>) -> Self {
        Self {
            cluster: Arc::new(move |scope: Arc<ClusterScope>| -> Arc<dyn Orchestrator> {
                Arc::new(AzureClusterService::new(
                    scope,
                    zones.clone(),
                    cluster_service::default_delete_policy(),
                ))
            }),
            machine: Arc::new(|scope: Arc<MachineScope>| -> Arc<dyn Orchestrator> {
                Arc::new(AzureMachineService::new(scope))
            }),
            managed_control_plane: Arc::new(
                |scope: Arc<ManagedControlPlaneScope>| -> Arc<dyn Orchestrator> {
                    Arc::new(AzureManagedControlPlaneService::new(
                        scope,
                        managed_service::default_delete_policy(),
                    ))
                },
            ),
            aso_managed_cluster: Arc::new(
                |scope: Arc<AsoManagedClusterScope>| -> Arc<dyn Orchestrator> {
                    Arc::new(AsoResourcesOrchestrator::new(scope))
                },
            ),
        }
    }
}

/// Controller context for the infrastructure controllers
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client)
///     .watcher(registry.clone())
///     .reconcile_timeout(Duration::from_secs(60))
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// ASO object client handed to scopes
    pub aso: Arc<dyn ResourceClient>,
    /// Watch registry for ASO kinds
    pub watcher: Arc<dyn ResourceWatcher>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Resolved identities
    pub credentials: CredentialCache,
    /// Orchestrator factories
    pub orchestrators: Orchestrators,
    /// Deadline of a single reconcile
    pub reconcile_timeout: Duration,
    /// Delay before polling again on a transient condition
    pub requeue_after: Duration,
    /// Resync period after a successful reconcile
    pub sync_period: Duration,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Scope handles for an owner with resolved `credentials`
    pub fn handles(&self, credentials: AzureCredentials) -> ScopeHandles {
        ScopeHandles {
            client: self.aso.clone(),
            watcher: self.watcher.clone(),
            credentials,
            requeue_after: self.requeue_after,
        }
    }

    /// Create a context for testing with mock clients
    ///
    /// Events are recorded; ASO watches are ignored.
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        aso: Arc<dyn ResourceClient>,
        orchestrators: Orchestrators,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            kube,
            aso,
            watcher: Arc::new(crate::testing::NoopWatcher),
            events,
            credentials: CredentialCache::new(),
            orchestrators,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            requeue_after: DEFAULT_REQUEUE_AFTER,
            sync_period: DEFAULT_SYNC_PERIOD,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    aso: Option<Arc<dyn ResourceClient>>,
    watcher: Option<Arc<dyn ResourceWatcher>>,
    events: Option<Arc<dyn EventPublisher>>,
    zones: Option<Arc<dyn ZoneResolver>>,
    orchestrators: Option<Orchestrators>,
    pod_name: Option<String>,
    reconcile_timeout: Duration,
    requeue_after: Duration,
    sync_period: Duration,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            aso: None,
            watcher: None,
            events: None,
            zones: None,
            orchestrators: None,
            pod_name: None,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            requeue_after: DEFAULT_REQUEUE_AFTER,
            sync_period: DEFAULT_SYNC_PERIOD,
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the ASO object client
    pub fn resource_client(mut self, aso: Arc<dyn ResourceClient>) -> Self {
        self.aso = Some(aso);
        self
    }

    /// Set the ASO watch registry shared with the controller runner
    pub fn watcher(mut self, watcher: Arc<dyn ResourceWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Availability zone source for the default cluster orchestrator
    pub fn zone_resolver(mut self, zones: Arc<dyn ZoneResolver>) -> Self {
        self.zones = Some(zones);
        self
    }

    /// Override every orchestrator factory
    pub fn orchestrators(mut self, orchestrators: Orchestrators) -> Self {
        self.orchestrators = Some(orchestrators);
        self
    }

    /// Pod name reported as the event instance
    pub fn pod_name(mut self, name: Option<String>) -> Self {
        self.pod_name = name;
        self
    }

    pub fn reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn requeue_after(mut self, delay: Duration) -> Self {
        self.requeue_after = delay;
        self
    }

    pub fn sync_period(mut self, period: Duration) -> Self {
        self.sync_period = period;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let zones = self
            .zones
            .unwrap_or_else(|| Arc::new(StaticZoneResolver::default()));
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            aso: self
                .aso
                .unwrap_or_else(|| Arc::new(KubeResourceClient::new(self.client.clone()))),
            watcher: self
                .watcher
                .unwrap_or_else(|| WatchRegistry::new(self.client.clone(), None)),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(
                    self.client.clone(),
                    CONTROLLER_NAME,
                    self.pod_name.clone(),
                ))
            }),
            credentials: CredentialCache::new(),
            orchestrators: self
                .orchestrators
                .unwrap_or_else(|| Orchestrators::new(zones)),
            reconcile_timeout: self.reconcile_timeout,
            requeue_after: self.requeue_after,
            sync_period: self.sync_period,
        }
    }
}
