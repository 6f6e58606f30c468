//! Leader election using Kubernetes Leases
//!
//! Only the replica holding the `coordination.k8s.io/v1` Lease runs the
//! controllers. Writes carry the lease's resourceVersion, so two replicas
//! racing for an expired lease see one success and one 409.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Error;

/// Default lease name for the operator
pub const LEADER_LEASE_NAME: &str = "capz-controller-leader";

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// What to do with the lease as observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseDecision {
    /// No lease yet: create it
    Create,
    /// We hold it: bump renewTime
    Renew,
    /// Expired: take it over, bumping transitions
    TakeOver {
        /// Transition count after takeover
        transitions: i32,
    },
    /// Held by a live replica
    Wait,
}

/// Decide how `identity` should treat `lease` at `now`
pub fn decide(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let Some(lease) = lease else {
        return LeaseDecision::Create;
    };
    let spec = lease.spec.as_ref();

    if spec.and_then(|s| s.holder_identity.as_deref()) == Some(identity) {
        return LeaseDecision::Renew;
    }

    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (renew_time, duration_secs) {
        (Some(rt), Some(duration)) => now > rt.0 + chrono::Duration::seconds(duration as i64),
        _ => true,
    };

    if expired {
        LeaseDecision::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0) + 1,
        }
    } else {
        LeaseDecision::Wait
    }
}

/// Leader elector using Kubernetes Leases
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
    is_leader: Arc<AtomicBool>,
}

impl LeaderElector {
    /// Create a new leader elector with default timing (30s lease, 10s renew, 5s retry)
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: LEASE_DURATION,
            renew_interval: RENEW_INTERVAL,
            retry_interval: RETRY_INTERVAL,
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether this replica currently holds the lease
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Block until leadership is acquired, then return a guard that keeps renewing
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            "Waiting for leadership..."
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    self.is_leader.store(true, Ordering::SeqCst);
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(
                        identity = %self.identity,
                        retry_secs = self.retry_interval.as_secs(),
                        "Lease held by another replica, waiting..."
                    );
                }
                Err(e) => {
                    warn!(
                        identity = %self.identity,
                        error = %e,
                        retry_secs = self.retry_interval.as_secs(),
                        "Failed to acquire lease, retrying..."
                    );
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, Error> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();
        let existing = api.get_opt(&self.lease_name).await?;

        let lease = match decide(existing.as_ref(), &self.identity, now) {
            LeaseDecision::Wait => return Ok(false),
            LeaseDecision::Create => {
                let lease = self.lease(None, now, 0);
                return match api.create(&PostParams::default(), &lease).await {
                    Ok(_) => {
                        info!(identity = %self.identity, "Created new lease");
                        Ok(true)
                    }
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
                    Err(e) => Err(e.into()),
                };
            }
            LeaseDecision::Renew => {
                let mut renewed = existing.unwrap_or_default();
                if let Some(spec) = renewed.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                renewed
            }
            LeaseDecision::TakeOver { transitions } => {
                let rv = existing.and_then(|l| l.metadata.resource_version);
                info!(identity = %self.identity, transitions, "Taking over expired lease");
                self.lease(rv, now, transitions)
            }
        };

        match api
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease changed underneath us");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lease(&self, resource_version: Option<String>, now: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(self.renew_interval).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(identity = %self.identity, "Leadership lost");
                    self.is_leader.store(false, Ordering::SeqCst);
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release_lease(&self) -> Result<(), Error> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let Some(lease) = api.get_opt(&self.lease_name).await? else {
            return Ok(());
        };

        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.identity.as_str()) {
            return Ok(());
        }

        let past = Utc::now() - chrono::Duration::seconds(60);
        let patch = json!({
            "metadata": { "resourceVersion": lease.metadata.resource_version },
            "spec": {
                "holderIdentity": null,
                "renewTime": past.to_rfc3339()
            }
        });
        api.patch(&self.lease_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        info!(identity = %self.identity, "Lease released for fast failover");
        Ok(())
    }
}

/// Guard that maintains leadership while it lives
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Release leadership by clearing the lease holder (graceful shutdown)
    pub async fn release_leadership(&self) -> Result<(), Error> {
        self.elector.release_lease().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.elector.is_leader.store(false, Ordering::SeqCst);
        self.renewal_task.abort();
        info!(identity = %self.elector.identity, "Leadership released");
    }
}
