//! Service capability traits and the ordered service list
//!
//! A service manages one Azure resource kind for its owner. Every service can
//! reconcile and delete; pausing is an optional capability discovered at
//! runtime through [`ServiceReconciler::as_pauser`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use capz_common::{Error, ReconcileError};

/// One step of an orchestrated reconcile
#[async_trait]
pub trait ServiceReconciler: Send + Sync {
    /// Stable name used for lookup and error context (e.g. `virtualnetworks`)
    fn name(&self) -> &str;

    /// Bring the Azure resources of this service to their desired state
    async fn reconcile(&self) -> Result<(), ReconcileError>;

    /// Delete the Azure resources of this service
    async fn delete(&self) -> Result<(), ReconcileError>;

    /// The pause capability, if this service has one
    fn as_pauser(&self) -> Option<&dyn Pauser> {
        None
    }
}

/// Services that can stop Azure-side reconciliation of their resources
#[async_trait]
pub trait Pauser: Send + Sync {
    /// Pause the resources of this service
    async fn pause(&self) -> Result<(), ReconcileError>;
}

/// Services in reconcile order, fixed at construction
#[derive(Clone, Default)]
pub struct ServiceList {
    services: Vec<Arc<dyn ServiceReconciler>>,
}

impl ServiceList {
    /// Create a list; `services` is the reconcile order
    pub fn new(services: Vec<Arc<dyn ServiceReconciler>>) -> Self {
        Self { services }
    }

    /// Service names in reconcile order
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    /// Look up a service by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ServiceReconciler>> {
        self.services.iter().find(|s| s.name() == name)
    }

    /// Reconcile every service in order, stopping at the first failure
    ///
    /// Services that already succeeded are not rolled back.
    pub async fn reconcile_all(&self) -> Result<(), ReconcileError> {
        for service in &self.services {
            debug!(service = %service.name(), "Reconciling service");
            service
                .reconcile()
                .await
                .map_err(|e| e.wrap(service.name()))?;
        }
        Ok(())
    }

    /// Pause every service that supports it, in order
    pub async fn pause_all(&self) -> Result<(), ReconcileError> {
        for service in &self.services {
            let Some(pauser) = service.as_pauser() else {
                debug!(service = %service.name(), "Service has no pause capability");
                continue;
            };
            pauser.pause().await.map_err(|e| e.wrap(service.name()))?;
        }
        Ok(())
    }

    /// Delete every service in reverse order, stopping at the first failure
    pub async fn delete_all_reverse(&self) -> Result<(), ReconcileError> {
        for service in self.services.iter().rev() {
            debug!(service = %service.name(), "Deleting service");
            service.delete().await.map_err(|e| e.wrap(service.name()))?;
        }
        Ok(())
    }

    /// Delete the named services in the given order
    ///
    /// Every name must be in the list; a missing one is an internal error
    /// raised before anything is deleted.
    pub async fn delete_named(&self, names: &[&str]) -> Result<(), ReconcileError> {
        let mut services = Vec::with_capacity(names.len());
        for name in names {
            let service = self.get(name).ok_or_else(|| {
                ReconcileError::from(Error::internal_with_context(
                    "orchestrator",
                    format!("service {name} not found"),
                ))
            })?;
            services.push(service);
        }
        for service in services {
            info!(service = %service.name(), "Deleting service");
            service.delete().await.map_err(|e| e.wrap(service.name()))?;
        }
        Ok(())
    }
}

/// Hand-written service fakes that record what the list called on them
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Shared call log, entries are `<op>:<service>`
    pub type CallLog = Arc<Mutex<Vec<String>>>;

    pub struct RecordingService {
        pub name: String,
        pub log: CallLog,
        pub pausable: bool,
        pub fail_reconcile: Option<fn() -> ReconcileError>,
        pub fail_delete: Option<fn() -> ReconcileError>,
    }

    impl RecordingService {
        pub fn new(name: &str, log: &CallLog) -> Self {
            Self {
                name: name.to_string(),
                log: log.clone(),
                pausable: true,
                fail_reconcile: None,
                fail_delete: None,
            }
        }

        pub fn arc(self) -> Arc<dyn ServiceReconciler> {
            Arc::new(self)
        }

        fn record(&self, op: &str) {
            self.log.lock().push(format!("{op}:{}", self.name));
        }
    }

    #[async_trait]
    impl ServiceReconciler for RecordingService {
        fn name(&self) -> &str {
            &self.name
        }

        async fn reconcile(&self) -> Result<(), ReconcileError> {
            self.record("reconcile");
            match self.fail_reconcile {
                Some(err) => Err(err()),
                None => Ok(()),
            }
        }

        async fn delete(&self) -> Result<(), ReconcileError> {
            self.record("delete");
            match self.fail_delete {
                Some(err) => Err(err()),
                None => Ok(()),
            }
        }

        fn as_pauser(&self) -> Option<&dyn Pauser> {
            if self.pausable {
                Some(self)
            } else {
                None
            }
        }
    }

    #[async_trait]
    impl Pauser for RecordingService {
        async fn pause(&self) -> Result<(), ReconcileError> {
            self.record("pause");
            Ok(())
        }
    }

    pub fn new_log() -> CallLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn calls(log: &CallLog) -> Vec<String> {
        log.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::time::Duration;

    fn list(names: &[&str], log: &CallLog) -> ServiceList {
        ServiceList::new(
            names
                .iter()
                .map(|n| RecordingService::new(n, log).arc())
                .collect(),
        )
    }

    // ==========================================================================
    // Story Tests: Ordering
    // ==========================================================================

    /// Story: Individual delete walks the list in exact reverse order
    #[tokio::test]
    async fn story_delete_is_reverse_of_reconcile() {
        let log = new_log();
        let services = list(&["groups", "vnet", "subnets", "lb"], &log);

        services.reconcile_all().await.unwrap();
        services.delete_all_reverse().await.unwrap();

        assert_eq!(
            calls(&log),
            vec![
                "reconcile:groups",
                "reconcile:vnet",
                "reconcile:subnets",
                "reconcile:lb",
                "delete:lb",
                "delete:subnets",
                "delete:vnet",
                "delete:groups",
            ]
        );
    }

    /// Story: The first failing service stops the reconcile and names itself
    #[tokio::test]
    async fn story_reconcile_fails_fast_with_service_name() {
        let log = new_log();
        let mut vnet = RecordingService::new("vnet", &log);
        vnet.fail_reconcile =
            Some(|| ReconcileError::transient("vnet provisioning", Duration::from_secs(20)));
        let services = ServiceList::new(vec![
            RecordingService::new("groups", &log).arc(),
            vnet.arc(),
            RecordingService::new("subnets", &log).arc(),
        ]);

        let err = services.reconcile_all().await.unwrap_err();

        assert_eq!(calls(&log), vec!["reconcile:groups", "reconcile:vnet"]);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(20)));
        assert!(err.to_string().starts_with("vnet: "));
    }

    /// Story: Delete stops at the first failure too
    #[tokio::test]
    async fn story_delete_fails_fast() {
        let log = new_log();
        let mut subnets = RecordingService::new("subnets", &log);
        subnets.fail_delete = Some(|| ReconcileError::terminal("InUse", "subnet in use"));
        let services = ServiceList::new(vec![
            RecordingService::new("vnet", &log).arc(),
            subnets.arc(),
            RecordingService::new("lb", &log).arc(),
        ]);

        let err = services.delete_all_reverse().await.unwrap_err();

        assert_eq!(calls(&log), vec!["delete:lb", "delete:subnets"]);
        match err {
            ReconcileError::Terminal { reason, message } => {
                assert_eq!(reason, "InUse");
                assert_eq!(message, "subnets: subnet in use");
            }
            other => panic!("Expected Terminal, got {other:?}"),
        }
    }

    // ==========================================================================
    // Story Tests: Pause capability
    // ==========================================================================

    /// Story: Services without the pause capability are skipped silently
    #[tokio::test]
    async fn story_pause_skips_services_without_capability() {
        let log = new_log();
        let mut fixed = RecordingService::new("privatedns", &log);
        fixed.pausable = false;
        let services = ServiceList::new(vec![
            RecordingService::new("groups", &log).arc(),
            fixed.arc(),
        ]);

        services.pause_all().await.unwrap();

        assert_eq!(calls(&log), vec!["pause:groups"]);
    }

    #[tokio::test]
    async fn test_pause_of_empty_list_is_ok() {
        ServiceList::default().pause_all().await.unwrap();
    }

    // ==========================================================================
    // Story Tests: Named delete
    // ==========================================================================

    /// Story: Named delete runs in the given order, not list order
    #[tokio::test]
    async fn story_named_delete_uses_requested_order() {
        let log = new_log();
        let services = list(&["resourcegroups", "virtualnetworks", "vnetpeerings"], &log);

        services
            .delete_named(&["vnetpeerings", "resourcegroups"])
            .await
            .unwrap();

        assert_eq!(
            calls(&log),
            vec!["delete:vnetpeerings", "delete:resourcegroups"]
        );
    }

    /// Story: A missing service is an internal error and nothing is deleted
    #[tokio::test]
    async fn story_named_delete_of_missing_service_is_fatal() {
        let log = new_log();
        let services = list(&["vnetpeerings"], &log);

        let err = services
            .delete_named(&["vnetpeerings", "resourcegroups"])
            .await
            .unwrap_err();

        assert!(calls(&log).is_empty());
        match err {
            ReconcileError::Fatal(Error::Internal { message, .. }) => {
                assert!(message.contains("resourcegroups"));
            }
            other => panic!("Expected Fatal internal error, got {other:?}"),
        }
    }

    #[test]
    fn test_get_and_names() {
        let log = new_log();
        let services = list(&["a", "b"], &log);
        assert_eq!(services.names(), vec!["a", "b"]);
        assert!(services.get("b").is_some());
        assert!(services.get("c").is_none());
    }
}
