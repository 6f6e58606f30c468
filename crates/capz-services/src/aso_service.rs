//! Generic ASO-backed service
//!
//! An [`AsoService`] owns a fixed set of ASO kinds. It builds the desired
//! objects of those kinds from its scope and hands them to the engine
//! together with the status entries of the same kinds, leaving the entries
//! of every other service untouched.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::debug;

use capz_common::crd::ResourceStatus;
use capz_common::ReconcileError;

use crate::scope::AsoScope;
use crate::service::{Pauser, ServiceReconciler};
use crate::specs::AsoKind;

/// Builds the desired objects of a service from its scope
pub type SpecBuilder<S> = fn(&S) -> Result<Vec<DynamicObject>, ReconcileError>;

/// [`ServiceReconciler`] and [`Pauser`] over the ASO engine
pub struct AsoService<S: AsoScope> {
    name: &'static str,
    kinds: &'static [AsoKind],
    build: SpecBuilder<S>,
    scope: Arc<S>,
}

impl<S: AsoScope> AsoService<S> {
    /// Service `name` owning objects of `kinds`, built by `build`
    pub fn new(
        name: &'static str,
        kinds: &'static [AsoKind],
        build: SpecBuilder<S>,
        scope: Arc<S>,
    ) -> Self {
        Self {
            name,
            kinds,
            build,
            scope,
        }
    }

    fn owns(&self, status: &ResourceStatus) -> bool {
        self.kinds.iter().any(|k| k.matches(status))
    }

    /// Split the owner's statuses into this service's and everyone else's
    fn partition(&self) -> (Vec<ResourceStatus>, Vec<ResourceStatus>) {
        self.scope
            .resource_statuses()
            .into_iter()
            .partition(|s| self.owns(s))
    }

    fn store(&self, mut others: Vec<ResourceStatus>, mine: Vec<ResourceStatus>) {
        others.extend(mine);
        self.scope.set_resource_statuses(others);
    }
}

#[async_trait]
impl<S: AsoScope + 'static> ServiceReconciler for AsoService<S> {
    fn name(&self) -> &str {
        self.name
    }

    async fn reconcile(&self) -> Result<(), ReconcileError> {
        let desired = (self.build)(self.scope.as_ref())?;
        let (mine, others) = self.partition();

        let applied = self.scope.engine().reconcile(desired, &mine).await?;
        let blocker = applied.blocker();
        self.store(others, applied.statuses);

        match blocker {
            Some(message) => Err(ReconcileError::transient(
                message,
                self.scope.requeue_after(),
            )),
            None => Ok(()),
        }
    }

    async fn delete(&self) -> Result<(), ReconcileError> {
        let (mine, others) = self.partition();
        if mine.is_empty() {
            return Ok(());
        }

        let residual = self.scope.engine().delete(&mine).await?;
        let remaining = residual.len();
        self.store(others, residual);

        if remaining > 0 {
            debug!(service = self.name, remaining, "Waiting for ASO resources to be deleted");
            return Err(ReconcileError::transient(
                format!("waiting for {remaining} resource(s) to be deleted"),
                self.scope.requeue_after(),
            ));
        }
        Ok(())
    }

    fn as_pauser(&self) -> Option<&dyn Pauser> {
        Some(self)
    }
}

#[async_trait]
impl<S: AsoScope + 'static> Pauser for AsoService<S> {
    async fn pause(&self) -> Result<(), ReconcileError> {
        let (mine, _) = self.partition();
        self.scope.engine().pause(&mine).await
    }
}
