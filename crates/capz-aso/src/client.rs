//! Kubernetes API seam for ASO objects
//!
//! ASO kinds are handled as `DynamicObject`s so one code path serves every
//! Azure resource type.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::core::ApiResource;
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use capz_common::{Error, FIELD_MANAGER};

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The object is gone
    Deleted,
    /// Deletion was accepted but finalizers are still running
    Deleting,
    /// The object did not exist
    NotFound,
}

impl DeleteOutcome {
    /// Whether the object still exists after the request
    pub fn still_exists(self) -> bool {
        self == Self::Deleting
    }
}

/// Dynamic object access used by the engine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Server-side apply `obj` into its namespace
    ///
    /// `force` takes ownership of conflicting fields from other managers.
    async fn apply(
        &self,
        obj: &DynamicObject,
        ar: &ApiResource,
        force: bool,
    ) -> Result<DynamicObject, Error>;

    /// Get an object, `None` when it does not exist
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Request deletion of an object
    async fn delete(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome, Error>;
}

/// [`ResourceClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn apply(
        &self,
        obj: &DynamicObject,
        ar: &ApiResource,
        force: bool,
    ) -> Result<DynamicObject, Error> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::validation_for(obj.name_any(), "ASO resources are namespaced"))?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &namespace, ar);

        let mut params = PatchParams::apply(FIELD_MANAGER);
        if force {
            params = params.force();
        }
        let applied = api
            .patch(&obj.name_any(), &params, &Patch::Apply(obj))
            .await?;
        Ok(applied)
    }

    async fn get(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, ar);
        Ok(api.get_opt(name).await?)
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome, Error> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, ar);
        match api.delete(name, &DeleteParams::background()).await {
            // Left carries the object while finalizers run, Right the final status
            Ok(response) if response.is_left() => {
                debug!(kind = %ar.kind, name, "Deletion in progress");
                Ok(DeleteOutcome::Deleting)
            }
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
