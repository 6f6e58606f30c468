//! Kubernetes API seam for the infrastructure controllers
//!
//! Controllers never touch `kube::Api` directly. Everything they read or
//! write goes through [`KubeClient`] so reconcile logic can be tested with
//! mocks.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::ApiResource;
use kube::{Client, Resource};

#[cfg(test)]
use mockall::automock;

use capz_common::crd::{
    AzureASOManagedCluster, AzureCluster, AzureClusterIdentity, AzureMachine,
    AzureManagedControlPlane, Cluster, Machine,
};
use capz_common::kube_utils;
use capz_common::{Error, FIELD_MANAGER, INFRASTRUCTURE_GROUP};

/// The infrastructure kinds reconciled by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfraKind {
    AzureCluster,
    AzureMachine,
    AzureManagedControlPlane,
    AzureASOManagedCluster,
}

impl InfraKind {
    /// Kubernetes kind name
    pub fn kind(self) -> &'static str {
        match self {
            Self::AzureCluster => "AzureCluster",
            Self::AzureMachine => "AzureMachine",
            Self::AzureManagedControlPlane => "AzureManagedControlPlane",
            Self::AzureASOManagedCluster => "AzureASOManagedCluster",
        }
    }

    pub fn api_resource(self) -> ApiResource {
        match self {
            Self::AzureCluster => ApiResource::erase::<AzureCluster>(&()),
            Self::AzureMachine => ApiResource::erase::<AzureMachine>(&()),
            Self::AzureManagedControlPlane => ApiResource::erase::<AzureManagedControlPlane>(&()),
            Self::AzureASOManagedCluster => ApiResource::erase::<AzureASOManagedCluster>(&()),
        }
    }

    /// Finalizer guarding the kind's Azure resources
    pub fn finalizer(self) -> String {
        format!("{}.{INFRASTRUCTURE_GROUP}", self.kind().to_lowercase())
    }
}

impl std::fmt::Display for InfraKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Trait abstracting Kubernetes client operations for the controllers
///
/// Infrastructure objects are addressed by [`InfraKind`], namespace and name.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a Cluster API `Cluster`
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error>;

    /// Get a Cluster API `Machine`
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, Error>;

    /// Get an `AzureCluster`
    async fn get_azure_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureCluster>, Error>;

    /// Get an `AzureClusterIdentity`
    async fn get_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureClusterIdentity>, Error>;

    /// Get a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Server-side apply a Secret into its namespace
    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Merge-patch the status sub-resource of an infrastructure object
    async fn patch_status(
        &self,
        kind: InfraKind,
        namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Merge-patch fields of an infrastructure object's spec
    async fn patch_spec(
        &self,
        kind: InfraKind,
        namespace: &str,
        name: &str,
        spec: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Add a finalizer to an infrastructure object
    async fn add_finalizer(
        &self,
        kind: InfraKind,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Remove a finalizer from an infrastructure object
    async fn remove_finalizer(
        &self,
        kind: InfraKind,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn infra_api(&self, kind: InfraKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_azure_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureCluster>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureClusterIdentity>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::internal_with_context("apply_secret", "secret has no namespace"))?;
        let name = secret
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::internal_with_context("apply_secret", "secret has no name"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(secret),
        )
        .await?;
        Ok(())
    }

    async fn patch_status(
        &self,
        kind: InfraKind,
        namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<(), Error> {
        kube_utils::patch_status(&self.infra_api(kind, namespace), name, status).await
    }

    async fn patch_spec(
        &self,
        kind: InfraKind,
        namespace: &str,
        name: &str,
        spec: &serde_json::Value,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "spec": spec });
        self.infra_api(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn add_finalizer(
        &self,
        kind: InfraKind,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.infra_api(kind, namespace);
        let obj = api.get(name).await?;
        kube_utils::add_finalizer(&api, &obj, finalizer).await?;
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        kind: InfraKind,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.infra_api(kind, namespace);
        match api.get(name).await {
            Ok(obj) => kube_utils::remove_finalizer(&api, &obj, finalizer).await,
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
