//! Azure credential resolution and caching
//!
//! An owner names an `AzureClusterIdentity`. Resolving it means reading the
//! identity, checking the owner's namespace may use it, reading the client
//! secret for service principals, and server-side applying the secret ASO
//! reads credentials from. Identity material is cached per identity and
//! reused until the identity's `resourceVersion` changes.

use std::collections::BTreeMap;

use dashmap::DashMap;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

use capz_common::crd::{AzureClusterIdentity, IdentityRef, IdentityType, CLIENT_SECRET_KEY};
use capz_common::{Error, CLUSTER_NAME_LABEL};
use capz_services::AzureCredentials;

use crate::kube_client::KubeClient;

/// Kind an identity reference must name
pub const IDENTITY_KIND: &str = "AzureClusterIdentity";

/// Name of the ASO credential secret of a cluster
pub fn aso_secret_name(cluster: &str) -> String {
    format!("{cluster}-aso-secret")
}

/// What an owner needs credentials for
pub struct CredentialRequest<'a> {
    /// The owner's identity reference; `None` uses ASO's global credential
    pub identity: Option<&'a IdentityRef>,
    /// The owner's namespace
    pub namespace: &'a str,
    /// Cluster API cluster name
    pub cluster_name: &'a str,
    /// Subscription the owner's resources live in
    pub subscription_id: &'a str,
    /// Owner of the ASO credential secret
    pub owner: OwnerReference,
}

/// Identity data that doesn't depend on the owner
#[derive(Clone, Debug, PartialEq, Eq)]
struct IdentityMaterial {
    identity_type: IdentityType,
    tenant_id: String,
    client_id: String,
    client_secret: Option<Vec<u8>>,
}

#[derive(Clone)]
struct CachedIdentity {
    resource_version: Option<String>,
    material: IdentityMaterial,
}

/// Cache of resolved identities, keyed by identity `(namespace, name)`
#[derive(Default)]
pub struct CredentialCache {
    identities: DashMap<(String, String), CachedIdentity>,
    // (namespace, secret) -> fingerprint of what was last applied
    applied: DashMap<(String, String), String>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve credentials for an owner
    ///
    /// Any failure here is fatal to the reconcile: the owner can't be scoped
    /// without credentials.
    pub async fn resolve(
        &self,
        kube: &dyn KubeClient,
        request: CredentialRequest<'_>,
    ) -> Result<AzureCredentials, Error> {
        let Some(identity_ref) = request.identity else {
            return Ok(AzureCredentials {
                subscription_id: request.subscription_id.to_string(),
                tenant_id: String::new(),
                client_id: String::new(),
                identity_type: IdentityType::default(),
                aso_secret: None,
            });
        };

        let identity_namespace = identity_ref
            .namespace
            .clone()
            .unwrap_or_else(|| request.namespace.to_string());
        let id = format!("{identity_namespace}/{}", identity_ref.name);
        if !identity_ref.kind.is_empty() && identity_ref.kind != IDENTITY_KIND {
            return Err(Error::credentials(
                &id,
                format!("unsupported identity kind {}", identity_ref.kind),
            ));
        }

        let identity = kube
            .get_identity(&identity_namespace, &identity_ref.name)
            .await?
            .ok_or_else(|| Error::credentials(&id, "AzureClusterIdentity not found"))?;
        if !identity.allows_namespace(request.namespace) {
            return Err(Error::credentials(
                &id,
                format!("namespace {} is not allowed to use this identity", request.namespace),
            ));
        }
        identity
            .spec
            .validate()
            .map_err(|e| Error::credentials(&id, e.to_string()))?;

        let material = self
            .material(kube, (identity_namespace, identity_ref.name.clone()), &identity)
            .await?;

        let secret_name = aso_secret_name(request.cluster_name);
        let fingerprint = format!(
            "{}/{}",
            identity.resource_version().unwrap_or_default(),
            request.subscription_id
        );
        let applied_key = (request.namespace.to_string(), secret_name.clone());
        let current = self.applied.get(&applied_key).map(|f| f.value().clone());
        if current.as_deref() != Some(fingerprint.as_str()) {
            let secret = aso_secret(&request, &secret_name, &material);
            kube.apply_secret(&secret).await?;
            info!(secret = %secret_name, namespace = %request.namespace, "Applied ASO credential secret");
            self.applied.insert(applied_key, fingerprint);
        }

        Ok(AzureCredentials {
            subscription_id: request.subscription_id.to_string(),
            tenant_id: material.tenant_id,
            client_id: material.client_id,
            identity_type: material.identity_type,
            aso_secret: Some(secret_name),
        })
    }

    async fn material(
        &self,
        kube: &dyn KubeClient,
        key: (String, String),
        identity: &AzureClusterIdentity,
    ) -> Result<IdentityMaterial, Error> {
        let resource_version = identity.resource_version();
        let cached = self.identities.get(&key).map(|e| e.value().clone());
        if let Some(cached) = cached {
            if cached.resource_version == resource_version {
                debug!(identity = %key.1, "Identity cache hit");
                return Ok(cached.material);
            }
        }

        let client_secret = match identity.spec.identity_type {
            IdentityType::ServicePrincipal => {
                Some(read_client_secret(kube, &key.0, identity).await?)
            }
            IdentityType::WorkloadIdentity | IdentityType::ManagedIdentity => None,
        };
        let material = IdentityMaterial {
            identity_type: identity.spec.identity_type,
            tenant_id: identity.spec.tenant_id.clone(),
            client_id: identity.spec.client_id.clone(),
            client_secret,
        };
        self.identities.insert(
            key,
            CachedIdentity {
                resource_version,
                material: material.clone(),
            },
        );
        Ok(material)
    }
}

async fn read_client_secret(
    kube: &dyn KubeClient,
    identity_namespace: &str,
    identity: &AzureClusterIdentity,
) -> Result<Vec<u8>, Error> {
    let id = format!("{identity_namespace}/{}", identity.name_any());
    let secret_ref = identity
        .spec
        .client_secret
        .as_ref()
        .ok_or_else(|| Error::credentials(&id, "service principal needs spec.clientSecret"))?;
    let namespace = secret_ref.namespace.as_deref().unwrap_or(identity_namespace);
    let key = secret_ref.key.as_deref().unwrap_or(CLIENT_SECRET_KEY);

    let secret = kube
        .get_secret(namespace, &secret_ref.name)
        .await?
        .ok_or_else(|| {
            Error::credentials(&id, format!("secret {namespace}/{} not found", secret_ref.name))
        })?;
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.clone())
        .ok_or_else(|| {
            Error::credentials(&id, format!("secret {namespace}/{} has no key {key}", secret_ref.name))
        })
}

/// The secret ASO reads an owner's credentials from
fn aso_secret(request: &CredentialRequest<'_>, name: &str, material: &IdentityMaterial) -> Secret {
    let mut data = BTreeMap::new();
    let mut put = |key: &str, value: &[u8]| {
        data.insert(key.to_string(), ByteString(value.to_vec()));
    };
    put("AZURE_SUBSCRIPTION_ID", request.subscription_id.as_bytes());
    put("AZURE_TENANT_ID", material.tenant_id.as_bytes());
    put("AZURE_CLIENT_ID", material.client_id.as_bytes());
    match (&material.identity_type, &material.client_secret) {
        (IdentityType::ServicePrincipal, Some(secret)) => put("AZURE_CLIENT_SECRET", secret),
        (IdentityType::WorkloadIdentity, _) => put("USE_WORKLOAD_IDENTITY_AUTH", b"true"),
        _ => {}
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(request.namespace.to_string()),
            labels: Some(BTreeMap::from([(
                CLUSTER_NAME_LABEL.to_string(),
                request.cluster_name.to_string(),
            )])),
            owner_references: Some(vec![request.owner.clone()]),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}
