//! AzureClusterIdentity CRD: credentials shared by clusters

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::SecretRef;
use crate::Error;

/// Key in the client secret holding the service principal password
pub const CLIENT_SECRET_KEY: &str = "clientSecret";

/// AzureClusterIdentity describes how to authenticate against Azure.
///
/// Example:
/// ```yaml
/// apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
/// kind: AzureClusterIdentity
/// metadata:
///   name: prod-identity
/// spec:
///   type: ServicePrincipal
///   tenantID: 00000000-0000-0000-0000-000000000000
///   clientID: 00000000-0000-0000-0000-000000000000
///   clientSecret:
///     name: prod-identity-secret
///   allowedNamespaces: {}
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureClusterIdentity",
    namespaced,
    shortname = "azci",
    category = "cluster-api",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterIdentitySpec {
    /// Authentication method
    #[serde(rename = "type")]
    pub identity_type: IdentityType,

    /// Azure AD tenant
    #[serde(rename = "tenantID")]
    pub tenant_id: String,

    /// Application (client) ID
    #[serde(rename = "clientID")]
    pub client_id: String,

    /// Secret with the client secret, required for ServicePrincipal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretRef>,

    /// Namespaces allowed to use this identity
    ///
    /// Unset: only the identity's own namespace. Empty: every namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_namespaces: Option<AllowedNamespaces>,
}

/// Authentication method of an identity
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum IdentityType {
    /// Client ID plus client secret
    #[default]
    ServicePrincipal,
    /// Federated workload identity token
    WorkloadIdentity,
    /// User-assigned managed identity
    ManagedIdentity,
}

impl std::fmt::Display for IdentityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServicePrincipal => write!(f, "ServicePrincipal"),
            Self::WorkloadIdentity => write!(f, "WorkloadIdentity"),
            Self::ManagedIdentity => write!(f, "ManagedIdentity"),
        }
    }
}

/// Namespace allow list of an identity
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllowedNamespaces {
    /// Explicit namespaces; empty means all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list: Vec<String>,
}

impl AzureClusterIdentity {
    /// Whether an object in `namespace` may use this identity
    pub fn allows_namespace(&self, namespace: &str) -> bool {
        match &self.spec.allowed_namespaces {
            None => self.namespace().as_deref() == Some(namespace),
            Some(allowed) if allowed.list.is_empty() => true,
            Some(allowed) => allowed.list.iter().any(|n| n == namespace),
        }
    }
}

impl AzureClusterIdentitySpec {
    /// Validate the spec
    pub fn validate(&self) -> Result<(), Error> {
        if self.tenant_id.is_empty() {
            return Err(Error::validation("tenantID cannot be empty"));
        }
        if self.client_id.is_empty() {
            return Err(Error::validation("clientID cannot be empty"));
        }
        if self.identity_type == IdentityType::ServicePrincipal && self.client_secret.is_none() {
            return Err(Error::validation(
                "clientSecret is required for ServicePrincipal identities",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn identity(allowed: Option<AllowedNamespaces>) -> AzureClusterIdentity {
        let mut id = AzureClusterIdentity::new(
            "prod-identity",
            AzureClusterIdentitySpec {
                identity_type: IdentityType::WorkloadIdentity,
                tenant_id: "tenant".into(),
                client_id: "client".into(),
                client_secret: None,
                allowed_namespaces: allowed,
            },
        );
        id.metadata.namespace = Some("capz-system".into());
        id
    }

    #[rstest]
    #[case(None, "capz-system", true)]
    #[case(None, "default", false)]
    #[case(Some(vec![]), "default", true)]
    #[case(Some(vec!["team-a".to_string()]), "team-a", true)]
    #[case(Some(vec!["team-a".to_string()]), "team-b", false)]
    fn test_allows_namespace(
        #[case] list: Option<Vec<String>>,
        #[case] namespace: &str,
        #[case] allowed: bool,
    ) {
        let id = identity(list.map(|list| AllowedNamespaces { list }));
        assert_eq!(id.allows_namespace(namespace), allowed);
    }

    #[test]
    fn test_service_principal_requires_secret() {
        let mut spec = identity(None).spec;
        assert!(spec.validate().is_ok());
        spec.identity_type = IdentityType::ServicePrincipal;
        assert!(spec.validate().is_err());
    }
}
