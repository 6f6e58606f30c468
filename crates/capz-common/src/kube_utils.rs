//! Kubernetes helpers shared by the controllers and the ASO engine
//!
//! Finalizer and status patches use JSON merge patches that carry the
//! object's `resourceVersion`, so a concurrent writer turns into a 409 and
//! the whole reconcile is retried.

use std::fmt::Debug;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Patch, PatchParams};
use kube::core::ApiResource;
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crd::Cluster;
use crate::{Error, PAUSED_ANNOTATION};

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use capz_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("network.azure.com/v1api20201101");
/// assert_eq!(group, "network.azure.com");
/// assert_eq!(version, "v1api20201101");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Join a group and version into an apiVersion string
pub fn api_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    }
}

/// Build an ApiResource from a known apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Kinds whose plural doesn't follow the simple rules
const KIND_PLURALS: &[(&str, &str)] = &[
    ("azureclusteridentity", "azureclusteridentities"),
    ("userassignedidentity", "userassignedidentities"),
];

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Whether the object carries `finalizer`
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Whether the object carries the Cluster API paused annotation
pub fn has_paused_annotation(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(PAUSED_ANNOTATION))
}

/// Whether reconciliation of `obj` is paused, either directly or through its cluster
pub fn is_paused<K: Resource>(obj: &K, cluster: Option<&Cluster>) -> bool {
    has_paused_annotation(obj.meta()) || cluster.is_some_and(|c| c.is_paused())
}

/// Find the owner reference of the given kind within an API group
pub fn find_owner_ref<'a>(
    meta: &'a ObjectMeta,
    group: &str,
    kind: &str,
) -> Option<&'a OwnerReference> {
    meta.owner_references.as_ref()?.iter().find(|r| {
        r.kind == kind && parse_api_version(&r.api_version).0 == group
    })
}

/// Add `finalizer` to the object if missing
///
/// Returns `true` when a patch was sent.
pub async fn add_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str) -> Result<bool, Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if has_finalizer(obj, finalizer) {
        return Ok(false);
    }
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    patch_finalizers(api, obj, finalizers).await?;
    Ok(true)
}

/// Remove `finalizer` from the object if present
pub async fn remove_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if !has_finalizer(obj, finalizer) {
        return Ok(());
    }
    let finalizers: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    patch_finalizers(api, obj, finalizers).await
}

async fn patch_finalizers<K>(api: &Api<K>, obj: &K, finalizers: Vec<String>) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": obj.resource_version(),
        }
    });
    api.patch(
        &obj.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Merge-patch the status sub-resource of `name`
pub async fn patch_status<K>(api: &Api<K>, name: &str, status: &impl Serialize) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Read one key of a secret
pub async fn get_secret_data(api: &Api<Secret>, name: &str, key: &str) -> Result<Vec<u8>, Error> {
    let secret = api.get_opt(name).await?.ok_or_else(|| Error::not_found("Secret", name))?;

    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| {
            Error::internal_with_context("get_secret_data", format!("secret {name} missing key {key}"))
        })?;

    Ok(data.0.clone())
}

/// Check if a secret exists
pub async fn secret_exists(api: &Api<Secret>, name: &str) -> Result<bool, Error> {
    Ok(api.get_opt(name).await?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AzureCluster, AzureClusterSpec, ClusterSpec};
    use rstest::rstest;
    use std::collections::BTreeMap;

    #[rstest]
    #[case("ResourceGroup", "resourcegroups")]
    #[case("PublicIPAddress", "publicipaddresses")]
    #[case("VirtualNetworksSubnet", "virtualnetworkssubnets")]
    #[case("NetworkSecurityGroup", "networksecuritygroups")]
    #[case("AzureClusterIdentity", "azureclusteridentities")]
    #[case("PrivateDnsZonesARecord", "privatednszonesarecords")]
    fn test_pluralize_aso_kinds(#[case] kind: &str, #[case] plural: &str) {
        assert_eq!(pluralize_kind(kind), plural);
    }

    #[test]
    fn test_build_api_resource() {
        let ar = build_api_resource("network.azure.com/v1api20201101", "VirtualNetwork");
        assert_eq!(ar.group, "network.azure.com");
        assert_eq!(ar.version, "v1api20201101");
        assert_eq!(ar.plural, "virtualnetworks");
        assert_eq!(api_version(&ar.group, &ar.version), ar.api_version);
        assert_eq!(api_version("", "v1"), "v1");
    }

    fn azure_cluster(annotations: Option<BTreeMap<String, String>>) -> AzureCluster {
        let mut ac = AzureCluster::new("prod", AzureClusterSpec::default());
        ac.metadata.annotations = annotations;
        ac.metadata.finalizers = Some(vec!["azurecluster.infrastructure.cluster.x-k8s.io".into()]);
        ac
    }

    // ==========================================================================
    // Story Tests: Pause detection
    // ==========================================================================

    /// Story: Either the object annotation or the owning cluster pauses reconciliation
    #[test]
    fn story_pause_from_annotation_or_cluster() {
        let plain = azure_cluster(None);
        assert!(!is_paused(&plain, None));

        let annotated = azure_cluster(Some(BTreeMap::from([(
            PAUSED_ANNOTATION.to_string(),
            String::new(),
        )])));
        assert!(is_paused(&annotated, None));

        let paused_cluster = Cluster::new(
            "prod",
            ClusterSpec {
                paused: true,
                ..Default::default()
            },
        );
        assert!(is_paused(&plain, Some(&paused_cluster)));
    }

    #[test]
    fn test_has_finalizer() {
        let ac = azure_cluster(None);
        assert!(has_finalizer(&ac, "azurecluster.infrastructure.cluster.x-k8s.io"));
        assert!(!has_finalizer(&ac, "other"));
    }

    #[test]
    fn test_find_owner_ref_matches_group_and_kind() {
        let meta = ObjectMeta {
            owner_references: Some(vec![
                OwnerReference {
                    api_version: "cluster.x-k8s.io/v1beta1".into(),
                    kind: "Machine".into(),
                    name: "m0".into(),
                    uid: "1".into(),
                    ..Default::default()
                },
                OwnerReference {
                    api_version: "cluster.x-k8s.io/v1beta1".into(),
                    kind: "Cluster".into(),
                    name: "prod".into(),
                    uid: "2".into(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        let owner = find_owner_ref(&meta, "cluster.x-k8s.io", "Cluster").unwrap();
        assert_eq!(owner.name, "prod");
        assert!(find_owner_ref(&meta, "infrastructure.cluster.x-k8s.io", "Cluster").is_none());
    }
}
