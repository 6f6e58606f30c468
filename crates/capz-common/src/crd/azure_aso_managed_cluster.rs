//! AzureASOManagedCluster CRD: a cluster described as raw ASO manifests
//!
//! The operator applies `spec.resources` verbatim (plus ownership and
//! credential metadata), tracks them in `status.resources` and prunes what
//! disappears from the list.

use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApiEndpoint, Condition, ResourceStatus};

/// AzureASOManagedCluster holds the ASO resources making up a cluster.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureASOManagedCluster",
    namespaced,
    status = "AzureASOManagedClusterStatus",
    shortname = "amc",
    category = "cluster-api",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureASOManagedClusterSpec {
    /// Raw ASO manifests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "raw_resources_schema")]
    pub resources: Vec<serde_json::Value>,

    /// Endpoint of the workload API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

/// Observed state of an AzureASOManagedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureASOManagedClusterStatus {
    /// Whether every resource is ready
    #[serde(default)]
    pub ready: bool,

    /// ASO resources applied from `spec.resources`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,

    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

fn raw_resources_schema(_: &mut SchemaGenerator) -> Schema {
    let item = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        extensions: [(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(Schema::Object(item).into()),
            ..Default::default()
        })),
        ..Default::default()
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_resources_schema_preserves_unknown_fields() {
        let crd = AzureASOManagedCluster::crd();
        let json = serde_json::to_value(&crd).unwrap();
        let items = &json["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]
            ["spec"]["properties"]["resources"]["items"];
        assert_eq!(items["type"], "object");
        assert_eq!(items["x-kubernetes-preserve-unknown-fields"], true);
    }

    #[test]
    fn test_raw_resources_round_trip_untouched() {
        let manifest = serde_json::json!({
            "apiVersion": "resources.azure.com/v1api20200601",
            "kind": "ResourceGroup",
            "metadata": {"name": "rg"},
            "spec": {"location": "eastus"}
        });
        let spec: AzureASOManagedClusterSpec =
            serde_json::from_value(serde_json::json!({ "resources": [manifest.clone()] }))
                .unwrap();
        assert_eq!(spec.resources, vec![manifest]);
    }
}
