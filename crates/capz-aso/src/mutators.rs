//! Metadata applied to ASO objects before they are sent to the API server

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;

use capz_common::kube_utils::parse_api_version;
use capz_common::{
    ReconcileError, CLUSTER_NAME_LABEL, CREDENTIAL_FROM_ANNOTATION, RECONCILE_POLICY_ANNOTATION,
    RECONCILE_POLICY_SKIP,
};

use crate::is_aso_group;

/// Reason of the terminal error raised when a resource can't be paused
pub const INCOMPATIBLE_PAUSE_REASON: &str = "IncompatibleResource";

/// Make `owner` the controller of `obj`, replacing any other controller reference
pub fn set_owner_reference(obj: &mut DynamicObject, owner: &OwnerReference) {
    let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.uid != owner.uid && r.controller != Some(true));
    refs.push(owner.clone());
}

/// Point ASO at the credential secret for this object
pub fn set_credential_from(obj: &mut DynamicObject, secret_name: &str) {
    obj.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(CREDENTIAL_FROM_ANNOTATION.to_string(), secret_name.to_string());
}

/// Label the object with its Cluster API cluster
pub fn set_cluster_label(obj: &mut DynamicObject, cluster_name: &str) {
    obj.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string());
}

/// Drop server-populated metadata so the object is a valid apply body
pub fn strip_server_fields(obj: &mut DynamicObject) {
    let meta = &mut obj.metadata;
    meta.resource_version = None;
    meta.uid = None;
    meta.managed_fields = None;
    meta.creation_timestamp = None;
    meta.generation = None;
    if let Some(map) = obj.data.as_object_mut() {
        map.remove("status");
    }
}

/// Mark the object so ASO stops reconciling it
///
/// Only ASO resources understand the reconcile-policy annotation; anything
/// else in an owner's resource list makes pausing impossible.
pub fn pause(obj: &mut DynamicObject) -> Result<(), ReconcileError> {
    let api_version = obj
        .types
        .as_ref()
        .map(|t| t.api_version.as_str())
        .unwrap_or_default();
    let (group, _) = parse_api_version(api_version);
    if !is_aso_group(&group) {
        let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
        return Err(ReconcileError::terminal(
            INCOMPATIBLE_PAUSE_REASON,
            format!(
                "cannot pause {kind} {}: group {group:?} is not an ASO group",
                obj.metadata.name.as_deref().unwrap_or_default()
            ),
        ));
    }
    obj.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            RECONCILE_POLICY_ANNOTATION.to_string(),
            RECONCILE_POLICY_SKIP.to_string(),
        );
    Ok(())
}
