//! Readiness of an ASO resource
//!
//! ASO reports progress through a `Ready` condition whose
//! `observedGeneration` says which spec generation it describes. A `True`
//! condition for an older generation is stale and doesn't count.

use kube::api::DynamicObject;
use serde::Deserialize;

/// Evaluated readiness of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Ready for the current generation
    Ready,
    /// Still converging
    NotReady {
        /// Why, for logs and the requeue message
        message: String,
    },
    /// ASO gave up on the current spec
    Failed {
        /// Reason reported by ASO
        reason: String,
        /// Message reported by ASO
        message: String,
    },
}

impl Readiness {
    /// Whether the resource is ready
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AsoCondition {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    observed_generation: i64,
}

/// Evaluate the `Ready` condition of an ASO object
pub fn readiness(obj: &DynamicObject) -> Readiness {
    let conditions: Vec<AsoCondition> = obj
        .data
        .pointer("/status/conditions")
        .and_then(|c| serde_json::from_value(c.clone()).ok())
        .unwrap_or_default();

    let Some(ready) = conditions.into_iter().find(|c| c.type_ == "Ready") else {
        return Readiness::NotReady {
            message: "waiting for Ready condition".to_string(),
        };
    };

    let generation = obj.metadata.generation.unwrap_or(0);
    if ready.observed_generation < generation {
        return Readiness::NotReady {
            message: format!(
                "waiting for generation {generation} to be observed (observed {})",
                ready.observed_generation
            ),
        };
    }

    match ready.status.as_str() {
        "True" => Readiness::Ready,
        "False" if ready.severity == "Error" => Readiness::Failed {
            reason: ready.reason,
            message: ready.message,
        },
        _ => Readiness::NotReady {
            message: if ready.message.is_empty() {
                ready.reason
            } else {
                ready.message
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn object(generation: i64, conditions: serde_json::Value) -> DynamicObject {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "network.azure.com/v1api20201101",
            "kind": "VirtualNetwork",
            "metadata": {"name": "vnet", "namespace": "default", "generation": generation},
            "spec": {},
            "status": {"conditions": conditions}
        }))
        .unwrap()
    }

    fn ready(status: &str, observed: i64) -> serde_json::Value {
        serde_json::json!([{
            "type": "Ready",
            "status": status,
            "observedGeneration": observed,
            "reason": "Reconciling",
            "message": "resource is being created"
        }])
    }

    // ==========================================================================
    // Story Tests: Generation tracking
    // ==========================================================================

    /// Story: A Ready=True condition for an older generation is stale
    #[rstest]
    #[case(2, 1, false)]
    #[case(2, 2, true)]
    #[case(2, 3, true)]
    fn story_ready_requires_observed_generation(
        #[case] generation: i64,
        #[case] observed: i64,
        #[case] expected: bool,
    ) {
        let obj = object(generation, ready("True", observed));
        assert_eq!(readiness(&obj).is_ready(), expected);
    }

    /// Story: An object ASO hasn't touched yet is not ready
    #[test]
    fn story_missing_condition_is_not_ready() {
        let obj = object(1, serde_json::json!([]));
        assert!(matches!(readiness(&obj), Readiness::NotReady { .. }));
    }

    /// Story: Error severity surfaces ASO's reason
    #[test]
    fn story_error_severity_is_failure() {
        let obj = object(
            1,
            serde_json::json!([{
                "type": "Ready",
                "status": "False",
                "severity": "Error",
                "observedGeneration": 1,
                "reason": "InvalidResourceReference",
                "message": "resource group not found"
            }]),
        );
        assert_eq!(
            readiness(&obj),
            Readiness::Failed {
                reason: "InvalidResourceReference".into(),
                message: "resource group not found".into()
            }
        );
    }

    #[test]
    fn test_not_ready_carries_message() {
        let obj = object(1, ready("False", 1));
        assert_eq!(
            readiness(&obj),
            Readiness::NotReady {
                message: "resource is being created".into()
            }
        );
    }
}
