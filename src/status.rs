//! Pluggable status analysis: turns a live object into a coarse verdict the
//! engine acts on — waiting out `InProgress`, surfacing `Failed`, treating `Terminating`
//! specially during delete. Mirrors the per-kind health checkers this crate is grounded
//! on, but as a trait any caller can swap in their own analyzer.

use crate::object::Object;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusVerdict {
    Current,
    InProgress,
    Failed,
    Terminating,
    NotFound,
    Unknown,
}

#[async_trait]
pub trait StatusAnalyzer: Send + Sync {
    async fn analyze(&self, object: &Object) -> StatusVerdict;
}

/// The built-in analyzer: typed rollout checks for the three workload kinds the
/// health checkers cover, a `Ready`/`Available` condition fallback for
/// everything else, and `Terminating` whenever a deletion timestamp is present.
pub struct BuiltInStatusAnalyzer;

#[async_trait]
impl StatusAnalyzer for BuiltInStatusAnalyzer {
    async fn analyze(&self, object: &Object) -> StatusVerdict {
        if object.deletion_timestamp().is_some() {
            return StatusVerdict::Terminating;
        }
        match object.type_meta().map(|t| t.kind.as_str()).unwrap_or("") {
            "Deployment" => deployment_verdict(object),
            "StatefulSet" => stateful_set_verdict(object),
            "DaemonSet" => daemon_set_verdict(object),
            _ => generic_condition_verdict(object),
        }
    }
}

fn to_typed<T: serde::de::DeserializeOwned>(object: &Object) -> Option<T> {
    serde_json::to_value(object.as_dynamic())
        .ok()
        .and_then(|v| serde_json::from_value(v).ok())
}

fn deployment_verdict(object: &Object) -> StatusVerdict {
    let Some(deploy) = to_typed::<Deployment>(object) else {
        return StatusVerdict::Unknown;
    };
    let generation = deploy.metadata.generation.unwrap_or(0);
    let desired = deploy
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let Some(status) = deploy.status else {
        return StatusVerdict::InProgress;
    };
    if status.observed_generation.unwrap_or(0) < generation {
        return StatusVerdict::InProgress;
    }
    let updated = status.updated_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);
    if updated >= desired && available >= desired {
        StatusVerdict::Current
    } else {
        StatusVerdict::InProgress
    }
}

fn stateful_set_verdict(object: &Object) -> StatusVerdict {
    let Some(sts) = to_typed::<StatefulSet>(object) else {
        return StatusVerdict::Unknown;
    };
    let generation = sts.metadata.generation.unwrap_or(0);
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let Some(status) = sts.status else {
        return StatusVerdict::InProgress;
    };
    if status.observed_generation.unwrap_or(0) < generation {
        return StatusVerdict::InProgress;
    }
    if status.updated_replicas.unwrap_or(0) >= desired && status.ready_replicas.unwrap_or(0) >= desired {
        StatusVerdict::Current
    } else {
        StatusVerdict::InProgress
    }
}

fn daemon_set_verdict(object: &Object) -> StatusVerdict {
    let Some(ds) = to_typed::<DaemonSet>(object) else {
        return StatusVerdict::Unknown;
    };
    let generation = ds.metadata.generation.unwrap_or(0);
    let Some(status) = ds.status else {
        return StatusVerdict::InProgress;
    };
    if status.observed_generation.unwrap_or(0) < generation {
        return StatusVerdict::InProgress;
    }
    if status.desired_number_scheduled == status.updated_number_scheduled.unwrap_or(0)
        && status.desired_number_scheduled == status.number_available.unwrap_or(0)
    {
        StatusVerdict::Current
    } else {
        StatusVerdict::InProgress
    }
}

/// Fallback for kinds the built-in analyzer has no typed check for: looks for a
/// `Ready` or `Available` entry in `.status.conditions`, the convention most
/// controller-managed kinds follow.
fn generic_condition_verdict(object: &Object) -> StatusVerdict {
    let Some(status) = object.as_dynamic().data.get("status") else {
        return StatusVerdict::Unknown;
    };
    let Some(conditions) = status.get("conditions").and_then(|c| c.as_array()) else {
        return StatusVerdict::Unknown;
    };
    for condition in conditions {
        let kind = condition.get("type").and_then(|t| t.as_str()).unwrap_or("");
        if kind != "Ready" && kind != "Available" {
            continue;
        }
        return match condition.get("status").and_then(|s| s.as_str()) {
            Some("True") => StatusVerdict::Current,
            Some("False") => StatusVerdict::Failed,
            _ => StatusVerdict::InProgress,
        };
    }
    StatusVerdict::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{DynamicObject, TypeMeta};
    use serde_json::json;

    fn object_from(kind: &str, value: serde_json::Value) -> Object {
        let mut dyn_obj: DynamicObject = serde_json::from_value(value).unwrap();
        dyn_obj.types = Some(TypeMeta {
            api_version: "apps/v1".into(),
            kind: kind.into(),
        });
        Object::from_dynamic(dyn_obj)
    }

    #[tokio::test]
    async fn terminating_wins_over_any_typed_status() {
        let o = object_from(
            "Deployment",
            json!({
                "metadata": {"name": "x", "generation": 1, "deletionTimestamp": "2024-01-01T00:00:00Z"},
                "spec": {"replicas": 1},
                "status": {"observedGeneration": 1, "updatedReplicas": 1, "availableReplicas": 1}
            }),
        );
        assert_eq!(
            BuiltInStatusAnalyzer.analyze(&o).await,
            StatusVerdict::Terminating
        );
    }

    #[tokio::test]
    async fn deployment_fully_rolled_out_is_current() {
        let o = object_from(
            "Deployment",
            json!({
                "metadata": {"name": "x", "generation": 2},
                "spec": {"replicas": 3},
                "status": {"observedGeneration": 2, "updatedReplicas": 3, "availableReplicas": 3}
            }),
        );
        assert_eq!(
            BuiltInStatusAnalyzer.analyze(&o).await,
            StatusVerdict::Current
        );
    }

    #[tokio::test]
    async fn deployment_stale_observed_generation_is_in_progress() {
        let o = object_from(
            "Deployment",
            json!({
                "metadata": {"name": "x", "generation": 3},
                "spec": {"replicas": 3},
                "status": {"observedGeneration": 2, "updatedReplicas": 3, "availableReplicas": 3}
            }),
        );
        assert_eq!(
            BuiltInStatusAnalyzer.analyze(&o).await,
            StatusVerdict::InProgress
        );
    }

    #[tokio::test]
    async fn generic_condition_fallback_reads_ready_condition() {
        let o = object_from(
            "Widget",
            json!({
                "metadata": {"name": "x"},
                "status": {"conditions": [{"type": "Ready", "status": "False"}]}
            }),
        );
        assert_eq!(
            BuiltInStatusAnalyzer.analyze(&o).await,
            StatusVerdict::Failed
        );
    }

    #[tokio::test]
    async fn unknown_kind_with_no_conditions_is_unknown() {
        let o = object_from("Widget", json!({"metadata": {"name": "x"}}));
        assert_eq!(
            BuiltInStatusAnalyzer.analyze(&o).await,
            StatusVerdict::Unknown
        );
    }
}
