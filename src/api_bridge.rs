//! Typed/dynamic Kubernetes client wrapper: resolves each object's REST
//! mapping through discovery, performs create/read/update/delete with the branching
//! `UpdatePolicy` calls for, injects a finalizer on CRDs/APIServices so the engine always
//! has a deletion hook, and emits a Kubernetes Event for every mutating call. Shaped after
//! `k8s/client.rs`'s request/retry split, without the sync wrapper (see
//! DESIGN.md's "Sync vs. async engine surface" decision).

use crate::error::K8sError;
use crate::field_manager::FieldManagerMerger;
use crate::key::ObjectKey;
use crate::object::Object;
use crate::policy::UpdatePolicy;
use kube::api::{
    Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions, PropagationPolicy,
    ReplaceParams,
};
use kube::core::{DynamicObject, GroupVersionKind, Scope};
use kube::discovery::pinned_kind;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::instrument;

/// Finalizer the bridge adds to CRDs and APIServices on create, so the engine always has
/// a hook to clean up on delete even for kinds without built-in GC-friendly behavior.
pub const FINALIZER: &str = "component-reconciler.io/cleanup";

const RETRY_TTL: Duration = Duration::from_secs(60);

/// Remembers which object UIDs already had a conflict/throttling response translated
/// into a retriable error, so a caller driving its own retry loop doesn't get a fresh
/// "slow down" signal on every attempt within the window.
struct RetryTable {
    seen: Mutex<HashMap<String, Instant>>,
}

impl RetryTable {
    fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    async fn first_sighting(&self, uid: &str) -> bool {
        let mut seen = self.seen.lock().await;
        seen.retain(|_, at| at.elapsed() < RETRY_TTL);
        if seen.contains_key(uid) {
            false
        } else {
            seen.insert(uid.to_string(), Instant::now());
            true
        }
    }
}

pub struct ApiBridge {
    client: Client,
    field_owner: String,
    reporter: Reporter,
    retry_table: Arc<RetryTable>,
    /// Foreign field-manager prefixes the `SsaOverride` update policy reclaims, configured
    /// once at construction from `ReconcilerConfig::reclaim_prefixes`.
    reclaim_prefixes: Vec<String>,
}

/// The GVK a live CRD or APIService defines, parsed from its own spec, used to check
/// whether deleting it would strand instances. `None` for anything else, and for
/// APIServices (which front a whole group/version rather than one kind) where usage
/// can't be narrowed to a single kind — those are treated as never blocking finalizer
/// removal.
fn defined_gvk(live: &Object) -> Option<GroupVersionKind> {
    let gvk = live.gvk().ok()?;
    let data = &live.as_dynamic().data;
    if gvk.group == "apiextensions.k8s.io" && gvk.kind == "CustomResourceDefinition" {
        let spec = data.get("spec")?;
        let group = spec.get("group")?.as_str()?.to_string();
        let kind = spec.get("names")?.get("kind")?.as_str()?.to_string();
        let version = spec
            .get("versions")?
            .as_array()?
            .iter()
            .find(|v| v.get("served").and_then(|s| s.as_bool()).unwrap_or(false))
            .and_then(|v| v.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("v1")
            .to_string();
        Some(GroupVersionKind { group, version, kind })
    } else {
        None
    }
}

fn is_cluster_prerequisite(gvk: &GroupVersionKind) -> bool {
    gvk.kind == "Namespace"
        || (gvk.group == "apiextensions.k8s.io" && gvk.kind == "CustomResourceDefinition")
        || (gvk.group == "apiregistration.k8s.io" && gvk.kind == "APIService")
}

fn needs_finalizer(gvk: &GroupVersionKind) -> bool {
    (gvk.group == "apiextensions.k8s.io" && gvk.kind == "CustomResourceDefinition")
        || (gvk.group == "apiregistration.k8s.io" && gvk.kind == "APIService")
}

fn discovery_err(gvk: &GroupVersionKind, cause: impl std::fmt::Display) -> K8sError {
    K8sError::Discovery(format!("{}/{} {}: {cause}", gvk.group, gvk.version, gvk.kind))
}

impl ApiBridge {
    pub fn new(
        client: Client,
        field_owner: impl Into<String>,
        controller_name: impl Into<String>,
        reclaim_prefixes: Vec<String>,
    ) -> Self {
        Self {
            client,
            field_owner: field_owner.into(),
            reporter: Reporter::from(controller_name.into()),
            retry_table: Arc::new(RetryTable::new()),
            reclaim_prefixes,
        }
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(kube::core::ApiResource, Scope), K8sError> {
        let (ar, caps) = pinned_kind(&self.client, gvk)
            .await
            .map_err(|e| discovery_err(gvk, e))?;
        // Cluster prerequisites (Namespace/CRD/APIService) are always cluster-scoped
        // even if discovery's capability report lags a fresh install; trust the table.
        let scope = if is_cluster_prerequisite(gvk) { Scope::Cluster } else { caps.scope };
        Ok((ar, scope))
    }

    fn api_for(&self, ar: &kube::core::ApiResource, scope: Scope, namespace: Option<&str>) -> Api<DynamicObject> {
        match (scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, ar),
            _ => Api::all_with(self.client.clone(), ar),
        }
    }

    #[instrument(skip_all, fields(group = %key.group, kind = %key.kind, namespace = %key.namespace, name = %key.name))]
    pub async fn read(&self, key: &ObjectKey) -> Result<Option<Object>, K8sError> {
        let gvk = GroupVersionKind {
            group: key.group.clone(),
            version: key.version.clone(),
            kind: key.kind.clone(),
        };
        let (ar, scope) = match self.resolve(&gvk).await {
            Ok(v) => v,
            Err(K8sError::Discovery(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let ns = if key.namespace.is_empty() { None } else { Some(key.namespace.as_str()) };
        let api = self.api_for(&ar, scope, ns);
        match api.get(&key.name).await {
            Ok(obj) => Ok(Some(Object::from_dynamic(obj))),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(self.classify(None, e).await),
        }
    }

    /// Lists live objects of `gvk`, optionally scoped to `namespace` and filtered by a
    /// raw label selector, capped at `limit` — the primitive [`crate::engine::usage`]'s
    /// cluster-wide usage check and the finalizer-clearing check in [`Self::delete`] both
    /// build on.
    #[instrument(skip_all, fields(group = %gvk.group, kind = %gvk.kind))]
    pub async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: &str,
        limit: u32,
    ) -> Result<Vec<Object>, K8sError> {
        let (ar, scope) = match self.resolve(gvk).await {
            Ok(v) => v,
            Err(K8sError::Discovery(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let api = self.api_for(&ar, scope, namespace);
        let mut lp = ListParams::default().limit(limit);
        if !label_selector.is_empty() {
            lp = lp.labels(label_selector);
        }
        let list = api.list(&lp).await.map_err(K8sError::Kube)?;
        Ok(list.items.into_iter().map(Object::from_dynamic).collect())
    }

    #[instrument(skip_all)]
    pub async fn create(&self, mut object: Object) -> Result<Object, K8sError> {
        let gvk = object.gvk()?;
        object.clear_managed_fields();
        object.set_resource_version(None);
        if needs_finalizer(&gvk) && !object.finalizers().iter().any(|f| f == FINALIZER) {
            object.finalizers_mut().push(FINALIZER.to_string());
        }
        let (ar, scope) = self.resolve(&gvk).await?;
        let api = self.api_for(&ar, scope, object.namespace());
        let result = api.create(&PostParams::default(), object.as_dynamic()).await;
        self.emit(&object, "Create", result.is_ok()).await;
        match result {
            Ok(obj) => Ok(Object::from_dynamic(obj)),
            Err(e) => Err(self.classify(object.uid(), e).await),
        }
    }

    #[instrument(skip_all, fields(policy = ?policy))]
    pub async fn update(
        &self,
        desired: Object,
        live: &Object,
        policy: UpdatePolicy,
    ) -> Result<Object, K8sError> {
        let gvk = desired.gvk()?;
        let (ar, scope) = self.resolve(&gvk).await?;
        let api = self.api_for(&ar, scope, desired.namespace());
        let name = desired.name().ok_or(K8sError::MissingName)?.to_string();

        let result: Result<DynamicObject, kube::Error> = match policy {
            UpdatePolicy::Recreate => {
                let dp = DeleteParams {
                    preconditions: Some(Preconditions {
                        uid: live.uid().map(str::to_string),
                        resource_version: None,
                    }),
                    ..DeleteParams::default()
                };
                if let Err(e) = api.delete(&name, &dp).await {
                    return Err(self.classify(live.uid(), e).await);
                }
                api.create(&PostParams::default(), desired.as_dynamic()).await
            }
            UpdatePolicy::Replace => {
                let mut body = desired.clone();
                body.set_resource_version(live.resource_version().map(str::to_string));
                api.replace(&name, &ReplaceParams::default(), body.as_dynamic()).await
            }
            UpdatePolicy::SsaMerge => {
                let pp = PatchParams::apply(self.field_owner.clone());
                api.patch(&name, &pp, &Patch::Apply(desired.as_dynamic())).await
            }
            UpdatePolicy::SsaOverride => {
                let merger = FieldManagerMerger::new(self.field_owner.clone());
                let outcome = merger.merge(live.managed_fields().to_vec(), &self.reclaim_prefixes);
                let mut pp = PatchParams::apply(self.field_owner.clone());
                if outcome.changed {
                    pp = pp.force();
                }
                api.patch(&name, &pp, &Patch::Apply(desired.as_dynamic())).await
            }
        };

        self.emit(&desired, "Update", result.is_ok()).await;
        match result {
            Ok(obj) => Ok(Object::from_dynamic(obj)),
            Err(e) => Err(self.classify(live.uid(), e).await),
        }
    }

    /// Issues the cluster delete unconditionally, then — only for CRDs/APIServices still
    /// carrying [`FINALIZER`] — checks whether anything still depends on the type being
    /// removed before releasing it. A CRD whose instances are gone keeps its finalizer
    /// cleared; one still fronting live instances stays blocked until a later delete call
    /// finds it empty. A list failure defaults to "still in use": never release a hook we
    /// couldn't confirm is safe to drop.
    #[instrument(skip_all, fields(group = %key.group, kind = %key.kind, namespace = %key.namespace, name = %key.name))]
    pub async fn delete(&self, key: &ObjectKey, live: &Object) -> Result<(), K8sError> {
        let gvk = GroupVersionKind {
            group: key.group.clone(),
            version: key.version.clone(),
            kind: key.kind.clone(),
        };
        let (ar, scope) = self.resolve(&gvk).await?;
        let ns = if key.namespace.is_empty() { None } else { Some(key.namespace.as_str()) };
        let api = self.api_for(&ar, scope, ns);

        let dp = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            preconditions: Some(Preconditions {
                uid: live.uid().map(str::to_string),
                resource_version: live.resource_version().map(str::to_string),
            }),
            ..DeleteParams::default()
        };
        let result = api.delete(&key.name, &dp).await;
        self.emit(live, "Delete", result.is_ok()).await;
        match result {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(self.classify(live.uid(), e).await),
        }

        if needs_finalizer(&gvk) && live.finalizers().iter().any(|f| f == FINALIZER) {
            let in_use = match defined_gvk(live) {
                Some(child_gvk) => match self.list(&child_gvk, None, "", 1).await {
                    Ok(items) => !items.is_empty(),
                    Err(_) => true,
                },
                None => false,
            };
            if !in_use {
                self.clear_finalizer(&api, key, live).await?;
            }
        }

        Ok(())
    }

    /// Clears [`FINALIZER`] with a single retry on a stale resource version — the window
    /// between the usage check and this patch is short enough that one retry covers it.
    async fn clear_finalizer(&self, api: &Api<DynamicObject>, key: &ObjectKey, live: &Object) -> Result<(), K8sError> {
        let mut stripped = live.clone();
        stripped.finalizers_mut().retain(|f| f != FINALIZER);
        let patch = serde_json::json!({"metadata": {"finalizers": stripped.finalizers()}});
        let pp = PatchParams::default();
        match api.patch(&key.name, &pp, &Patch::Merge(&patch)).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => api
                .patch(&key.name, &pp, &Patch::Merge(&patch))
                .await
                .map(|_| ())
                .map_err(K8sError::Kube),
            Err(e) => Err(K8sError::Kube(e)),
        }
    }

    /// Translates a raw kube error into at most one [`crate::error::ReconcileError::Retriable`]
    /// per object UID per TTL window; repeated failures on the same object within the
    /// window are left for the caller's own backoff rather than re-surfaced every time.
    pub async fn classify_retry(&self, uid: Option<&str>, err: &kube::Error) -> Option<u64> {
        let retriable = matches!(
            err,
            kube::Error::Api(e) if e.code == 409 || e.code == 429 || e.code >= 500
        );
        if !retriable {
            return None;
        }
        let uid = uid.unwrap_or("");
        if self.retry_table.first_sighting(uid).await {
            Some(1000)
        } else {
            None
        }
    }

    /// Wraps a raw kube error with [`Self::classify_retry`]'s signal, producing
    /// [`K8sError::Retriable`] when this is the first sighting of a retriable failure for
    /// this object, else the plain wrapped error.
    async fn classify(&self, uid: Option<&str>, err: kube::Error) -> K8sError {
        match self.classify_retry(uid, &err).await {
            Some(retry_after_ms) => K8sError::Retriable { reason: err.to_string(), retry_after_ms },
            None => K8sError::Kube(err),
        }
    }

    async fn emit(&self, object: &Object, action: &str, success: bool) {
        let Ok(dynamic_ref) = Self::object_reference(object) else {
            return;
        };
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), dynamic_ref);
        let event = Event {
            type_: if success { EventType::Normal } else { EventType::Warning },
            reason: action.to_string(),
            note: Some(format!("{action} {}", success_word(success))),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(&event).await {
            tracing::debug!(error = %e, "failed to publish event");
        }
    }

    fn object_reference(object: &Object) -> Result<kube::core::ObjectReference, K8sError> {
        let gvk = object.gvk()?;
        Ok(kube::core::ObjectReference {
            api_version: Some(if gvk.group.is_empty() {
                gvk.version.clone()
            } else {
                format!("{}/{}", gvk.group, gvk.version)
            }),
            kind: Some(gvk.kind),
            name: object.name().map(str::to_string),
            namespace: object.namespace().map(str::to_string),
            uid: object.uid().map(str::to_string),
            resource_version: object.resource_version().map(str::to_string),
            ..Default::default()
        })
    }
}

fn success_word(success: bool) -> &'static str {
    if success {
        "succeeded"
    } else {
        "failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_prerequisites_are_recognized() {
        let ns = GroupVersionKind { group: "".into(), version: "v1".into(), kind: "Namespace".into() };
        let crd = GroupVersionKind {
            group: "apiextensions.k8s.io".into(),
            version: "v1".into(),
            kind: "CustomResourceDefinition".into(),
        };
        let deploy = GroupVersionKind { group: "apps".into(), version: "v1".into(), kind: "Deployment".into() };
        assert!(is_cluster_prerequisite(&ns));
        assert!(is_cluster_prerequisite(&crd));
        assert!(!is_cluster_prerequisite(&deploy));
    }

    #[test]
    fn only_crd_and_api_service_need_the_cleanup_finalizer() {
        let crd = GroupVersionKind {
            group: "apiextensions.k8s.io".into(),
            version: "v1".into(),
            kind: "CustomResourceDefinition".into(),
        };
        let deploy = GroupVersionKind { group: "apps".into(), version: "v1".into(), kind: "Deployment".into() };
        assert!(needs_finalizer(&crd));
        assert!(!needs_finalizer(&deploy));
    }

    #[tokio::test]
    async fn retry_table_surfaces_one_retriable_signal_per_uid_per_window() {
        let table = RetryTable::new();
        assert!(table.first_sighting("uid-1").await);
        assert!(!table.first_sighting("uid-1").await);
        assert!(table.first_sighting("uid-2").await);
    }
}
