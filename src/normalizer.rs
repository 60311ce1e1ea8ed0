//! Normalizes generator output into a form the engine can plan against:
//! validates GVK presence, rejects `generateName`, resolves each object's scope through
//! REST discovery (with a bootstrap fallback for the cluster-scoped kinds a batch might
//! be installing for the first time), injects or clears namespace to match scope, and
//! rejects duplicate keys within the same batch.

use crate::error::{K8sError, ReconcileError};
use crate::key::ObjectKey;
use crate::object::Object;
use kube::core::Scope;
use kube::discovery::pinned_kind;
use kube::Client;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::instrument;

/// The scope a CRD manifest in the same batch declares for the kind it defines, read
/// straight from `.spec.group`/`.spec.names.kind`/`.spec.scope` — the fallback
/// `resolve_scope` consults when discovery has no entry yet because the CRD that would
/// register the kind is only being installed in this very batch.
fn crd_defined_scope(object: &Object) -> Option<((String, String), Scope)> {
    let gvk = object.gvk().ok()?;
    if !(gvk.group == "apiextensions.k8s.io" && gvk.kind == "CustomResourceDefinition") {
        return None;
    }
    let data = &object.as_dynamic().data;
    let spec = data.get("spec")?;
    let group = spec.get("group")?.as_str()?.to_string();
    let kind = spec.get("names")?.get("kind")?.as_str()?.to_string();
    let scope = match spec.get("scope").and_then(Value::as_str) {
        Some("Cluster") => Scope::Cluster,
        _ => Scope::Namespaced,
    };
    Some(((group, kind), scope))
}

pub struct ObjectNormalizer {
    client: Client,
    default_namespace: String,
}

impl ObjectNormalizer {
    pub fn new(client: Client, default_namespace: impl Into<String>) -> Self {
        Self {
            client,
            default_namespace: default_namespace.into(),
        }
    }

    #[instrument(skip_all, fields(count = objects.len()))]
    pub async fn normalize(&self, objects: Vec<Object>) -> Result<Vec<Object>, ReconcileError> {
        let fallback_scopes: HashMap<(String, String), Scope> =
            objects.iter().filter_map(crd_defined_scope).collect();

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(objects.len());
        for mut object in objects {
            let gvk = object.gvk().map_err(ReconcileError::Transient)?;
            if gvk.kind.is_empty() {
                return Err(ReconcileError::Validation(
                    "object is missing .kind".to_string(),
                ));
            }
            if object.generate_name().is_some() {
                return Err(ReconcileError::Validation(format!(
                    "{}/{}: generateName is not supported, every object needs a stable identity",
                    gvk.group, gvk.kind
                )));
            }
            if object.name().is_none() {
                return Err(ReconcileError::Transient(K8sError::MissingName));
            }

            match self.resolve_scope(&object, &fallback_scopes).await? {
                Scope::Cluster => object.set_namespace(None),
                Scope::Namespaced => {
                    if object.namespace().is_none() {
                        object.set_namespace(Some(self.default_namespace.clone()));
                    }
                }
            }

            let key = object.key().map_err(ReconcileError::Transient)?;
            if !seen.insert(key.clone()) {
                return Err(ReconcileError::Validation(format!(
                    "duplicate object {}/{} {}/{} in the same batch",
                    key.group, key.kind, key.namespace, key.name
                )));
            }
            out.push(object);
        }
        Ok(out)
    }

    /// Namespaces, CRDs and APIServices are always cluster-scoped and may not yet be
    /// discoverable — a batch can install a CRD and an instance of it together, and the
    /// instance's own scope only becomes knowable once the CRD lands. Everything else
    /// goes through REST discovery, falling back to `fallback_scopes` (derived from any
    /// CRD manifest in the same batch) when discovery has no entry yet.
    async fn resolve_scope(
        &self,
        object: &Object,
        fallback_scopes: &HashMap<(String, String), Scope>,
    ) -> Result<Scope, ReconcileError> {
        let gvk = object.gvk().map_err(ReconcileError::Transient)?;
        if gvk.kind == "Namespace"
            || (gvk.group == "apiextensions.k8s.io" && gvk.kind == "CustomResourceDefinition")
            || (gvk.group == "apiregistration.k8s.io" && gvk.kind == "APIService")
        {
            return Ok(Scope::Cluster);
        }
        match pinned_kind(&self.client, &gvk).await {
            Ok((_, caps)) => Ok(caps.scope),
            Err(e) => {
                if let Some(scope) = fallback_scopes.get(&(gvk.group.clone(), gvk.kind.clone())) {
                    return Ok(scope.clone());
                }
                Err(ReconcileError::Transient(K8sError::Discovery(format!(
                    "{}/{} {}: {e}",
                    gvk.group, gvk.version, gvk.kind
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{DynamicObject, TypeMeta};
    use serde_json::json;

    #[test]
    fn object_key_hashes_consistently_for_duplicate_detection() {
        let a = ObjectKey::new("", "v1", "ConfigMap", "default", "c");
        let b = ObjectKey::new("", "v1", "ConfigMap", "default", "c");
        let mut seen = HashSet::new();
        assert!(seen.insert(a));
        assert!(!seen.insert(b));
    }

    fn crd(value: serde_json::Value) -> Object {
        let mut dyn_obj: DynamicObject = serde_json::from_value(value).unwrap();
        dyn_obj.types = Some(TypeMeta {
            api_version: "apiextensions.k8s.io/v1".into(),
            kind: "CustomResourceDefinition".into(),
        });
        Object::from_dynamic(dyn_obj)
    }

    #[test]
    fn crd_defined_scope_reads_group_kind_and_scope_from_spec() {
        let o = crd(json!({
            "metadata": {"name": "widgets.example.com"},
            "spec": {
                "group": "example.com",
                "names": {"kind": "Widget"},
                "scope": "Namespaced",
            }
        }));
        let ((group, kind), scope) = crd_defined_scope(&o).unwrap();
        assert_eq!(group, "example.com");
        assert_eq!(kind, "Widget");
        assert_eq!(scope, Scope::Namespaced);
    }

    #[test]
    fn crd_defined_scope_is_none_for_non_crd_objects() {
        let o = {
            let mut dyn_obj = DynamicObject::new(
                "c",
                &kube::core::ApiResource {
                    group: "".into(),
                    version: "v1".into(),
                    api_version: "v1".into(),
                    kind: "ConfigMap".into(),
                    plural: "configmaps".into(),
                },
            );
            dyn_obj.types = Some(TypeMeta { api_version: "v1".into(), kind: "ConfigMap".into() });
            Object::from_dynamic(dyn_obj)
        };
        assert!(crd_defined_scope(&o).is_none());
    }
}
