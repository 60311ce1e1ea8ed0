//! Per-object policy resolution from annotations, layered over reconciler
//! defaults. Annotation constants mirror `k8s/annotations.rs`'s convention
//! of namespacing every key under a single prefix.

use crate::error::ReconcileError;
use crate::key::{is_api_service, is_crd, is_namespace, HasGvk};
use crate::object::Object;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_ORDER: i32 = -32768;
pub const MAX_ORDER: i32 = 32767;
/// Sentinel meaning "never purged" — one past the valid purge-order range.
pub const NO_PURGE: i32 = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdoptionPolicy {
    Never,
    IfUnowned,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcilePolicy {
    OnObjectChange,
    OnObjectOrComponentChange,
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatePolicy {
    Recreate,
    Replace,
    SsaMerge,
    SsaOverride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletePolicy {
    Delete,
    Orphan,
    OrphanOnApply,
    OrphanOnDelete,
}

impl DeletePolicy {
    pub fn is_orphan_on_apply(self) -> bool {
        matches!(self, DeletePolicy::Orphan | DeletePolicy::OrphanOnApply)
    }

    pub fn is_orphan_on_delete(self) -> bool {
        matches!(self, DeletePolicy::Orphan | DeletePolicy::OrphanOnDelete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policies {
    pub adoption: AdoptionPolicy,
    pub reconcile: ReconcilePolicy,
    pub update: UpdatePolicy,
    pub delete: DeletePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orders {
    pub apply_order: i32,
    pub delete_order: i32,
    pub purge_order: i32,
}

impl Default for Orders {
    fn default() -> Self {
        Self {
            apply_order: 0,
            delete_order: 0,
            purge_order: NO_PURGE,
        }
    }
}

/// Reconciler-wide defaults a call site falls back to when an object carries no
/// (or an empty / "default") annotation for a given policy.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerDefaults {
    pub adoption: AdoptionPolicy,
    pub reconcile: ReconcilePolicy,
    pub update: UpdatePolicy,
    pub delete: DeletePolicy,
}

impl Default for ReconcilerDefaults {
    /// The default reconcile policy is left an open question upstream; this crate takes
    /// a reconciler-wide default (`OnObjectChange`), configurable by callers.
    fn default() -> Self {
        Self {
            adoption: AdoptionPolicy::Never,
            reconcile: ReconcilePolicy::OnObjectChange,
            update: UpdatePolicy::SsaMerge,
            delete: DeletePolicy::Delete,
        }
    }
}

pub struct PolicyResolver<'a> {
    pub reconciler_name: &'a str,
    pub defaults: ReconcilerDefaults,
}

impl<'a> PolicyResolver<'a> {
    pub fn new(reconciler_name: &'a str, defaults: ReconcilerDefaults) -> Self {
        Self {
            reconciler_name,
            defaults,
        }
    }

    fn annotation_key(&self, suffix: &str) -> String {
        format!("{}/{}", self.reconciler_name, suffix)
    }

    fn empty_annotations() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    pub fn resolve(&self, object: &Object) -> Result<(Policies, Orders), ReconcileError> {
        let empty = Self::empty_annotations();
        let ann = object.annotations().unwrap_or(&empty);

        let adoption = self.parse_enum(ann, "adoption-policy", self.defaults.adoption, |v| {
            match v {
                "never" => Some(AdoptionPolicy::Never),
                "if-unowned" => Some(AdoptionPolicy::IfUnowned),
                "always" => Some(AdoptionPolicy::Always),
                _ => None,
            }
        })?;
        let reconcile = self.parse_enum(ann, "reconcile-policy", self.defaults.reconcile, |v| {
            match v {
                "on-object-change" => Some(ReconcilePolicy::OnObjectChange),
                "on-object-or-component-change" => Some(ReconcilePolicy::OnObjectOrComponentChange),
                "once" => Some(ReconcilePolicy::Once),
                _ => None,
            }
        })?;
        let update = self.parse_enum(ann, "update-policy", self.defaults.update, |v| match v {
            "recreate" => Some(UpdatePolicy::Recreate),
            "replace" => Some(UpdatePolicy::Replace),
            "ssa-merge" => Some(UpdatePolicy::SsaMerge),
            "ssa-override" => Some(UpdatePolicy::SsaOverride),
            _ => None,
        })?;
        let delete = self.parse_enum(ann, "delete-policy", self.defaults.delete, |v| match v {
            "delete" => Some(DeletePolicy::Delete),
            "orphan" => Some(DeletePolicy::Orphan),
            "orphan-on-apply" => Some(DeletePolicy::OrphanOnApply),
            "orphan-on-delete" => Some(DeletePolicy::OrphanOnDelete),
            _ => None,
        })?;

        let apply_order = self.parse_order(ann, "apply-order", 0, MIN_ORDER, MAX_ORDER)?;
        let delete_order = self.parse_order(ann, "delete-order", 0, MIN_ORDER, MAX_ORDER)?;
        let purge_order = self.parse_purge_order(ann, object)?;

        Ok((
            Policies {
                adoption,
                reconcile,
                update,
                delete,
            },
            Orders {
                apply_order,
                delete_order,
                purge_order,
            },
        ))
    }

    fn parse_enum<P: Copy>(
        &self,
        ann: &BTreeMap<String, String>,
        suffix: &str,
        default: P,
        parse: impl Fn(&str) -> Option<P>,
    ) -> Result<P, ReconcileError> {
        let key = self.annotation_key(suffix);
        let Some(raw) = ann.get(&key) else {
            return Ok(default);
        };
        let value = lower_kebab(raw);
        if value.is_empty() || value == "default" {
            return Ok(default);
        }
        parse(&value).ok_or_else(|| {
            ReconcileError::Validation(format!("invalid value {raw:?} for annotation {key}"))
        })
    }

    fn parse_order(
        &self,
        ann: &BTreeMap<String, String>,
        suffix: &str,
        default: i32,
        min: i32,
        max: i32,
    ) -> Result<i32, ReconcileError> {
        let key = self.annotation_key(suffix);
        let Some(raw) = ann.get(&key) else {
            return Ok(default);
        };
        let n: i32 = raw.trim().parse().map_err(|_| {
            ReconcileError::Validation(format!("invalid integer {raw:?} for annotation {key}"))
        })?;
        if n < min || n > max {
            return Err(ReconcileError::Validation(format!(
                "{key} out of range [{min},{max}]: {n}"
            )));
        }
        Ok(n)
    }

    fn parse_purge_order(
        &self,
        ann: &BTreeMap<String, String>,
        object: &Object,
    ) -> Result<i32, ReconcileError> {
        let key = self.annotation_key("purge-order");
        let is_prerequisite = is_namespace(object) || is_crd(object) || is_api_service(object);
        if is_prerequisite && ann.contains_key(&key) {
            return Err(ReconcileError::Validation(format!(
                "{key}: Namespaces, CRDs and APIServices must not specify a purge-order"
            )));
        }
        self.parse_order(ann, "purge-order", NO_PURGE, MIN_ORDER, NO_PURGE)
    }
}

fn lower_kebab(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{DynamicObject, TypeMeta};

    fn object_with(annotations: &[(&str, &str)], kind: &str, group: &str) -> Object {
        let mut dyn_obj = DynamicObject::new(
            "name",
            &kube::core::ApiResource {
                group: group.to_string(),
                version: "v1".to_string(),
                api_version: if group.is_empty() {
                    "v1".to_string()
                } else {
                    format!("{group}/v1")
                },
                kind: kind.to_string(),
                plural: "things".to_string(),
            },
        );
        dyn_obj.types = Some(TypeMeta {
            api_version: if group.is_empty() {
                "v1".to_string()
            } else {
                format!("{group}/v1")
            },
            kind: kind.to_string(),
        });
        let mut o = Object::from_dynamic(dyn_obj);
        for (k, v) in annotations {
            o.annotations_mut().insert(format!("acme.io/{k}"), v.to_string());
        }
        o
    }

    fn resolver() -> PolicyResolver<'static> {
        PolicyResolver::new("acme.io", ReconcilerDefaults::default())
    }

    #[test]
    fn unset_annotations_fall_back_to_defaults() {
        let o = object_with(&[], "ConfigMap", "");
        let (policies, orders) = resolver().resolve(&o).unwrap();
        assert_eq!(policies.adoption, AdoptionPolicy::Never);
        assert_eq!(policies.reconcile, ReconcilePolicy::OnObjectChange);
        assert_eq!(orders.apply_order, 0);
        assert_eq!(orders.purge_order, NO_PURGE);
    }

    #[test]
    fn recognized_values_are_case_and_dash_normalized() {
        let o = object_with(&[("adoption-policy", "ALWAYS")], "ConfigMap", "");
        let (policies, _) = resolver().resolve(&o).unwrap();
        assert_eq!(policies.adoption, AdoptionPolicy::Always);
    }

    #[test]
    fn unknown_value_is_invalid_annotation() {
        let o = object_with(&[("adoption-policy", "sometimes")], "ConfigMap", "");
        let err = resolver().resolve(&o).unwrap_err();
        assert_matches::assert_matches!(err, ReconcileError::Validation(_));
    }

    #[test]
    fn order_out_of_range_is_rejected() {
        let o = object_with(&[("apply-order", "99999")], "ConfigMap", "");
        let err = resolver().resolve(&o).unwrap_err();
        assert_matches::assert_matches!(err, ReconcileError::Validation(_));
    }

    #[test]
    fn purge_order_on_namespace_is_rejected() {
        let o = object_with(&[("purge-order", "0")], "Namespace", "");
        let err = resolver().resolve(&o).unwrap_err();
        assert_matches::assert_matches!(err, ReconcileError::Validation(_));
    }

    #[test]
    fn missing_purge_order_defaults_to_sentinel() {
        let o = object_with(&[], "Job", "batch");
        let (_, orders) = resolver().resolve(&o).unwrap();
        assert_eq!(orders.purge_order, NO_PURGE);
    }
}
