//! Server-side-apply field-manager reconciliation for the `SsaOverride` update policy.
//! A `fields_v1` tree's nested JSON object keys (`f:<field>`, `k:<key>`,
//! `v:<value>`) *are* its field-path set, so folding one manager's ownership into
//! another's is exactly a recursive JSON-object union — no separate path-flattening code
//! is needed.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{FieldsV1, ManagedFieldsEntry};
use serde_json::Value;

pub struct FieldManagerMerger {
    pub field_owner: String,
}

pub struct MergeOutcome {
    pub entries: Vec<ManagedFieldsEntry>,
    /// Whether ownership actually moved — lets the caller skip an update RPC when the
    /// engine already owns every field it would otherwise reclaim.
    pub changed: bool,
}

impl FieldManagerMerger {
    pub fn new(field_owner: impl Into<String>) -> Self {
        Self {
            field_owner: field_owner.into(),
        }
    }

    /// Folds every main-resource entry already owned by `field_owner`, or whose manager
    /// starts with any entry in `reclaim_prefixes`, into one entry under `field_owner`.
    /// Subresource entries (status, scale, ...) are left untouched — SSA tracks those
    /// independently of the main resource body. An empty prefix matches nothing — unlike
    /// `str::starts_with`, which treats `""` as a prefix of everything, reclaiming from
    /// every foreign manager is never the intent here.
    pub fn merge(&self, entries: Vec<ManagedFieldsEntry>, reclaim_prefixes: &[String]) -> MergeOutcome {
        let mut kept = Vec::new();
        let mut owned_tree: Option<Value> = None;
        let mut changed = false;

        for entry in entries {
            let reclaims = entry.subresource.is_none()
                && (entry.manager.as_deref() == Some(self.field_owner.as_str())
                    || entry.manager.as_deref().is_some_and(|m| {
                        reclaim_prefixes.iter().any(|p| !p.is_empty() && m.starts_with(p.as_str()))
                    }));
            if !reclaims {
                kept.push(entry);
                continue;
            }
            if entry.manager.as_deref() != Some(self.field_owner.as_str()) {
                changed = true;
            }
            if let Some(fields) = entry.fields_v1.map(|f| f.0) {
                owned_tree = Some(match owned_tree.take() {
                    Some(existing) => union(existing, fields),
                    None => fields,
                });
            }
        }

        if let Some(tree) = owned_tree {
            kept.push(ManagedFieldsEntry {
                manager: Some(self.field_owner.clone()),
                operation: Some("Apply".to_string()),
                api_version: None,
                time: None,
                fields_type: Some("FieldsV1".to_string()),
                fields_v1: Some(FieldsV1(tree)),
                subresource: None,
            });
        }

        MergeOutcome {
            entries: kept,
            changed,
        }
    }
}

fn union(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a), Value::Object(b)) => {
            for (k, v) in b {
                a.entry(k)
                    .and_modify(|existing| *existing = union(existing.take(), v.clone()))
                    .or_insert(v);
            }
            Value::Object(a)
        }
        (_, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(manager: &str, fields: Value) -> ManagedFieldsEntry {
        ManagedFieldsEntry {
            manager: Some(manager.to_string()),
            operation: Some("Apply".to_string()),
            api_version: Some("v1".to_string()),
            time: None,
            fields_type: Some("FieldsV1".to_string()),
            fields_v1: Some(FieldsV1(fields)),
            subresource: None,
        }
    }

    #[test]
    fn union_merges_disjoint_sibling_fields() {
        let a = entry(
            "component-reconciler",
            json!({"f:metadata": {"f:labels": {"f:app": {}}}}),
        );
        let b = entry(
            "kubectl",
            json!({"f:metadata": {"f:annotations": {"f:note": {}}}}),
        );
        let merger = FieldManagerMerger::new("component-reconciler");
        let outcome = merger.merge(vec![a, b], &["kubectl".to_string()]);
        assert_eq!(outcome.entries.len(), 1);
        assert!(outcome.changed);
        let merged = outcome.entries[0].fields_v1.as_ref().unwrap().0.clone();
        assert!(merged["f:metadata"]["f:labels"]["f:app"].is_object());
        assert!(merged["f:metadata"]["f:annotations"]["f:note"].is_object());
    }

    #[test]
    fn unrelated_manager_is_left_untouched() {
        let mine = entry("component-reconciler", json!({"f:spec": {}}));
        let other = entry("cert-manager", json!({"f:spec": {"f:tls": {}}}));
        let merger = FieldManagerMerger::new("component-reconciler");
        let outcome = merger.merge(vec![mine, other], &["kubectl".to_string()]);
        assert_eq!(outcome.entries.len(), 2);
        assert!(!outcome.changed);
    }

    #[test]
    fn subresource_entries_are_never_folded() {
        let mut status_entry = entry("kubectl", json!({"f:status": {}}));
        status_entry.subresource = Some("status".to_string());
        let merger = FieldManagerMerger::new("component-reconciler");
        let outcome = merger.merge(vec![status_entry], &["kubectl".to_string()]);
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].subresource.as_deref(), Some("status"));
        assert!(!outcome.changed);
    }

    #[test]
    fn reclaims_from_any_configured_prefix_but_nothing_else() {
        let mine = entry("component-reconciler", json!({"f:spec": {}}));
        let kubectl = entry("kubectl-client-side-apply", json!({"f:metadata": {"f:labels": {}}}));
        let helm = entry("helm", json!({"f:metadata": {"f:annotations": {}}}));
        let other = entry("cert-manager", json!({"f:spec": {"f:tls": {}}}));
        let merger = FieldManagerMerger::new("component-reconciler");
        let outcome = merger.merge(
            vec![mine, kubectl, helm, other],
            &["kubectl".to_string(), "helm".to_string()],
        );
        // mine + kubectl + helm fold into one entry; cert-manager's stays separate.
        assert_eq!(outcome.entries.len(), 2);
        assert!(outcome.changed);
    }

    #[test]
    fn empty_prefix_reclaims_nothing_unlike_starts_with() {
        let other = entry("cert-manager", json!({"f:spec": {"f:tls": {}}}));
        let merger = FieldManagerMerger::new("component-reconciler");
        let outcome = merger.merge(vec![other], &["".to_string()]);
        assert_eq!(outcome.entries.len(), 1);
        assert!(!outcome.changed);
    }
}
