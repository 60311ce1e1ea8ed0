//! Persisted per-object reconciliation state: one [`InventoryItem`] per
//! managed object, plus the matching and ordering helpers the engine drives off of.

use crate::error::ReconcileError;
use crate::key::{self, HasGvk, ObjectKey};
use crate::policy::{Orders, Policies};
use crate::status::StatusVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an item sits in its own lifecycle. The empty phase is meaningful on its own:
/// an item that has never completed a successful apply, distinct from `Ready` so callers
/// can tell "never applied" from "applied, now current".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Phase {
    #[default]
    #[serde(rename = "")]
    Empty,
    ScheduledForApplication,
    Creating,
    Updating,
    Ready,
    ScheduledForDeletion,
    Deleting,
    ScheduledForCompletion,
    Completing,
    Completed,
}

impl Phase {
    /// Whether an object in this phase counts toward a wave's readiness gate —
    /// `Ready` objects are converged; `Completed` ones were purged on schedule and are
    /// equally no longer something a later wave needs to wait on.
    pub fn is_settled(self) -> bool {
        matches!(self, Phase::Ready | Phase::Completed)
    }
}

/// A GVK pattern with `"*"` as a wildcard on group or kind, describing the set of types a
/// component's generator may ever produce — used by usage checks independent of which
/// concrete objects currently sit in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GvkPattern {
    pub group: String,
    pub kind: String,
}

impl GvkPattern {
    pub const WILDCARD: &'static str = "*";

    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    pub fn matches(&self, o: &impl HasGvk) -> bool {
        (self.group == Self::WILDCARD || self.group == o.group())
            && (self.kind == Self::WILDCARD || self.kind == o.kind())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub key: ObjectKey,
    pub policies: Policies,
    pub orders: Orders,
    #[serde(default)]
    pub managed_types: Vec<GvkPattern>,
    pub digest: String,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub status: Option<StatusVerdict>,
    #[serde(default)]
    pub last_applied_at: Option<DateTime<Utc>>,
}

impl HasGvk for InventoryItem {
    fn group(&self) -> &str {
        &self.key.group
    }
    fn kind(&self) -> &str {
        &self.key.kind
    }
}

/// Ordered collection of [`InventoryItem`]s, persisted verbatim by `release_store`.
/// Lookups match on group/kind/namespace/name and deliberately ignore `version`: an
/// object's API version can migrate (e.g. `apps/v1beta1` to `apps/v1`) without changing
/// its cluster identity, and the inventory must keep tracking the same entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    items: Vec<InventoryItem>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[InventoryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn matches_key(item: &InventoryItem, key: &ObjectKey) -> bool {
        item.key.group == key.group
            && item.key.kind == key.kind
            && item.key.namespace == key.namespace
            && item.key.name == key.name
    }

    fn find_index(&self, key: &ObjectKey) -> Result<Option<usize>, ReconcileError> {
        let mut found = None;
        for (i, item) in self.items.iter().enumerate() {
            if Self::matches_key(item, key) {
                if found.is_some() {
                    return Err(ReconcileError::CorruptState(format!(
                        "multiple inventory entries match {}/{} {}/{}",
                        key.group, key.kind, key.namespace, key.name
                    )));
                }
                found = Some(i);
            }
        }
        Ok(found)
    }

    pub fn get(&self, key: &ObjectKey) -> Result<Option<&InventoryItem>, ReconcileError> {
        Ok(self.find_index(key)?.map(|i| &self.items[i]))
    }

    pub fn get_mut(&mut self, key: &ObjectKey) -> Result<Option<&mut InventoryItem>, ReconcileError> {
        let idx = self.find_index(key)?;
        Ok(idx.map(move |i| &mut self.items[i]))
    }

    pub fn upsert(&mut self, item: InventoryItem) -> Result<(), ReconcileError> {
        match self.find_index(&item.key)? {
            Some(i) => self.items[i] = item,
            None => self.items.push(item),
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &ObjectKey) -> Result<Option<InventoryItem>, ReconcileError> {
        Ok(self.find_index(key)?.map(|i| self.items.remove(i)))
    }

    /// Orders entries for a component-level Apply: user `apply-order` first, built-in
    /// kind priority as the tiebreak, ties otherwise preserved.
    pub fn sort_for_apply(&mut self) {
        key::stable_sort_by_order_then_priority(
            &mut self.items,
            |i| i.orders.apply_order,
            |i| key::apply_priority(i),
        );
    }

    /// Orders entries for a component-level Delete, the inverse table.
    pub fn sort_for_delete(&mut self) {
        key::stable_sort_by_order_then_priority(
            &mut self.items,
            |i| i.orders.delete_order,
            |i| key::delete_priority(i),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AdoptionPolicy, DeletePolicy, ReconcilePolicy, UpdatePolicy};

    fn item(group: &str, kind: &str, name: &str, version: &str) -> InventoryItem {
        InventoryItem {
            key: ObjectKey::new(group, version, kind, "default", name),
            policies: Policies {
                adoption: AdoptionPolicy::Never,
                reconcile: ReconcilePolicy::OnObjectChange,
                update: UpdatePolicy::SsaMerge,
                delete: DeletePolicy::Delete,
            },
            orders: Orders::default(),
            managed_types: vec![],
            digest: "d".into(),
            phase: Phase::Ready,
            status: None,
            last_applied_at: None,
        }
    }

    #[test]
    fn lookup_ignores_version() {
        let mut inv = Inventory::new();
        inv.upsert(item("apps", "Deployment", "web", "v1")).unwrap();
        let key = ObjectKey::new("apps", "v2beta1", "Deployment", "default", "web");
        assert!(inv.get(&key).unwrap().is_some());
    }

    #[test]
    fn upsert_replaces_existing_entry() {
        let mut inv = Inventory::new();
        inv.upsert(item("apps", "Deployment", "web", "v1")).unwrap();
        let mut updated = item("apps", "Deployment", "web", "v1");
        updated.digest = "d2".into();
        inv.upsert(updated).unwrap();
        assert_eq!(inv.len(), 1);
        assert_eq!(inv.items()[0].digest, "d2");
    }

    #[test]
    fn remove_drops_matching_entry() {
        let mut inv = Inventory::new();
        inv.upsert(item("apps", "Deployment", "web", "v1")).unwrap();
        let key = ObjectKey::new("apps", "v1", "Deployment", "default", "web");
        let removed = inv.remove(&key).unwrap();
        assert!(removed.is_some());
        assert!(inv.is_empty());
    }

    #[test]
    fn sort_for_delete_puts_crds_before_namespaces() {
        let mut inv = Inventory::new();
        inv.upsert(item("", "Namespace", "ns", "v1")).unwrap();
        inv.upsert(item(
            "apiextensions.k8s.io",
            "CustomResourceDefinition",
            "foos.example.com",
            "v1",
        ))
        .unwrap();
        inv.sort_for_delete();
        assert_eq!(inv.items()[0].key.kind, "CustomResourceDefinition");
        assert_eq!(inv.items()[1].key.kind, "Namespace");
    }

    #[test]
    fn gvk_pattern_wildcard_matches_any_kind() {
        let pattern = GvkPattern::new("apps", "*");
        let key = ObjectKey::new("apps", "v1", "StatefulSet", "default", "x");
        assert!(pattern.matches(&key));
    }
}
