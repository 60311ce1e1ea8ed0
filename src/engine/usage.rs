//! `IsDeletionAllowed`: a cluster-wide prerequisite (CRD, APIService, shared
//! CustomResource type) must not be purged while any component other than the caller
//! still has live instances of a type declared under some member's `managed_types` — the
//! declaration a generator makes about the GVKs it may ever produce, independent of which
//! concrete objects currently exist in this component's own inventory.

use crate::api_bridge::ApiBridge;
use crate::engine::OWNER_LABEL;
use crate::error::ReconcileError;
use crate::inventory::{GvkPattern, Inventory};
use kube::core::GroupVersionKind;

/// Checks the live cluster, not the in-memory inventory: a sibling component could have
/// created instances of a shared type after this component's inventory was last loaded.
/// Short-circuits to `true` without any cluster call when every member already orphans on
/// delete — nothing this delete does will touch live instances regardless.
pub async fn is_deletion_allowed(
    bridge: &ApiBridge,
    inventory: &Inventory,
    owner: &str,
) -> Result<(bool, String), ReconcileError> {
    if inventory
        .items()
        .iter()
        .all(|i| i.policies.delete.is_orphan_on_delete())
    {
        return Ok((true, "every inventory member orphans on delete".to_string()));
    }

    let mut patterns: Vec<GvkPattern> = Vec::new();
    for item in inventory.items() {
        for pattern in &item.managed_types {
            if !patterns.contains(pattern) {
                patterns.push(pattern.clone());
            }
        }
    }

    let selector = format!("{OWNER_LABEL}!={owner}");
    for pattern in &patterns {
        if pattern.group == GvkPattern::WILDCARD || pattern.kind == GvkPattern::WILDCARD {
            // A wildcard pattern names a whole group or every kind, not one queryable
            // GVK; it can't gate a live-cluster check and is skipped rather than treated
            // as an automatic block.
            continue;
        }
        let gvk = GroupVersionKind {
            group: pattern.group.clone(),
            version: "v1".to_string(),
            kind: pattern.kind.clone(),
        };
        let live = bridge
            .list(&gvk, None, &selector, 1)
            .await
            .map_err(|e| ReconcileError::from_k8s(e, format!("{}/{}", pattern.group, pattern.kind)))?;
        if !live.is_empty() {
            return Ok((
                false,
                format!("{}/{} still has instances owned by another component", pattern.group, pattern.kind),
            ));
        }
    }
    Ok((true, "no foreign-owned instances found".to_string()))
}
