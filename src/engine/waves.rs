//! The delete-wave walk shared between Apply's redundant-item purge and the
//! component-level Delete operation: group the delete-sorted inventory by delete-order,
//! retire managed instances before the types that define them, never delete a namespace
//! still referenced by another member, and drive each tombstoned item through
//! Deleting until it is confirmed gone.

use super::{Engine, OWNER_LABEL};
use crate::error::ReconcileError;
use crate::inventory::{Inventory, InventoryItem, Phase};
use crate::key;
use crate::policy::DeletePolicy;
use crate::status::StatusVerdict;

impl Engine {
    /// Walks the delete-order waves of every item `eligible` selects, deleting (or
    /// orphaning, per `is_orphan`) each one. Matching against `managed_types` considers
    /// the whole inventory, not just the eligible subset, so an ineligible defining type
    /// still defers its instances correctly. Returns `true` once every eligible item is
    /// gone, `false` while any is still outstanding.
    pub(super) async fn run_delete_wave(
        &self,
        inventory: &mut Inventory,
        owner: &str,
        eligible: impl Fn(&InventoryItem) -> bool,
        is_orphan: impl Fn(DeletePolicy) -> bool,
    ) -> Result<bool, ReconcileError> {
        inventory.sort_for_delete();
        let all_items = inventory.items().to_vec();
        let items: Vec<InventoryItem> = all_items.iter().filter(|i| eligible(i)).cloned().collect();

        let mut outstanding = false;
        let mut i = 0;
        while i < items.len() {
            let order = items[i].orders.delete_order;
            let mut wave = Vec::new();
            while i < items.len() && items[i].orders.delete_order == order {
                wave.push(items[i].clone());
                i += 1;
            }
            let (managed, rest): (Vec<InventoryItem>, Vec<InventoryItem>) = wave.into_iter().partition(|item| {
                all_items
                    .iter()
                    .any(|other| other.managed_types.iter().any(|pattern| pattern.matches(&item.key)))
            });

            for item in managed.into_iter().chain(rest) {
                if self
                    .retire_one(inventory, owner, &item, &is_orphan)
                    .await?
                {
                    outstanding = true;
                }
            }
        }
        Ok(!outstanding)
    }

    /// Retires a single inventory item; returns `true` if it is still outstanding
    /// afterward (blocked on a namespace reference, mid-Deleting, or just issued).
    async fn retire_one(
        &self,
        inventory: &mut Inventory,
        owner: &str,
        item: &InventoryItem,
        is_orphan: &impl Fn(DeletePolicy) -> bool,
    ) -> Result<bool, ReconcileError> {
        if key::is_namespace(&item.key) {
            let still_referenced = inventory
                .items()
                .iter()
                .any(|other| other.key != item.key && other.key.namespace == item.key.name);
            if still_referenced {
                return Ok(true);
            }
        }

        if is_orphan(item.policies.delete) {
            inventory.remove(&item.key)?;
            return Ok(false);
        }

        let live = self
            .bridge
            .read(&item.key)
            .await
            .map_err(|e| ReconcileError::from_k8s(e, item.key.to_string()))?;

        let Some(live) = live else {
            inventory.remove(&item.key)?;
            return Ok(false);
        };

        let live_owner = live.labels().and_then(|l| l.get(OWNER_LABEL)).map(String::as_str);

        if item.phase == Phase::Deleting {
            if live.deletion_timestamp().is_none() && live_owner == Some(owner) {
                return Err(ReconcileError::CorruptState(format!(
                    "{} still exists with no deletion timestamp and our owner label, after a delete was already issued",
                    item.key
                )));
            }
            if live_owner != Some(owner) {
                // Recreated by a third party since we issued the delete: not ours anymore, release it.
                inventory.remove(&item.key)?;
                return Ok(false);
            }
            return Ok(true);
        }

        self.bridge
            .delete(&item.key, &live)
            .await
            .map_err(|e| ReconcileError::from_k8s(e, item.key.to_string()))?;
        if let Some(stored) = inventory.get_mut(&item.key)? {
            stored.phase = Phase::Deleting;
            stored.status = Some(StatusVerdict::Terminating);
        }
        Ok(true)
    }
}
