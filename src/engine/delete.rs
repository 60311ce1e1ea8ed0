//! Component-level Delete: walks the persisted inventory in delete-priority
//! order, managed instances before the types defining them, deleting every member
//! unless its delete policy orphans it, and clears the persisted inventory once the
//! walk has fully drained it.

use super::usage::is_deletion_allowed;
use super::{owner_id, Engine};
use crate::error::ReconcileError;
use crate::key::ObjectKey;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct ObjectDeleteOutcome {
    pub key: ObjectKey,
    pub deleted: bool,
}

#[derive(Debug, Default)]
pub struct DeleteOutcome {
    pub objects: Vec<ObjectDeleteOutcome>,
    /// `true` once the inventory has been fully drained and its persisted record removed.
    pub done: bool,
}

impl Engine {
    #[instrument(skip(self))]
    pub async fn delete(&self, component_name: &str) -> Result<DeleteOutcome, ReconcileError> {
        let mut inventory = self
            .release_store
            .load(component_name)
            .await
            .map_err(ReconcileError::Transient)?;

        let owner = owner_id(component_name);

        let (allowed, reason) = is_deletion_allowed(&self.bridge, &inventory, &owner).await?;
        if !allowed {
            warn!(%reason, "deletion blocked by foreign instances");
            self.release_store
                .save(component_name, &inventory)
                .await
                .map_err(ReconcileError::Transient)?;
            return Ok(DeleteOutcome { objects: Vec::new(), done: false });
        }

        let before: Vec<ObjectKey> = inventory.items().iter().map(|i| i.key.clone()).collect();

        let drained = self
            .run_delete_wave(&mut inventory, &owner, |_| true, |policy| policy.is_orphan_on_delete())
            .await?;

        let after: std::collections::HashSet<ObjectKey> =
            inventory.items().iter().map(|i| i.key.clone()).collect();
        let objects: Vec<ObjectDeleteOutcome> = before
            .into_iter()
            .map(|key| {
                let deleted = !after.contains(&key);
                ObjectDeleteOutcome { key, deleted }
            })
            .collect();

        if drained {
            self.release_store
                .delete(component_name)
                .await
                .map_err(ReconcileError::Transient)?;
        } else {
            self.release_store
                .save(component_name, &inventory)
                .await
                .map_err(ReconcileError::Transient)?;
        }

        info!(
            deleted = objects.iter().filter(|o| o.deleted).count(),
            done = drained,
            "delete step complete"
        );
        Ok(DeleteOutcome { objects, done: drained })
    }
}
