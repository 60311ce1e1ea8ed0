//! Component-level Apply: generate desired manifests, normalize them, resolve
//! per-object policy, validate the order/type interlocks, merge the result into the
//! persisted inventory by digest, pre-create any namespace a desired object depends on,
//! drain anything scheduled for completion, then walk apply-order runs in regular/late/
//! managed-instance sub-waves before handing tombstoned items to the shared delete walk.

use super::{owner_id, Engine, DIGEST_ANNOTATION, OWNER_ANNOTATION, OWNER_LABEL};
use crate::config::MissingNamespacePolicy;
use crate::error::{K8sError, ReconcileError};
use crate::generator::GeneratorContext;
use crate::inventory::{GvkPattern, Inventory, InventoryItem, Phase};
use crate::key::{self, ObjectKey};
use crate::object::Object;
use crate::policy::{AdoptionPolicy, Orders, Policies, PolicyResolver, MAX_ORDER};
use crate::status::StatusVerdict;
use chrono::Utc;
use kube::core::{ApiResource, DynamicObject, TypeMeta};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{info, instrument};

/// How stale `lastAppliedAt` must be before an already-converged object is re-pushed even
/// without digest drift, covering a live edit that silently reverted without ever
/// changing the object's observable content signature.
const FORCE_RECHECK_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct ObjectOutcome {
    pub key: ObjectKey,
    pub applied: bool,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub objects: Vec<ObjectOutcome>,
    pub purged: Vec<ObjectKey>,
    /// `true` once every desired object is Ready/Completed, nothing remains scheduled for
    /// completion, and no tombstoned item is still outstanding. The driver stops calling
    /// apply once this is set.
    pub done: bool,
}

struct PlannedObject {
    object: Object,
    key: ObjectKey,
    policies: Policies,
    orders: Orders,
}

/// The GVK a desired CRD manifest declares it defines, parsed from its own
/// `.spec.group`/`.spec.names.kind`. Empty for everything else, including APIServices,
/// which front a whole group/version rather than one kind that can be pattern-matched.
fn declared_managed_types(object: &Object) -> Vec<GvkPattern> {
    let Ok(gvk) = object.gvk() else {
        return Vec::new();
    };
    if gvk.group != "apiextensions.k8s.io" || gvk.kind != "CustomResourceDefinition" {
        return Vec::new();
    }
    let data = &object.as_dynamic().data;
    let Some(spec) = data.get("spec") else {
        return Vec::new();
    };
    let group = spec.get("group").and_then(|v| v.as_str());
    let kind = spec.get("names").and_then(|n| n.get("kind")).and_then(|v| v.as_str());
    match (group, kind) {
        (Some(group), Some(kind)) => vec![GvkPattern::new(group.to_string(), kind.to_string())],
        _ => Vec::new(),
    }
}

/// Checks the static half of the order/type interlock: a managed instance's apply-order
/// is at least its defining type's, its delete-order at most the type's; the same pair of
/// constraints for a namespaced object against its namespace. The dynamic half ("the type
/// does not delete while an instance survives") is enforced separately by always
/// retiring managed instances before their defining type in a delete wave.
fn validate_interlocks(planned: &[PlannedObject]) -> Result<(), ReconcileError> {
    let mut defining: Vec<(GvkPattern, Orders)> = Vec::new();
    for p in planned {
        for pattern in declared_managed_types(&p.object) {
            defining.push((pattern, p.orders));
        }
    }
    let mut namespaces: HashMap<String, Orders> = HashMap::new();
    for p in planned {
        if key::is_namespace(&p.key) {
            namespaces.insert(p.key.name.clone(), p.orders);
        }
    }

    for p in planned {
        for (pattern, type_orders) in &defining {
            if !pattern.matches(&p.key) {
                continue;
            }
            if p.orders.apply_order < type_orders.apply_order {
                return Err(ReconcileError::Validation(format!(
                    "{}: apply-order must be >= its defining type's apply-order",
                    p.key
                )));
            }
            if p.orders.delete_order > type_orders.delete_order {
                return Err(ReconcileError::Validation(format!(
                    "{}: delete-order must be <= its defining type's delete-order",
                    p.key
                )));
            }
        }
        if p.key.namespace.is_empty() {
            continue;
        }
        if let Some(ns_orders) = namespaces.get(&p.key.namespace) {
            if p.orders.apply_order < ns_orders.apply_order {
                return Err(ReconcileError::Validation(format!(
                    "{}: apply-order must be >= its namespace's apply-order",
                    p.key
                )));
            }
            if p.orders.delete_order > ns_orders.delete_order {
                return Err(ReconcileError::Validation(format!(
                    "{}: delete-order must be <= its namespace's delete-order",
                    p.key
                )));
            }
        }
    }
    Ok(())
}

fn group_by_apply_order(planned: &[PlannedObject]) -> Vec<Vec<&PlannedObject>> {
    let mut runs: Vec<Vec<&PlannedObject>> = Vec::new();
    for p in planned {
        match runs.last_mut() {
            Some(last) if last[0].orders.apply_order == p.orders.apply_order => last.push(p),
            _ => runs.push(vec![p]),
        }
    }
    runs
}

fn all_settled(inventory: &Inventory, items: &[&PlannedObject]) -> Result<bool, ReconcileError> {
    for p in items {
        let settled = inventory.get(&p.key)?.map(|i| i.phase.is_settled()).unwrap_or(false);
        if !settled {
            return Ok(false);
        }
    }
    Ok(true)
}

impl Engine {
    #[instrument(skip_all, fields(component = %ctx.component_name))]
    pub async fn apply(&self, ctx: GeneratorContext) -> Result<ApplyOutcome, ReconcileError> {
        let component_name = ctx.component_name.clone();
        let component_revision = ctx.component_revision.clone();
        let mut inventory = self
            .release_store
            .load(&component_name)
            .await
            .map_err(ReconcileError::Transient)?;

        let manifests = self
            .generator
            .generate(&ctx)
            .await
            .map_err(|e| ReconcileError::Validation(e.0))?;
        let objects = self.normalizer.normalize(manifests).await?;

        let resolver = PolicyResolver::new(&self.config.reconciler_name, self.config.policy_defaults);
        let owner = owner_id(&component_name);

        let mut outcomes = Vec::new();
        let mut planned = Vec::new();
        for object in objects {
            let key = match object.key() {
                Ok(k) => k,
                Err(e) => {
                    outcomes.push(ObjectOutcome {
                        key: ObjectKey::new("", "", "", "", "(missing-identity)"),
                        applied: false,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };
            match resolver.resolve(&object) {
                Ok((policies, orders)) => planned.push(PlannedObject { object, key, policies, orders }),
                Err(e) => outcomes.push(ObjectOutcome { key, applied: false, error: Some(e.to_string()) }),
            }
        }

        crate::key::stable_sort_by_order_then_priority(
            &mut planned,
            |p| p.orders.apply_order,
            |p| crate::key::apply_priority(&p.key),
        );

        validate_interlocks(&planned)?;

        // (b) Ownership gate, scoped to objects not already in the inventory: once a
        // component owns an object it never re-runs adoption logic against a later
        // foreign write, that is the update path's problem, not apply's.
        for p in &planned {
            if inventory.get(&p.key)?.is_some() {
                continue;
            }
            let Some(live) = self
                .bridge
                .read(&p.key)
                .await
                .map_err(|e| ReconcileError::from_k8s(e, p.key.to_string()))?
            else {
                continue;
            };
            let live_owner = live.labels().and_then(|l| l.get(OWNER_LABEL)).map(String::as_str);
            match (p.policies.adoption, live_owner) {
                (_, Some(existing)) if existing == owner => {}
                (AdoptionPolicy::Always, _) => {}
                (AdoptionPolicy::IfUnowned, None) => {}
                (AdoptionPolicy::IfUnowned, Some(_)) | (AdoptionPolicy::Never, _) => {
                    return Err(ReconcileError::OwnershipConflict(p.key.to_string()));
                }
            }
        }

        // (c) Merge inventory
        let desired_keys: HashSet<ObjectKey> = planned.iter().map(|p| p.key.clone()).collect();
        let mut added_new_item = false;
        for p in &planned {
            let existing = inventory.get(&p.key)?.cloned();
            let previous_digest = existing.as_ref().map(|i| i.digest.clone());
            let digest = self
                .digests
                .compute(&p.object, p.policies.reconcile, Some(&component_revision), previous_digest.as_deref(), Utc::now())
                .map_err(|e| ReconcileError::from_k8s(e, p.key.to_string()))?;
            let digest_changed = previous_digest.as_deref() != Some(digest.as_str());
            let managed_types = declared_managed_types(&p.object);

            match existing {
                None => {
                    added_new_item = true;
                    inventory.upsert(InventoryItem {
                        key: p.key.clone(),
                        policies: p.policies,
                        orders: p.orders,
                        managed_types,
                        digest,
                        phase: Phase::ScheduledForApplication,
                        status: Some(StatusVerdict::InProgress),
                        last_applied_at: None,
                    })?;
                }
                Some(mut item) => {
                    item.policies = p.policies;
                    item.orders = p.orders;
                    item.managed_types = managed_types;
                    if digest_changed {
                        item.digest = digest;
                        item.phase = Phase::ScheduledForApplication;
                        item.status = Some(StatusVerdict::InProgress);
                    }
                    inventory.upsert(item)?;
                }
            }
        }

        // (d) Tombstone whatever the desired set no longer names
        let stale_keys: Vec<ObjectKey> = inventory
            .items()
            .iter()
            .filter(|i| !desired_keys.contains(&i.key) && !matches!(i.phase, Phase::ScheduledForDeletion | Phase::Deleting))
            .map(|i| i.key.clone())
            .collect();
        for key in stale_keys {
            if let Some(stored) = inventory.get_mut(&key)? {
                stored.digest = String::new();
                stored.phase = Phase::ScheduledForDeletion;
                stored.status = Some(StatusVerdict::Terminating);
            }
        }

        // (e) Persist before any cluster write whenever new items were merged in
        if added_new_item {
            self.release_store
                .save(&component_name, &inventory)
                .await
                .map_err(ReconcileError::Transient)?;
            return Ok(ApplyOutcome { objects: outcomes, purged: Vec::new(), done: false });
        }

        // (f) Pre-create namespaces referenced by a desired object but not themselves desired
        self.ensure_missing_namespaces(&planned).await?;

        // (g) Drain completions
        if self.drain_completions(&mut inventory).await? {
            self.release_store
                .save(&component_name, &inventory)
                .await
                .map_err(ReconcileError::Transient)?;
            return Ok(ApplyOutcome { objects: outcomes, purged: Vec::new(), done: false });
        }

        // (h) Apply waves
        let runs = group_by_apply_order(&planned);
        let run_count = runs.len();
        let patterns: Vec<GvkPattern> = planned.iter().flat_map(|p| declared_managed_types(&p.object)).collect();

        for (idx, run) in runs.iter().enumerate() {
            let (managed, rest): (Vec<&PlannedObject>, Vec<&PlannedObject>) =
                run.iter().copied().partition(|p| patterns.iter().any(|pat| pat.matches(&p.key)));
            let (late, regular): (Vec<&PlannedObject>, Vec<&PlannedObject>) =
                rest.into_iter().partition(|p| key::is_api_service(&p.key));

            let mut unready = 0usize;
            for p in regular.iter().copied() {
                if !self.apply_wave_object(&mut inventory, &owner, &component_name, p, &mut outcomes).await? {
                    unready += 1;
                }
            }

            if all_settled(&inventory, &regular)? {
                for p in late.iter().copied() {
                    if !self.apply_wave_object(&mut inventory, &owner, &component_name, p, &mut outcomes).await? {
                        unready += 1;
                    }
                }
                if all_settled(&inventory, &late)? {
                    for p in managed.iter().copied() {
                        if !self.apply_wave_object(&mut inventory, &owner, &component_name, p, &mut outcomes).await? {
                            unready += 1;
                        }
                    }
                } else {
                    unready += managed.len();
                }
            } else {
                unready += late.len() + managed.len();
            }

            if unready != 0 {
                self.release_store
                    .save(&component_name, &inventory)
                    .await
                    .map_err(ReconcileError::Transient)?;
                return Ok(ApplyOutcome { objects: outcomes, purged: Vec::new(), done: false });
            }

            let ceiling = if idx + 1 == run_count {
                MAX_ORDER
            } else {
                run.first().map(|p| p.orders.apply_order).unwrap_or(MAX_ORDER)
            };
            if schedule_completions(&mut inventory, ceiling)? {
                self.release_store
                    .save(&component_name, &inventory)
                    .await
                    .map_err(ReconcileError::Transient)?;
                return Ok(ApplyOutcome { objects: outcomes, purged: Vec::new(), done: false });
            }
        }

        // (i) Delete waves, restricted to items already tombstoned by (d) or a prior completion
        let before_tombstoned: Vec<ObjectKey> = inventory
            .items()
            .iter()
            .filter(|i| matches!(i.phase, Phase::ScheduledForDeletion | Phase::Deleting))
            .map(|i| i.key.clone())
            .collect();

        let drained = self
            .run_delete_wave(
                &mut inventory,
                &owner,
                |item| matches!(item.phase, Phase::ScheduledForDeletion | Phase::Deleting),
                |policy| policy.is_orphan_on_apply(),
            )
            .await?;

        let after: HashSet<ObjectKey> = inventory.items().iter().map(|i| i.key.clone()).collect();
        let purged: Vec<ObjectKey> = before_tombstoned.into_iter().filter(|k| !after.contains(k)).collect();

        self.release_store
            .save(&component_name, &inventory)
            .await
            .map_err(ReconcileError::Transient)?;

        info!(applied = outcomes.len(), purged = purged.len(), done = drained, "apply complete");
        Ok(ApplyOutcome { objects: outcomes, purged, done: drained })
    }

    /// Processes one desired object within a sub-wave: reads the live object, stamps
    /// ownership/digest metadata onto the desired copy, creates/updates as needed, and
    /// otherwise consults the status analyzer. Returns whether this object counts as
    /// settled (Ready, or already converged before this call touched anything).
    async fn apply_wave_object(
        &self,
        inventory: &mut Inventory,
        owner: &str,
        component_name: &str,
        planned: &PlannedObject,
        outcomes: &mut Vec<ObjectOutcome>,
    ) -> Result<bool, ReconcileError> {
        if inventory.get(&planned.key)?.map(|i| i.phase.is_settled()).unwrap_or(false) {
            return Ok(true);
        }

        let live = self
            .bridge
            .read(&planned.key)
            .await
            .map_err(|e| ReconcileError::from_k8s(e, planned.key.to_string()))?;

        let digest = inventory.get(&planned.key)?.map(|i| i.digest.clone()).unwrap_or_default();
        let mut desired = planned.object.clone();
        desired.labels_mut().insert(OWNER_LABEL.to_string(), owner.to_string());
        desired
            .annotations_mut()
            .insert(OWNER_ANNOTATION.to_string(), component_name.to_string());
        desired.annotations_mut().insert(DIGEST_ANNOTATION.to_string(), digest.clone());

        match live {
            None => {
                self.bridge
                    .create(desired)
                    .await
                    .map_err(|e| ReconcileError::from_k8s(e, planned.key.to_string()))?;
                if let Some(stored) = inventory.get_mut(&planned.key)? {
                    stored.phase = Phase::Creating;
                    stored.status = Some(StatusVerdict::InProgress);
                    stored.last_applied_at = Some(Utc::now());
                }
                outcomes.push(ObjectOutcome { key: planned.key.clone(), applied: true, error: None });
                Ok(false)
            }
            Some(live_obj) => {
                let live_digest = live_obj.annotations().and_then(|a| a.get(DIGEST_ANNOTATION)).map(String::as_str);
                let stale = inventory
                    .get(&planned.key)?
                    .and_then(|i| i.last_applied_at)
                    .map(|t| Utc::now().signed_duration_since(t) > chrono::Duration::from_std(FORCE_RECHECK_WINDOW).unwrap())
                    .unwrap_or(true);
                let drifted = live_digest != Some(digest.as_str());

                if live_obj.deletion_timestamp().is_none() && (drifted || stale) {
                    self.bridge
                        .update(desired, &live_obj, planned.policies.update)
                        .await
                        .map_err(|e| ReconcileError::from_k8s(e, planned.key.to_string()))?;
                    if let Some(stored) = inventory.get_mut(&planned.key)? {
                        stored.phase = Phase::Updating;
                        stored.status = Some(StatusVerdict::InProgress);
                        stored.last_applied_at = Some(Utc::now());
                    }
                    outcomes.push(ObjectOutcome { key: planned.key.clone(), applied: true, error: None });
                    Ok(false)
                } else {
                    let verdict = self.status_analyzer.analyze(&live_obj).await;
                    let ready = verdict == StatusVerdict::Current && live_obj.deletion_timestamp().is_none();
                    if let Some(stored) = inventory.get_mut(&planned.key)? {
                        stored.status = Some(verdict);
                        if ready {
                            stored.phase = Phase::Ready;
                        }
                    }
                    outcomes.push(ObjectOutcome { key: planned.key.clone(), applied: false, error: None });
                    Ok(ready)
                }
            }
        }
    }

    async fn ensure_missing_namespaces(&self, planned: &[PlannedObject]) -> Result<(), ReconcileError> {
        if self.config.missing_namespace_policy != MissingNamespacePolicy::Create {
            return Ok(());
        }
        let desired_namespaces: HashSet<&str> = planned
            .iter()
            .filter(|p| key::is_namespace(&p.key))
            .map(|p| p.key.name.as_str())
            .collect();
        let referenced: HashSet<&str> = planned
            .iter()
            .filter(|p| !p.key.namespace.is_empty())
            .map(|p| p.key.namespace.as_str())
            .collect();

        for ns in referenced {
            if desired_namespaces.contains(ns) {
                continue;
            }
            let ar = ApiResource {
                group: String::new(),
                version: "v1".to_string(),
                api_version: "v1".to_string(),
                kind: "Namespace".to_string(),
                plural: "namespaces".to_string(),
            };
            let mut dyn_obj = DynamicObject::new(ns, &ar);
            dyn_obj.types = Some(TypeMeta { api_version: "v1".to_string(), kind: "Namespace".to_string() });
            match self.bridge.create(Object::from_dynamic(dyn_obj)).await {
                Ok(_) => {}
                Err(K8sError::Kube(kube::Error::Api(e))) if e.code == 409 => {}
                Err(e) => return Err(ReconcileError::from_k8s(e, format!("Namespace/{ns}"))),
            }
        }
        Ok(())
    }

    /// Advances every item already in phase `ScheduledForCompletion`/`Completing`.
    /// Returns `true` while any such item is still outstanding afterward.
    async fn drain_completions(&self, inventory: &mut Inventory) -> Result<bool, ReconcileError> {
        let keys: Vec<ObjectKey> = inventory
            .items()
            .iter()
            .filter(|i| matches!(i.phase, Phase::ScheduledForCompletion | Phase::Completing))
            .map(|i| i.key.clone())
            .collect();

        let mut outstanding = false;
        for key in keys {
            let phase = inventory.get(&key)?.map(|i| i.phase);
            match phase {
                Some(Phase::ScheduledForCompletion) => {
                    let live = self.bridge.read(&key).await.map_err(|e| ReconcileError::from_k8s(e, key.to_string()))?;
                    match live {
                        Some(live_obj) => {
                            self.bridge
                                .delete(&key, &live_obj)
                                .await
                                .map_err(|e| ReconcileError::from_k8s(e, key.to_string()))?;
                            if let Some(stored) = inventory.get_mut(&key)? {
                                stored.phase = Phase::Completing;
                                stored.status = Some(StatusVerdict::Terminating);
                            }
                            outstanding = true;
                        }
                        None => {
                            if let Some(stored) = inventory.get_mut(&key)? {
                                stored.phase = Phase::Completed;
                            }
                        }
                    }
                }
                Some(Phase::Completing) => {
                    let live = self.bridge.read(&key).await.map_err(|e| ReconcileError::from_k8s(e, key.to_string()))?;
                    if live.is_none() {
                        if let Some(stored) = inventory.get_mut(&key)? {
                            stored.phase = Phase::Completed;
                        }
                    } else {
                        outstanding = true;
                    }
                }
                _ => {}
            }
        }
        Ok(outstanding)
    }
}

/// Schedules every inventory item whose `purgeOrder` has come due now that the apply-wave
/// run up to `ceiling` has fully converged. Returns `true` if anything was newly
/// scheduled, the signal to persist and return early rather than walk further runs.
fn schedule_completions(inventory: &mut Inventory, ceiling: i32) -> Result<bool, ReconcileError> {
    let candidates: Vec<ObjectKey> = inventory
        .items()
        .iter()
        .filter(|i| {
            i.orders.purge_order <= ceiling
                && !matches!(
                    i.phase,
                    Phase::ScheduledForCompletion | Phase::Completing | Phase::Completed | Phase::ScheduledForDeletion | Phase::Deleting
                )
        })
        .map(|i| i.key.clone())
        .collect();

    let mut scheduled = false;
    for key in candidates {
        if let Some(stored) = inventory.get_mut(&key)? {
            stored.phase = Phase::ScheduledForCompletion;
            scheduled = true;
        }
    }
    Ok(scheduled)
}
