//! Digest computation over the normalized object body, used by the engine
//! to detect drift between the last-applied revision and the desired one.

use crate::error::K8sError;
use crate::object::Object;
use crate::policy::ReconcilePolicy;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Literal digest assigned to objects under the `Once` reconcile policy: computed once,
/// never recomputed, so the engine never re-applies them regardless of content drift.
pub const ONCE_DIGEST: &str = "__once__";

pub struct DigestCalculator {
    /// How long a digest's embedded timestamp is honored before the engine forces a
    /// reapply even absent content drift (an open question resolved in DESIGN.md).
    pub force_reapply_window: Duration,
}

impl DigestCalculator {
    pub fn new(force_reapply_window: Duration) -> Self {
        Self {
            force_reapply_window,
        }
    }

    /// Computes the digest for `object` under `policy`.
    ///
    /// - `Once` always yields [`ONCE_DIGEST`].
    /// - Otherwise the object (with volatile metadata cleared) is canonically serialized
    ///   and hashed with SHA-256, hex-encoded.
    /// - Under `OnObjectOrComponentChange`, `@<component_revision>` is appended so a
    ///   component-level revision bump drifts every member object even if unchanged.
    /// - The result always carries a trailing `:<unix-seconds>` timestamp. If
    ///   `previous_digest` has the same hash-and-revision prefix and its timestamp is no
    ///   older than `force_reapply_window`, that timestamp is carried forward; otherwise
    ///   the digest is stamped with `now`, which alone is enough to make it differ from
    ///   `previous_digest` and trigger a reapply even though the object content is
    ///   unchanged — the periodic forced-reapply mechanism.
    pub fn compute(
        &self,
        object: &Object,
        policy: ReconcilePolicy,
        component_revision: Option<&str>,
        previous_digest: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, K8sError> {
        if policy == ReconcilePolicy::Once {
            return Ok(ONCE_DIGEST.to_string());
        }

        let mut clean = object.clone();
        clean.clear_volatile_fields();
        let json = clean.canonical_json()?;
        let mut base = hex::encode(Sha256::digest(json.as_bytes()));

        if policy == ReconcilePolicy::OnObjectOrComponentChange {
            if let Some(rev) = component_revision {
                base = format!("{base}@{rev}");
            }
        }

        let ts = self.resolve_timestamp(&base, previous_digest, now);
        Ok(format!("{base}:{ts}"))
    }

    fn resolve_timestamp(
        &self,
        base: &str,
        previous_digest: Option<&str>,
        now: DateTime<Utc>,
    ) -> i64 {
        let now_secs = now.timestamp();
        let Some(previous) = previous_digest else {
            return now_secs;
        };
        let Some((prev_base, prev_ts)) = previous.rsplit_once(':') else {
            return now_secs;
        };
        if prev_base != base {
            return now_secs;
        }
        let Ok(prev_ts) = prev_ts.parse::<i64>() else {
            return now_secs;
        };
        let age = now_secs.saturating_sub(prev_ts);
        if age >= 0 && age as u64 <= self.force_reapply_window.as_secs() {
            prev_ts
        } else {
            now_secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{DynamicObject, TypeMeta};

    fn configmap(data: &str) -> Object {
        let mut o = Object::from_dynamic(DynamicObject::new(
            "c",
            &kube::core::ApiResource {
                group: "".into(),
                version: "v1".into(),
                api_version: "v1".into(),
                kind: "ConfigMap".into(),
                plural: "configmaps".into(),
            },
        ));
        o.set_type_meta(TypeMeta {
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
        });
        o.annotations_mut().insert("data".into(), data.into());
        o
    }

    fn calc(window_secs: u64) -> DigestCalculator {
        DigestCalculator::new(Duration::from_secs(window_secs))
    }

    #[test]
    fn once_policy_is_always_the_literal_digest() {
        let o = configmap("a");
        let d = calc(3600)
            .compute(&o, ReconcilePolicy::Once, None, None, Utc::now())
            .unwrap();
        assert_eq!(d, ONCE_DIGEST);
    }

    #[test]
    fn identical_objects_hash_the_same() {
        let a = configmap("same");
        let b = configmap("same");
        let now = Utc::now();
        let da = calc(3600)
            .compute(&a, ReconcilePolicy::OnObjectChange, None, None, now)
            .unwrap();
        let db = calc(3600)
            .compute(&b, ReconcilePolicy::OnObjectChange, None, None, now)
            .unwrap();
        assert_eq!(da, db);
    }

    #[test]
    fn changed_content_changes_the_hash_prefix() {
        let a = configmap("a");
        let b = configmap("b");
        let now = Utc::now();
        let da = calc(3600)
            .compute(&a, ReconcilePolicy::OnObjectChange, None, None, now)
            .unwrap();
        let db = calc(3600)
            .compute(&b, ReconcilePolicy::OnObjectChange, None, None, now)
            .unwrap();
        assert_ne!(da.split(':').next(), db.split(':').next());
    }

    #[test]
    fn component_revision_is_embedded_only_under_on_object_or_component_change() {
        let o = configmap("a");
        let now = Utc::now();
        let with_rev = calc(3600)
            .compute(
                &o,
                ReconcilePolicy::OnObjectOrComponentChange,
                Some("rev-2"),
                None,
                now,
            )
            .unwrap();
        let without_rev = calc(3600)
            .compute(&o, ReconcilePolicy::OnObjectChange, None, None, now)
            .unwrap();
        assert!(with_rev.contains("@rev-2"));
        assert!(!without_rev.contains('@'));
    }

    #[test]
    fn unchanged_object_within_window_preserves_previous_timestamp() {
        let o = configmap("a");
        let t0 = Utc::now();
        let first = calc(3600)
            .compute(&o, ReconcilePolicy::OnObjectChange, None, None, t0)
            .unwrap();
        let t1 = t0 + chrono::Duration::seconds(60);
        let second = calc(3600)
            .compute(&o, ReconcilePolicy::OnObjectChange, None, Some(&first), t1)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unchanged_object_past_window_forces_a_new_timestamp() {
        let o = configmap("a");
        let t0 = Utc::now();
        let first = calc(3600)
            .compute(&o, ReconcilePolicy::OnObjectChange, None, None, t0)
            .unwrap();
        let t1 = t0 + chrono::Duration::seconds(3601);
        let second = calc(3600)
            .compute(&o, ReconcilePolicy::OnObjectChange, None, Some(&first), t1)
            .unwrap();
        assert_ne!(first, second);
    }
}
