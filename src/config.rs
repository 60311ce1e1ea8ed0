//! Reconciler-wide configuration. These are constructor arguments for the library;
//! the CLI layers its own file/flag configuration on top (see `cli::config`).

use crate::policy::ReconcilerDefaults;
use std::time::Duration;

/// Whether Apply pre-creates namespaces referenced by dependent objects that aren't
/// themselves part of the desired set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingNamespacePolicy {
    Create,
    Ignore,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Namespaces every annotation this reconciler reads/writes (`<name>/adoption-policy`,
    /// ...) and seeds the default server-side-apply field owner.
    pub reconciler_name: String,
    pub field_owner: String,
    pub default_namespace: String,
    pub policy_defaults: ReconcilerDefaults,
    /// How long a digest's embedded timestamp is honored before a forced reapply
    /// (an open question, resolved in DESIGN.md).
    pub force_reapply_window: Duration,
    /// Foreign field-manager name prefixes the Field-Manager Merger reclaims under the
    /// `SsaOverride` update policy, e.g. `kubectl-client-side-apply` or `helm`.
    pub reclaim_prefixes: Vec<String>,
    pub missing_namespace_policy: MissingNamespacePolicy,
}

impl ReconcilerConfig {
    pub fn new(reconciler_name: impl Into<String>) -> Self {
        let reconciler_name = reconciler_name.into();
        Self {
            field_owner: reconciler_name.clone(),
            default_namespace: "default".to_string(),
            policy_defaults: ReconcilerDefaults::default(),
            force_reapply_window: Duration::from_secs(3600),
            reclaim_prefixes: vec!["kubectl".to_string(), "helm".to_string()],
            missing_namespace_policy: MissingNamespacePolicy::Create,
            reconciler_name,
        }
    }

    pub fn owner_annotation_key(&self, suffix: &str) -> String {
        format!("{}/{}", self.reconciler_name, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_owner_defaults_to_reconciler_name() {
        let cfg = ReconcilerConfig::new("acme.io");
        assert_eq!(cfg.field_owner, "acme.io");
        assert_eq!(cfg.default_namespace, "default");
    }
}
