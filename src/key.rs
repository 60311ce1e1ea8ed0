//! Canonical object identity and the apply/delete kind-priority tables.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The addressable identity of a cluster resource. Two keys are equal iff all five
/// components match; keys are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Empty for cluster-scoped objects.
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} {}/{}", self.group, self.kind, self.namespace, self.name)
    }
}

impl ObjectKey {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Anything that carries a GVK. Implemented by [`ObjectKey`] and by [`crate::object::Object`]
/// so `isNamespace`/`isCrd`/`isApiService` operate polymorphically.
pub trait HasGvk {
    fn group(&self) -> &str;
    fn kind(&self) -> &str;
}

impl HasGvk for ObjectKey {
    fn group(&self) -> &str {
        &self.group
    }
    fn kind(&self) -> &str {
        &self.kind
    }
}

pub fn is_namespace(o: &impl HasGvk) -> bool {
    o.group().is_empty() && o.kind() == "Namespace"
}

pub fn is_crd(o: &impl HasGvk) -> bool {
    o.group() == "apiextensions.k8s.io" && o.kind() == "CustomResourceDefinition"
}

pub fn is_api_service(o: &impl HasGvk) -> bool {
    o.group() == "apiregistration.k8s.io" && o.kind() == "APIService"
}

const WEBHOOK_KINDS: [&str; 2] = [
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
];
const CLUSTER_PREREQUISITE_KINDS: [&str; 4] =
    ["PriorityClass", "StorageClass", "IngressClass", "RuntimeClass"];
const NAMESPACED_PREREQUISITE_KINDS: [&str; 2] = ["ConfigMap", "Secret"];
const RBAC_KINDS: [&str; 4] = ["ClusterRole", "ClusterRoleBinding", "Role", "RoleBinding"];

/// Built-in apply-priority table. Lower sorts first.
pub fn apply_priority(o: &impl HasGvk) -> i8 {
    if is_namespace(o) {
        return -4;
    }
    if WEBHOOK_KINDS.contains(&o.kind()) {
        return -3;
    }
    if is_crd(o) || CLUSTER_PREREQUISITE_KINDS.contains(&o.kind()) {
        return -2;
    }
    if NAMESPACED_PREREQUISITE_KINDS.contains(&o.kind()) || RBAC_KINDS.contains(&o.kind()) {
        return -1;
    }
    if is_api_service(o) {
        return 1;
    }
    0
}

/// Built-in delete-priority, the inverse of the apply-priority table.
pub fn delete_priority(o: &impl HasGvk) -> i8 {
    if is_crd(o) || is_api_service(o) {
        return -3;
    }
    if WEBHOOK_KINDS.contains(&o.kind()) {
        return -2;
    }
    if o.kind() == "Service" || NAMESPACED_PREREQUISITE_KINDS.contains(&o.kind()) {
        return -1;
    }
    if is_namespace(o) {
        return 1;
    }
    if CLUSTER_PREREQUISITE_KINDS.contains(&o.kind()) {
        return 2;
    }
    0
}

/// Stable sort by `(user_order, built_in_priority)`, shared by apply and delete
/// ordering. `priority_of` is [`apply_priority`] or [`delete_priority`].
pub fn stable_sort_by_order_then_priority<T>(
    items: &mut [T],
    order_of: impl Fn(&T) -> i32,
    priority_of: impl Fn(&T) -> i8,
) {
    items.sort_by(|a, b| {
        let order_cmp = order_of(a).cmp(&order_of(b));
        if order_cmp != Ordering::Equal {
            return order_cmp;
        }
        priority_of(a).cmp(&priority_of(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        let ns = ObjectKey::new("", "v1", "Namespace", "", "default");
        assert!(is_namespace(&ns));
        assert!(!is_crd(&ns));

        let crd = ObjectKey::new("apiextensions.k8s.io", "v1", "CustomResourceDefinition", "", "foos.example.com");
        assert!(is_crd(&crd));

        let svc = ObjectKey::new("apiregistration.k8s.io", "v1", "APIService", "", "v1.example.com");
        assert!(is_api_service(&svc));
    }

    #[test]
    fn apply_priority_table_orders_namespace_before_everything() {
        let ns = ObjectKey::new("", "v1", "Namespace", "", "x");
        let cm = ObjectKey::new("", "v1", "ConfigMap", "x", "c");
        let deploy = ObjectKey::new("apps", "v1", "Deployment", "x", "d");
        let svc = ObjectKey::new("apiregistration.k8s.io", "v1", "APIService", "", "v1.x");
        assert!(apply_priority(&ns) < apply_priority(&cm));
        assert!(apply_priority(&cm) < apply_priority(&deploy));
        assert!(apply_priority(&deploy) < apply_priority(&svc));
    }

    #[test]
    fn delete_priority_inverts_apply_for_crd_and_namespace() {
        let crd = ObjectKey::new("apiextensions.k8s.io", "v1", "CustomResourceDefinition", "", "foos.example.com");
        let ns = ObjectKey::new("", "v1", "Namespace", "", "x");
        assert!(delete_priority(&crd) < delete_priority(&ns));
    }

    #[test]
    fn stable_sort_preserves_tie_order() {
        let mut items = vec![("b", 0, 0i8), ("a", 0, 0i8), ("c", 0, 0i8)];
        stable_sort_by_order_then_priority(&mut items, |i| i.1, |i| i.2);
        assert_eq!(items.iter().map(|i| i.0).collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[rstest::rstest]
    #[case("", "Namespace", -4)]
    #[case("", "ValidatingWebhookConfiguration", -3)]
    #[case("apiextensions.k8s.io", "CustomResourceDefinition", -2)]
    #[case("", "ConfigMap", -1)]
    #[case("apps", "Deployment", 0)]
    #[case("apiregistration.k8s.io", "APIService", 1)]
    fn apply_priority_matches_the_built_in_table(
        #[case] group: &str,
        #[case] kind: &str,
        #[case] expected: i8,
    ) {
        let key = ObjectKey::new(group, "v1", kind, "x", "n");
        assert_eq!(apply_priority(&key), expected);
    }

    #[rstest::rstest]
    #[case("apiextensions.k8s.io", "CustomResourceDefinition", -3)]
    #[case("", "ValidatingWebhookConfiguration", -2)]
    #[case("", "Service", -1)]
    #[case("apps", "Deployment", 0)]
    #[case("", "Namespace", 1)]
    #[case("", "StorageClass", 2)]
    fn delete_priority_matches_the_built_in_table(
        #[case] group: &str,
        #[case] kind: &str,
        #[case] expected: i8,
    ) {
        let key = ObjectKey::new(group, "v1", kind, "x", "n");
        assert_eq!(delete_priority(&key), expected);
    }
}
