//! The duck-typed manifest abstraction: a single
//! `Object` wrapping [`kube::core::DynamicObject`] exposes the capability set the
//! engine needs (GVK, namespace, name, annotations, labels, finalizers, managed-fields,
//! resource-version, deletion-timestamp, UID) regardless of whether the manifest
//! originated as opaque YAML or a typed struct the generator chose to emit.

use crate::error::K8sError;
use crate::key::HasGvk;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ManagedFieldsEntry, Time};
use kube::core::{DynamicObject, GroupVersionKind, ObjectMeta, TypeMeta};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Object(DynamicObject);

impl Object {
    pub fn from_dynamic(inner: DynamicObject) -> Self {
        Self(inner)
    }

    pub fn into_dynamic(self) -> DynamicObject {
        self.0
    }

    pub fn as_dynamic(&self) -> &DynamicObject {
        &self.0
    }

    pub fn as_dynamic_mut(&mut self) -> &mut DynamicObject {
        &mut self.0
    }

    pub fn type_meta(&self) -> Option<&TypeMeta> {
        self.0.types.as_ref()
    }

    pub fn set_type_meta(&mut self, tm: TypeMeta) {
        self.0.types = Some(tm);
    }

    pub fn gvk(&self) -> Result<GroupVersionKind, K8sError> {
        let tm = self.0.types.as_ref().ok_or(K8sError::MissingGvk)?;
        let (group, version) = match tm.api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), tm.api_version.clone()),
        };
        Ok(GroupVersionKind {
            group,
            version,
            kind: tm.kind.clone(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.0.metadata.name.as_deref()
    }

    pub fn generate_name(&self) -> Option<&str> {
        self.0.metadata.generate_name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.0.metadata.name = Some(name.into());
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0.metadata.namespace.as_deref()
    }

    pub fn set_namespace(&mut self, namespace: Option<String>) {
        self.0.metadata.namespace = namespace;
    }

    pub fn uid(&self) -> Option<&str> {
        self.0.metadata.uid.as_deref()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.0.metadata.resource_version.as_deref()
    }

    pub fn set_resource_version(&mut self, rv: Option<String>) {
        self.0.metadata.resource_version = rv;
    }

    pub fn deletion_timestamp(&self) -> Option<&Time> {
        self.0.metadata.deletion_timestamp.as_ref()
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.0.metadata.annotations.as_ref()
    }

    pub fn annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.0.metadata.annotations.get_or_insert_with(BTreeMap::new)
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.0.metadata.labels.as_ref()
    }

    pub fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.0.metadata.labels.get_or_insert_with(BTreeMap::new)
    }

    pub fn finalizers(&self) -> &[String] {
        self.0
            .metadata
            .finalizers
            .as_deref()
            .unwrap_or_default()
    }

    pub fn finalizers_mut(&mut self) -> &mut Vec<String> {
        self.0.metadata.finalizers.get_or_insert_with(Vec::new)
    }

    pub fn managed_fields(&self) -> &[ManagedFieldsEntry] {
        self.0.metadata.managed_fields.as_deref().unwrap_or_default()
    }

    pub fn set_managed_fields(&mut self, entries: Vec<ManagedFieldsEntry>) {
        self.0.metadata.managed_fields = Some(entries);
    }

    pub fn clear_managed_fields(&mut self) {
        self.0.metadata.managed_fields = None;
    }

    pub fn generation(&self) -> Option<i64> {
        self.0.metadata.generation
    }

    /// The metadata fields cleared before hashing by the Digest Calculator.
    pub fn clear_volatile_fields(&mut self) {
        self.0.metadata.resource_version = None;
        self.0.metadata.generation = None;
        self.0.metadata.managed_fields = None;
    }

    /// Stable JSON serialization used for hashing and equality: `serde_json::Value`'s
    /// default `Map` is backed by a `BTreeMap` (the `preserve_order` feature is not
    /// enabled in this crate), so object keys come out sorted at every nesting level
    /// without any bespoke canonicalization code.
    pub fn canonical_json(&self) -> Result<String, K8sError> {
        let value = serde_json::to_value(&self.0)?;
        Ok(serde_json::to_string(&value)?)
    }

    pub fn key(&self) -> Result<crate::key::ObjectKey, K8sError> {
        let gvk = self.gvk()?;
        let name = self.name().ok_or(K8sError::MissingName)?;
        Ok(crate::key::ObjectKey::new(
            gvk.group,
            gvk.version,
            gvk.kind,
            self.namespace().unwrap_or_default(),
            name,
        ))
    }

    pub fn new_object_meta(name: impl Into<String>, namespace: Option<String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace,
            ..Default::default()
        }
    }
}

impl HasGvk for Object {
    fn group(&self) -> &str {
        self.type_meta()
            .map(|tm| tm.api_version.split_once('/').map(|(g, _)| g).unwrap_or(""))
            .unwrap_or("")
    }

    fn kind(&self) -> &str {
        self.type_meta().map(|tm| tm.kind.as_str()).unwrap_or("")
    }
}
