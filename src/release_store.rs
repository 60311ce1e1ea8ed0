//! ConfigMap-backed persistence for a component's [`Inventory`], grounded on
//! `get_configmap_key`/`set_configmap_key`-style access: the whole inventory round-trips
//! through `serde_yaml` under a single well-known key.

use crate::error::K8sError;
use crate::inventory::Inventory;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::core::ObjectMeta;
use kube::Client;
use std::collections::BTreeMap;

const INVENTORY_KEY: &str = "inventory.yaml";

pub struct ReleaseStore {
    client: Client,
    namespace: String,
    field_owner: String,
}

impl ReleaseStore {
    pub fn new(client: Client, namespace: impl Into<String>, field_owner: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            field_owner: field_owner.into(),
        }
    }

    fn configmap_name(component_name: &str) -> String {
        format!("{component_name}-inventory")
    }

    pub async fn load(&self, component_name: &str) -> Result<Inventory, K8sError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        match api.get(&Self::configmap_name(component_name)).await {
            Ok(cm) => match cm.data.unwrap_or_default().get(INVENTORY_KEY) {
                Some(raw) => Ok(serde_yaml::from_str(raw)?),
                None => Ok(Inventory::new()),
            },
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(Inventory::new()),
            Err(e) => Err(K8sError::Kube(e)),
        }
    }

    pub async fn save(&self, component_name: &str, inventory: &Inventory) -> Result<(), K8sError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = Self::configmap_name(component_name);
        let mut data = BTreeMap::new();
        data.insert(INVENTORY_KEY.to_string(), serde_yaml::to_string(inventory)?);

        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/managed-by".to_string(),
                    self.field_owner.clone(),
                )])),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };

        let pp = PatchParams::apply(self.field_owner.clone()).force();
        api.patch(&name, &pp, &Patch::Apply(&cm))
            .await
            .map_err(K8sError::Kube)?;
        Ok(())
    }

    pub async fn delete(&self, component_name: &str) -> Result<(), K8sError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        match api
            .delete(&Self::configmap_name(component_name), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(K8sError::Kube(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configmap_name_is_suffixed_by_component() {
        assert_eq!(ReleaseStore::configmap_name("web"), "web-inventory");
    }
}
