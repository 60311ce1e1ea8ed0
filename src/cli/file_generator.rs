//! A minimal on-disk [`Generator`]: reads every YAML manifest in a directory and returns
//! them as the desired object set. Manifest generation proper is out of scope — this
//! exists only so the CLI binary has a concrete collaborator to drive against.

use crate::generator::{Generator, GeneratorContext, GeneratorError};
use crate::object::Object;
use async_trait::async_trait;
use kube::core::DynamicObject;
use serde::Deserialize;
use std::path::PathBuf;

pub struct FileGenerator {
    pub manifest_dir: PathBuf,
}

#[async_trait]
impl Generator for FileGenerator {
    async fn generate(&self, _ctx: &GeneratorContext) -> Result<Vec<Object>, GeneratorError> {
        let mut objects = Vec::new();
        let entries = std::fs::read_dir(&self.manifest_dir)
            .map_err(|e| GeneratorError(format!("reading {}: {e}", self.manifest_dir.display())))?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")))
            .collect();
        paths.sort();

        for path in paths {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| GeneratorError(format!("reading {}: {e}", path.display())))?;
            for document in serde_yaml::Deserializer::from_str(&contents) {
                let value = serde_yaml::Value::deserialize(document)
                    .map_err(|e| GeneratorError(format!("{}: {e}", path.display())))?;
                if value.is_null() {
                    continue;
                }
                let dynamic_object: DynamicObject = serde_yaml::from_value(value)
                    .map_err(|e| GeneratorError(format!("{}: {e}", path.display())))?;
                objects.push(Object::from_dynamic(dynamic_object));
            }
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_every_yaml_document_in_directory_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: one\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: two\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("ignore.txt"), "not yaml").unwrap();

        let generator = FileGenerator {
            manifest_dir: dir.path().to_path_buf(),
        };
        let ctx = GeneratorContext {
            component_name: "demo".to_string(),
            component_revision: "1".to_string(),
            namespace: None,
        };
        let objects = generator.generate(&ctx).await.unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].name(), Some("one"));
        assert_eq!(objects[1].name(), Some("two"));
    }
}
