//! CLI-side configuration: a YAML file merged with clap flags (flags win). The library
//! itself takes no file-based configuration — only the CLI binary owns this layer.

use crate::config::ReconcilerConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub reconciler_name: Option<String>,
    pub field_owner: Option<String>,
    pub default_namespace: Option<String>,
    pub force_reapply_window_secs: Option<u64>,
    pub manifest_dir: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn into_reconciler_config(self, reconciler_name_override: Option<String>) -> ReconcilerConfig {
        let reconciler_name = reconciler_name_override
            .or(self.reconciler_name)
            .unwrap_or_else(|| "component-reconciler".to_string());
        let mut cfg = ReconcilerConfig::new(reconciler_name);
        if let Some(owner) = self.field_owner {
            cfg.field_owner = owner;
        }
        if let Some(ns) = self.default_namespace {
            cfg.default_namespace = ns;
        }
        if let Some(secs) = self.force_reapply_window_secs {
            cfg.force_reapply_window = Duration::from_secs(secs);
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = FileConfig::load(Path::new("/nonexistent/path.yaml")).unwrap();
        assert!(cfg.reconciler_name.is_none());
    }

    #[test]
    fn override_wins_over_file_value() {
        let file = FileConfig {
            reconciler_name: Some("from-file".to_string()),
            ..Default::default()
        };
        let cfg = file.into_reconciler_config(Some("from-flag".to_string()));
        assert_eq!(cfg.reconciler_name, "from-flag");
    }
}
