//! Container engine options carried by a host

use serde::{Deserialize, Serialize};

/// Engine flags rendered into the guest's engine config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default)]
    pub arbitrary_flags: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub insecure_registry: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub registry_mirror: Vec<String>,
    #[serde(default)]
    pub storage_driver: String,
    /// Package the RedHat-style provisioner installs
    #[serde(default = "default_package")]
    pub install_package: String,
}

fn default_package() -> String {
    "podman".to_string()
}

impl EngineOptions {
    pub fn new() -> Self {
        Self {
            install_package: default_package(),
            ..Default::default()
        }
    }

    /// Value of a `key=value` label, if present
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.iter().find_map(|label| {
            label
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_lookup() {
        let engine = EngineOptions {
            labels: vec!["env=prod".to_string(), "team=core".to_string()],
            ..EngineOptions::new()
        };
        assert_eq!(engine.label("team"), Some("core"));
        assert_eq!(engine.label("missing"), None);
    }

    #[test]
    fn test_defaults_when_fields_missing() {
        let engine: EngineOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(engine.install_package, "podman");
        assert!(engine.labels.is_empty());
    }
}
