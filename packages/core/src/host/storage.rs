//! Host record storage
//!
//! Each host lives in `<store>/machines/<name>/config.json`, next to its
//! certificates and disk images.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::error::HostError;
use super::migrate::migrate_record;
use super::{Host, HostLock};

pub const RECORD_FILENAME: &str = "config.json";

/// Load/save contract for host records
pub trait HostStore: Send + Sync {
    fn exists(&self, name: &str) -> Result<bool, HostError>;

    /// Load one host, its driver still undecoded
    fn load(&self, name: &str) -> Result<Host, HostError>;

    fn save(&self, host: &Host) -> Result<(), HostError>;

    fn remove(&self, name: &str) -> Result<(), HostError>;

    /// Every host in the store; records that fail to load are reported by
    /// name instead of aborting the listing
    fn list(&self) -> Result<(Vec<Host>, BTreeMap<String, HostError>), HostError>;
}

/// [`HostStore`] over the local machine directory tree
#[derive(Debug, Clone)]
pub struct Filestore {
    path: PathBuf,
}

impl Filestore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store root
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn machines_dir(&self) -> PathBuf {
        self.path.join("machines")
    }

    pub fn machine_dir(&self, name: &str) -> PathBuf {
        self.machines_dir().join(name)
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.path.join("certs")
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.machine_dir(name).join(RECORD_FILENAME)
    }

    /// Take the per-host lock for a mutating operation
    pub fn lock(&self, name: &str) -> Result<HostLock, HostError> {
        HostLock::acquire(name, &self.machine_dir(name))
    }

    fn read_record(&self, name: &str) -> Result<serde_json::Value, HostError> {
        let path = self.record_path(name);
        let failed = |message: String| HostError::LoadFailed {
            name: name.to_string(),
            message,
        };

        let mut file = File::open(&path)
            .map_err(|e| failed(format!("Failed to open {}: {}", path.display(), e)))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| failed(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| failed(format!("Invalid JSON in {}: {}", path.display(), e)))
    }
}

impl HostStore for Filestore {
    fn exists(&self, name: &str) -> Result<bool, HostError> {
        Ok(self.record_path(name).is_file())
    }

    fn load(&self, name: &str) -> Result<Host, HostError> {
        if !self.exists(name)? {
            return Err(HostError::NotFound(name.to_string()));
        }

        let data = self.read_record(name)?;
        let (record, migrated) = migrate_record(name, data)?;
        let host = Host::from_record(record);

        if migrated {
            tracing::info!("Host {} migrated to config v{}, saving", name, host.config_version);
            self.save(&host)?;
        }
        tracing::debug!("Loaded host {} from {}", name, self.record_path(name).display());
        Ok(host)
    }

    /// Write the record, keeping the previous one as `config.json.bak`
    fn save(&self, host: &Host) -> Result<(), HostError> {
        let failed = |message: String| HostError::SaveFailed {
            name: host.name.clone(),
            message,
        };
        let record = host.to_record()?;
        let path = self.record_path(&host.name);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| failed(format!("Failed to create directory: {e}")))?;
        }

        if path.exists() {
            let backup_path = path.with_extension("json.bak");
            fs::copy(&path, &backup_path)
                .map_err(|e| failed(format!("Failed to create backup: {e}")))?;
            tracing::debug!("Created host backup: {}", backup_path.display());
        }

        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| failed(format!("Failed to serialize: {e}")))?;

        let mut file = File::create(&path)
            .map_err(|e| failed(format!("Failed to create {}: {}", path.display(), e)))?;
        file.write_all(json.as_bytes())
            .map_err(|e| failed(format!("Failed to write {}: {}", path.display(), e)))?;

        tracing::debug!("Saved host {} to {}", host.name, path.display());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), HostError> {
        let dir = self.machine_dir(name);
        if !dir.exists() {
            return Err(HostError::NotFound(name.to_string()));
        }
        fs::remove_dir_all(&dir).map_err(|e| HostError::SaveFailed {
            name: name.to_string(),
            message: format!("Failed to remove {}: {}", dir.display(), e),
        })
    }

    fn list(&self) -> Result<(Vec<Host>, BTreeMap<String, HostError>), HostError> {
        let mut hosts = Vec::new();
        let mut errors = BTreeMap::new();

        let dir = self.machines_dir();
        if !dir.exists() {
            return Ok((hosts, errors));
        }

        let entries = fs::read_dir(&dir).map_err(|e| HostError::LoadFailed {
            name: String::new(),
            message: format!("Failed to read {}: {}", dir.display(), e),
        })?;

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();

        for name in names {
            match self.load(&name) {
                Ok(host) => hosts.push(host),
                Err(e) => {
                    tracing::debug!("Host {} failed to load: {}", name, e);
                    errors.insert(name, e);
                }
            }
        }
        Ok((hosts, errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::none::NoneDriver;
    use crate::host::HostOptions;
    use crate::version::CONFIG_VERSION;
    use serde_json::json;
    use tempfile::TempDir;

    fn none_host(store: &Filestore, name: &str, url: &str) -> Host {
        let mut driver = NoneDriver::new(name, store.path());
        driver.url = url.to_string();
        Host::new(name, Box::new(driver), HostOptions::default())
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let store = Filestore::new(temp.path());
        store.save(&none_host(&store, "vm1", "tcp://10.0.0.5:2376")).unwrap();

        assert!(store.exists("vm1").unwrap());
        let host = store.load("vm1").unwrap();
        assert_eq!(host.name, "vm1");
        assert_eq!(host.driver_name, "none");
        assert_eq!(host.config_version, CONFIG_VERSION);
        assert_eq!(host.raw_driver["url"], json!("tcp://10.0.0.5:2376"));
    }

    #[test]
    fn test_save_keeps_backup() {
        let temp = TempDir::new().unwrap();
        let store = Filestore::new(temp.path());
        store.save(&none_host(&store, "vm1", "tcp://a:1")).unwrap();
        store.save(&none_host(&store, "vm1", "tcp://b:2")).unwrap();

        let backup = store.machine_dir("vm1").join("config.json.bak");
        let previous: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(backup).unwrap()).unwrap();
        assert_eq!(previous["driver"]["url"], json!("tcp://a:1"));
    }

    #[test]
    fn test_load_missing_host() {
        let temp = TempDir::new().unwrap();
        let store = Filestore::new(temp.path());
        assert!(matches!(store.load("ghost"), Err(HostError::NotFound(_))));
        assert!(matches!(store.remove("ghost"), Err(HostError::NotFound(_))));
    }

    #[test]
    fn test_list_reports_broken_records() {
        let temp = TempDir::new().unwrap();
        let store = Filestore::new(temp.path());
        store.save(&none_host(&store, "good", "tcp://a:1")).unwrap();

        let broken = store.machine_dir("broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(RECORD_FILENAME), "{ not json").unwrap();

        let future = store.machine_dir("future");
        fs::create_dir_all(&future).unwrap();
        fs::write(
            future.join(RECORD_FILENAME),
            json!({"config_version": CONFIG_VERSION + 1, "driver_name": "none"}).to_string(),
        )
        .unwrap();

        let (hosts, errors) = store.list().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "good");
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors["broken"], HostError::LoadFailed { .. }));
        assert!(matches!(errors["future"], HostError::ConfigFromFuture { .. }));
    }

    #[test]
    fn test_migrated_record_is_resaved() {
        let temp = TempDir::new().unwrap();
        let store = Filestore::new(temp.path());
        let dir = store.machine_dir("old");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(RECORD_FILENAME),
            json!({
                "name": "old",
                "driver_name": "none",
                "driver": {"machine_name": "old", "store_path": "/s", "url": "tcp://a:1"},
                "engine_options": {"labels": {"env": "prod"}}
            })
            .to_string(),
        )
        .unwrap();

        let host = store.load("old").unwrap();
        assert_eq!(host.host_options.engine.labels, vec!["env=prod"]);

        let on_disk: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(RECORD_FILENAME)).unwrap()).unwrap();
        assert_eq!(on_disk["config_version"], json!(CONFIG_VERSION));
        assert!(dir.join("config.json.bak").exists());
    }

    #[test]
    fn test_remove_deletes_machine_dir() {
        let temp = TempDir::new().unwrap();
        let store = Filestore::new(temp.path());
        store.save(&none_host(&store, "vm1", "tcp://a:1")).unwrap();
        store.remove("vm1").unwrap();
        assert!(!store.exists("vm1").unwrap());
        assert!(!store.machine_dir("vm1").exists());
    }

    #[test]
    fn test_list_empty_store() {
        let temp = TempDir::new().unwrap();
        let (hosts, errors) = Filestore::new(temp.path().join("nothing")).list().unwrap();
        assert!(hosts.is_empty());
        assert!(errors.is_empty());
    }
}
