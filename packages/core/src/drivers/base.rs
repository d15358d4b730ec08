//! Shared driver defaults
//!
//! Concrete drivers embed a [`BaseDriver`] and forward the SSH/IP accessors
//! they don't override to it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::DriverError;

pub const DEFAULT_SSH_USER: &str = "root";
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Fields and accessors common to every backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseDriver {
    pub machine_name: String,
    pub store_path: PathBuf,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub ssh_user: String,
    #[serde(default)]
    pub ssh_port: u16,
    #[serde(default)]
    pub ssh_key_path: String,
}

impl BaseDriver {
    pub fn new(machine_name: &str, store_path: &Path) -> Self {
        Self {
            machine_name: machine_name.to_string(),
            store_path: store_path.to_path_buf(),
            ip_address: String::new(),
            ssh_user: DEFAULT_SSH_USER.to_string(),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_key_path: String::new(),
        }
    }

    pub fn get_ip(&self) -> Result<String, DriverError> {
        if self.ip_address.is_empty() {
            return Err(DriverError::IpNotSet);
        }
        Ok(self.ip_address.clone())
    }

    pub fn get_ssh_port(&self) -> u16 {
        if self.ssh_port == 0 {
            DEFAULT_SSH_PORT
        } else {
            self.ssh_port
        }
    }

    pub fn get_ssh_username(&self) -> String {
        if self.ssh_user.is_empty() {
            DEFAULT_SSH_USER.to_string()
        } else {
            self.ssh_user.clone()
        }
    }

    /// Explicit key path, or `id_rsa` in the machine directory
    pub fn get_ssh_key_path(&self) -> String {
        if self.ssh_key_path.is_empty() {
            self.resolve_store_path("id_rsa").display().to_string()
        } else {
            self.ssh_key_path.clone()
        }
    }

    /// `<store>/machines/<name>`
    pub fn machine_dir(&self) -> PathBuf {
        self.store_path.join("machines").join(&self.machine_name)
    }

    pub fn resolve_store_path(&self, file: &str) -> PathBuf {
        self.machine_dir().join(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let base = BaseDriver::new("vm1", Path::new("/store"));
        assert_eq!(base.get_ssh_username(), "root");
        assert_eq!(base.get_ssh_port(), 22);
        assert_eq!(base.get_ssh_key_path(), "/store/machines/vm1/id_rsa");
    }

    #[test]
    fn test_get_ip_unset() {
        let base = BaseDriver::new("vm1", Path::new("/store"));
        let err = base.get_ip().unwrap_err();
        assert_eq!(err.to_string(), "IP address is not set");
    }

    #[test]
    fn test_zero_values_fall_back_after_decode() {
        let base: BaseDriver =
            serde_json::from_str(r#"{"machine_name":"vm1","store_path":"/s"}"#).unwrap();
        assert_eq!(base.get_ssh_port(), 22);
        assert_eq!(base.get_ssh_username(), "root");
    }
}
