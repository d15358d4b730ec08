//! TLS material locations for one host

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Local and remote paths of the CA, client and server credentials
///
/// CA and client material is shared across hosts and lives in the certs
/// directory; server material is per host and lives in the host's record
/// directory (`store_path`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOptions {
    pub cert_dir: PathBuf,
    pub ca_cert_path: PathBuf,
    pub ca_private_key_path: PathBuf,
    #[serde(default)]
    pub ca_cert_remote_path: String,
    pub server_cert_path: PathBuf,
    pub server_key_path: PathBuf,
    pub client_key_path: PathBuf,
    pub client_cert_path: PathBuf,
    #[serde(default)]
    pub server_cert_remote_path: String,
    #[serde(default)]
    pub server_key_remote_path: String,
    #[serde(default)]
    pub server_cert_sans: Vec<String>,
    pub store_path: PathBuf,
}

impl AuthOptions {
    /// Standard layout for a host whose record directory is `machine_dir`
    pub fn for_host(cert_dir: &Path, machine_dir: &Path) -> Self {
        Self {
            cert_dir: cert_dir.to_path_buf(),
            ca_cert_path: cert_dir.join("ca.pem"),
            ca_private_key_path: cert_dir.join("ca-key.pem"),
            ca_cert_remote_path: String::new(),
            server_cert_path: machine_dir.join("server.pem"),
            server_key_path: machine_dir.join("server-key.pem"),
            client_key_path: cert_dir.join("key.pem"),
            client_cert_path: cert_dir.join("cert.pem"),
            server_cert_remote_path: String::new(),
            server_key_remote_path: String::new(),
            server_cert_sans: Vec::new(),
            store_path: machine_dir.to_path_buf(),
        }
    }

    pub fn with_sans(mut self, sans: Vec<String>) -> Self {
        self.server_cert_sans = sans;
        self
    }

    /// Record the remote credential paths under the engine options directory
    pub fn with_remote_dir(mut self, engine_dir: &str) -> Self {
        let dir = engine_dir.trim_end_matches('/');
        self.ca_cert_remote_path = format!("{dir}/ca.pem");
        self.server_cert_remote_path = format!("{dir}/server.pem");
        self.server_key_remote_path = format!("{dir}/server-key.pem");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_host_layout() {
        let auth = AuthOptions::for_host(Path::new("/s/certs"), Path::new("/s/machines/vm1"));
        assert_eq!(auth.ca_cert_path, Path::new("/s/certs/ca.pem"));
        assert_eq!(auth.client_key_path, Path::new("/s/certs/key.pem"));
        assert_eq!(auth.server_cert_path, Path::new("/s/machines/vm1/server.pem"));
        assert_eq!(auth.store_path, Path::new("/s/machines/vm1"));
    }

    #[test]
    fn test_remote_paths() {
        let auth = AuthOptions::default().with_remote_dir("/etc/podman/");
        assert_eq!(auth.ca_cert_remote_path, "/etc/podman/ca.pem");
        assert_eq!(auth.server_cert_remote_path, "/etc/podman/server.pem");
        assert_eq!(auth.server_key_remote_path, "/etc/podman/server-key.pem");
    }
}
