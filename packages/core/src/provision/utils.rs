//! Steps shared by all provisioners

use std::fs;
use std::path::Path;
use std::time::Duration;

use super::{EngineConfig, ProvisionContext, ProvisionError};
use crate::cert::{self, CertError, CertOptions, DEFAULT_BITS};
use crate::drivers::{WaitPolicy, wait_for};
use crate::ssh::shell_quote;

const HOSTS_FILE: &str = "/etc/hosts";
const LOOPBACK_ALIAS: &str = "127.0.1.1";
const ENGINE_SOCKET: &str = "/run/podman/podman.sock";
const ENGINE_WAIT: WaitPolicy = WaitPolicy {
    attempts: 10,
    interval: Duration::from_secs(3),
};

impl ProvisionContext<'_> {
    pub fn ssh(&self, command: &str) -> Result<String, ProvisionError> {
        Ok(self.commander.run(command)?)
    }

    pub fn remote_hostname(&self) -> Result<String, ProvisionError> {
        Ok(self.ssh("hostname")?.trim().to_string())
    }

    pub fn make_engine_options_dir(&self, dir: &str) -> Result<(), ProvisionError> {
        tracing::info!("Creating engine options directory...");
        self.ssh(&format!("sudo mkdir -p {dir}"))?;
        Ok(())
    }

    /// Point the remote credential paths into `dir`
    pub fn set_remote_auth_options(&mut self, dir: &str) {
        self.auth = std::mem::take(&mut self.auth).with_remote_dir(dir);
    }

    /// Replace a remote file with `content`, passed as a literal argument
    ///
    /// `printf '%s'` keeps leading dashes in PEM data from being read as
    /// options.
    pub fn write_remote_file(&self, path: &str, content: &str) -> Result<(), ProvisionError> {
        self.ssh(&format!(
            "printf '%s' {} | sudo tee {path} > /dev/null",
            shell_quote(content)
        ))?;
        Ok(())
    }

    /// Stage every file next to its target, then move them all into place
    ///
    /// A failed transfer leaves only `.tmp` files behind; the live paths are
    /// replaced in a single remote command once all content has arrived.
    pub fn install_remote_files(&self, files: &[(&str, String)]) -> Result<(), ProvisionError> {
        for (path, content) in files {
            self.write_remote_file(&format!("{path}.tmp"), content)?;
        }
        let moves: Vec<String> = files
            .iter()
            .map(|(path, _)| format!("sudo mv -f {path}.tmp {path}"))
            .collect();
        self.ssh(&moves.join(" && "))?;
        Ok(())
    }

    /// Rewrite `/etc/hosts` with `rewrite`; `None` from it means already correct
    pub fn update_hosts_file(
        &self,
        hostname: &str,
        rewrite: fn(&str, &str) -> Option<String>,
    ) -> Result<(), ProvisionError> {
        let current = self.ssh(&format!("cat {HOSTS_FILE}"))?;
        match rewrite(&current, hostname) {
            Some(updated) => self.write_remote_file(HOSTS_FILE, &updated),
            None => {
                tracing::debug!("{} already maps {}", HOSTS_FILE, hostname);
                Ok(())
            }
        }
    }

    /// Issue a server certificate for the machine and install it remotely
    ///
    /// CA and client material is first copied into the machine's record
    /// directory. The server certificate covers the configured extra SANs,
    /// the machine's current IP and `localhost`.
    pub fn configure_auth(&self) -> Result<(), ProvisionError> {
        let auth = &self.auth;
        let machine_name = self.driver.machine_name();
        let org = format!("{}.{}", whoami::username(), machine_name);

        let ip = self.driver.get_ip()?;

        tracing::info!("Copying certs to the local machine directory...");
        fs::create_dir_all(&auth.store_path).map_err(|source| ProvisionError::CopyCert {
            path: auth.store_path.clone(),
            source,
        })?;
        copy_cert(&auth.ca_cert_path, &auth.store_path.join("ca.pem"))?;
        copy_cert(&auth.client_cert_path, &auth.store_path.join("cert.pem"))?;
        copy_cert(&auth.client_key_path, &auth.store_path.join("key.pem"))?;

        let hosts = server_cert_hosts(&auth.server_cert_sans, &ip);
        tracing::debug!(
            "generating server cert: {} ca-key={} org={} san={:?}",
            auth.server_cert_path.display(),
            auth.ca_private_key_path.display(),
            org,
            hosts
        );
        cert::generate_cert(&CertOptions {
            hosts,
            cert_file: auth.server_cert_path.clone(),
            key_file: auth.server_key_path.clone(),
            ca_file: auth.ca_cert_path.clone(),
            ca_key_file: auth.ca_private_key_path.clone(),
            org,
            bits: DEFAULT_BITS,
        })?;

        tracing::info!("Copying certs to the remote machine...");
        self.install_remote_files(&[
            (auth.ca_cert_remote_path.as_str(), read_pem(&auth.ca_cert_path)?),
            (
                auth.server_cert_remote_path.as_str(),
                read_pem(&auth.server_cert_path)?,
            ),
            (
                auth.server_key_remote_path.as_str(),
                read_pem(&auth.server_key_path)?,
            ),
        ])
    }

    pub fn install_engine_config(&self, config: &EngineConfig) -> Result<(), ProvisionError> {
        tracing::info!("Writing engine options to {}", config.remote_path);
        self.write_remote_file(&config.remote_path, &config.content)
    }

    /// Poll for the engine socket after a service restart
    pub fn wait_for_engine(&self) -> Result<(), ProvisionError> {
        let check = format!("sudo test -S {ENGINE_SOCKET}");
        wait_for(|| self.commander.run(&check).is_ok(), ENGINE_WAIT).map_err(|e| {
            ProvisionError::EngineUnavailable(format!("{ENGINE_SOCKET} not present: {e}"))
        })
    }
}

fn copy_cert(src: &Path, dst: &Path) -> Result<(), ProvisionError> {
    if src == dst {
        return Ok(());
    }
    fs::copy(src, dst).map_err(|source| ProvisionError::CopyCert {
        path: src.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn read_pem(path: &Path) -> Result<String, ProvisionError> {
    fs::read_to_string(path).map_err(|source| {
        CertError::Io {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

/// SAN list for a server certificate: extra SANs, then IP and `localhost`
pub fn server_cert_hosts(extra_sans: &[String], ip: &str) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    for host in extra_sans.iter().map(String::as_str).chain([ip, "localhost"]) {
        if !host.is_empty() && !hosts.iter().any(|h| h == host) {
            hosts.push(host.to_string());
        }
    }
    hosts
}

fn names_host(line: &str, hostname: &str) -> bool {
    line.trim_end()
        .strip_suffix(hostname)
        .is_some_and(|rest| rest.ends_with(char::is_whitespace))
}

fn is_loopback_alias(line: &str) -> bool {
    line.strip_prefix(LOOPBACK_ALIAS)
        .is_some_and(|rest| rest.starts_with(char::is_whitespace))
}

/// Point every `127.0.1.1` line at `hostname`, appending one if there is none
fn set_loopback_alias(content: &str, hostname: &str) -> String {
    let entry = format!("{LOOPBACK_ALIAS} {hostname}");
    let mut found = false;
    let mut lines: Vec<&str> = content
        .lines()
        .map(|line| {
            if is_loopback_alias(line) {
                found = true;
                entry.as_str()
            } else {
                line
            }
        })
        .collect();
    if !found {
        lines.push(&entry);
    }
    let mut updated = lines.join("\n");
    updated.push('\n');
    updated
}

/// Debian convention: leave the file alone when any line already ends in the
/// hostname, otherwise rewrite or append the `127.0.1.1` alias
pub fn update_debian_hosts(content: &str, hostname: &str) -> Option<String> {
    if content.lines().any(|line| names_host(line, hostname)) {
        return None;
    }
    Some(set_loopback_alias(content, hostname))
}

/// RedHat convention: the `127.0.1.1` alias always names the host
pub fn update_redhat_hosts(content: &str, hostname: &str) -> Option<String> {
    let updated = set_loopback_alias(content, hostname);
    (updated != content).then_some(updated)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::drivers::fake::FakeDriver;
    use crate::provision::testing::*;
    use crate::ssh::fake::FakeSshCommander;
    use tempfile::TempDir;

    const HOSTS: &str = "127.0.0.1 localhost\n::1 localhost ip6-localhost\n";

    #[test]
    fn test_debian_hosts_append_then_stable() {
        let once = update_debian_hosts(HOSTS, "vm1").unwrap();
        assert!(once.ends_with("127.0.1.1 vm1\n"));
        assert_eq!(update_debian_hosts(&once, "vm1"), None);
    }

    #[test]
    fn test_debian_hosts_replaces_alias() {
        let content = "127.0.0.1 localhost\n127.0.1.1 old-name\n";
        let updated = update_debian_hosts(content, "vm1").unwrap();
        assert_eq!(updated, "127.0.0.1 localhost\n127.0.1.1 vm1\n");
    }

    #[test]
    fn test_debian_hosts_accepts_existing_mapping() {
        let content = "127.0.0.1 localhost\n10.0.0.4\tvm1\n";
        assert_eq!(update_debian_hosts(content, "vm1"), None);
        // A longer name ending in the hostname is not a match
        assert!(update_debian_hosts("127.0.0.1 my-vm1\n", "vm1").is_some());
    }

    #[test]
    fn test_redhat_hosts_idempotent() {
        let once = update_redhat_hosts(HOSTS, "vm1").unwrap();
        assert_eq!(once.matches("127.0.1.1").count(), 1);
        assert_eq!(update_redhat_hosts(&once, "vm1"), None);
    }

    #[test]
    fn test_server_cert_hosts_dedup() {
        let sans = vec!["vm1.example.com".to_string(), "localhost".to_string()];
        assert_eq!(
            server_cert_hosts(&sans, "10.0.0.4"),
            vec!["vm1.example.com", "localhost", "10.0.0.4"]
        );
        assert_eq!(server_cert_hosts(&[], "10.0.0.4"), vec!["10.0.0.4", "localhost"]);
    }

    #[test]
    fn test_update_hosts_file_twice_writes_once() {
        let mut driver = FakeDriver::new("vm1");
        let commander = Arc::new(FakeSshCommander::new().with_file(HOSTS_FILE, HOSTS));
        let ctx = ProvisionContext::new(
            &mut driver,
            Box::new(SharedCommander(commander.clone())),
            Arc::new(RecordingImages::default()),
        );

        ctx.update_hosts_file("vm1", update_debian_hosts).unwrap();
        let first = commander.file(HOSTS_FILE).unwrap();
        ctx.update_hosts_file("vm1", update_debian_hosts).unwrap();

        assert_eq!(commander.file(HOSTS_FILE).unwrap(), first);
        let writes = commander
            .calls()
            .iter()
            .filter(|c| c.contains("sudo tee /etc/hosts"))
            .count();
        assert_eq!(writes, 1);
    }

    #[test]
    fn test_install_remote_files_is_staged() {
        let mut driver = FakeDriver::new("vm1");
        let commander = Arc::new(FakeSshCommander::new());
        let ctx = ProvisionContext::new(
            &mut driver,
            Box::new(SharedCommander(commander.clone())),
            Arc::new(RecordingImages::default()),
        );

        ctx.install_remote_files(&[
            ("/etc/podman/ca.pem", "-----BEGIN CERTIFICATE-----\nit's\n".to_string()),
            ("/etc/podman/server.pem", "server".to_string()),
        ])
        .unwrap();

        assert_eq!(
            commander.file("/etc/podman/ca.pem").as_deref(),
            Some("-----BEGIN CERTIFICATE-----\nit's\n")
        );
        assert_eq!(commander.file("/etc/podman/server.pem").as_deref(), Some("server"));
        assert_eq!(commander.file("/etc/podman/ca.pem.tmp"), None);
    }

    #[test]
    fn test_failed_transfer_leaves_live_files_untouched() {
        let mut driver = FakeDriver::new("vm1");
        let commander = Arc::new(
            FakeSshCommander::new()
                .with_file("/etc/podman/ca.pem", "old-ca")
                .fail_on("server.pem.tmp"),
        );
        let ctx = ProvisionContext::new(
            &mut driver,
            Box::new(SharedCommander(commander.clone())),
            Arc::new(RecordingImages::default()),
        );

        let result = ctx.install_remote_files(&[
            ("/etc/podman/ca.pem", "new-ca".to_string()),
            ("/etc/podman/server.pem", "server".to_string()),
        ]);

        assert!(matches!(result, Err(ProvisionError::Ssh(_))));
        assert_eq!(commander.file("/etc/podman/ca.pem").as_deref(), Some("old-ca"));
        assert!(!commander.calls().iter().any(|c| c.starts_with("sudo mv")));
    }

    #[test]
    fn test_configure_auth_copies_and_uploads() {
        let temp = TempDir::new().unwrap();
        let auth = bootstrapped_auth(temp.path());
        let mut driver = FakeDriver::new("vm1").with_ip("192.168.64.7");
        let commander = Arc::new(FakeSshCommander::new());
        let mut ctx = ProvisionContext::new(
            &mut driver,
            Box::new(SharedCommander(commander.clone())),
            Arc::new(RecordingImages::default()),
        );
        ctx.auth = auth.clone().with_sans(vec!["vm1.local".to_string()]);
        ctx.set_remote_auth_options("/etc/podman");

        ctx.configure_auth().unwrap();

        for name in ["ca.pem", "cert.pem", "key.pem"] {
            assert!(auth.store_path.join(name).exists(), "{name} not copied");
        }
        let sans = cert::read_sans(&auth.server_cert_path).unwrap();
        assert!(sans.contains(&"192.168.64.7".to_string()));
        assert!(sans.contains(&"localhost".to_string()));
        assert!(sans.contains(&"vm1.local".to_string()));
        assert_eq!(
            commander.file("/etc/podman/ca.pem").unwrap(),
            fs::read_to_string(&auth.ca_cert_path).unwrap()
        );
        assert_eq!(
            commander.file("/etc/podman/server-key.pem").unwrap(),
            fs::read_to_string(&auth.server_key_path).unwrap()
        );
    }

    #[test]
    fn test_configure_auth_requires_ip() {
        let temp = TempDir::new().unwrap();
        let mut driver = FakeDriver::new("vm1");
        let mut ctx = ProvisionContext::new(
            &mut driver,
            Box::new(FakeSshCommander::new()),
            Arc::new(RecordingImages::default()),
        );
        ctx.auth = bootstrapped_auth(temp.path());

        let err = ctx.configure_auth().unwrap_err();
        assert!(matches!(err, ProvisionError::Driver(_)));
    }
}
