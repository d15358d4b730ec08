//! Debian and Ubuntu guests (apt + systemd)

use super::engine_config::{labels_with_provider, render_debian};
use super::utils::update_debian_hosts;
use super::{
    ENGINE_PACKAGE, EngineConfig, OsRelease, PackageAction, ProvisionContext, ProvisionError,
    Provisioner, ServiceAction,
};
use crate::auth::AuthOptions;
use crate::engine::EngineOptions;

pub const NAME: &str = "debian";
pub const OS_IDS: &[&str] = &["debian", "ubuntu"];

const ENGINE_OPTIONS_DIR: &str = "/etc/podman";
const OPTIONS_FILE: &str = "/etc/default/podman";

pub struct DebianProvisioner<'a> {
    ctx: ProvisionContext<'a>,
    os_release: Option<OsRelease>,
}

impl<'a> DebianProvisioner<'a> {
    pub fn new(ctx: ProvisionContext<'a>) -> Self {
        Self {
            ctx,
            os_release: None,
        }
    }
}

fn apt_command(name: &str, action: PackageAction) -> String {
    let apt = "sudo DEBIAN_FRONTEND=noninteractive apt-get";
    match action {
        PackageAction::Install => format!("sudo apt-get update && {apt} install -y {name}"),
        PackageAction::Remove => format!("{apt} remove -y {name}"),
        PackageAction::Purge => format!("{apt} purge -y {name}"),
        PackageAction::Upgrade => {
            format!("sudo apt-get update && {apt} install --only-upgrade -y {name}")
        }
    }
}

impl Provisioner for DebianProvisioner<'_> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn compatible_with_host(&self) -> bool {
        self.os_release
            .as_ref()
            .is_some_and(|release| release.is_like(OS_IDS))
    }

    fn set_os_release(&mut self, release: OsRelease) {
        self.os_release = Some(release);
    }

    fn os_release(&self) -> Option<&OsRelease> {
        self.os_release.as_ref()
    }

    fn hostname(&self) -> Result<String, ProvisionError> {
        self.ctx.remote_hostname()
    }

    /// Debian resolves non-localhost loopback names through `127.0.1.1`
    fn set_hostname(&self, hostname: &str) -> Result<(), ProvisionError> {
        self.ctx.ssh(&format!(
            "sudo hostname {hostname} && echo {hostname:?} | sudo tee /etc/hostname"
        ))?;
        self.ctx.update_hosts_file(hostname, update_debian_hosts)
    }

    fn engine_options_dir(&self) -> &'static str {
        ENGINE_OPTIONS_DIR
    }

    fn package(&mut self, name: &str, action: PackageAction) -> Result<(), ProvisionError> {
        self.ctx.ssh(&apt_command(name, action))?;
        Ok(())
    }

    fn service(&self, name: &str, action: ServiceAction) -> Result<(), ProvisionError> {
        self.ctx.ssh(&format!("sudo systemctl {action} {name}"))?;
        Ok(())
    }

    fn generate_engine_options(&self) -> EngineConfig {
        let labels = labels_with_provider(&self.ctx.engine, &self.ctx.driver.driver_name());
        render_debian(OPTIONS_FILE, &self.ctx.auth, &self.ctx.engine, &labels)
    }

    fn provision(
        &mut self,
        auth: AuthOptions,
        engine: EngineOptions,
    ) -> Result<AuthOptions, ProvisionError> {
        self.ctx.auth = auth;
        self.ctx.engine = engine;

        self.set_hostname(&self.ctx.driver.machine_name())?;
        self.ctx.make_engine_options_dir(ENGINE_OPTIONS_DIR)?;
        self.ctx.set_remote_auth_options(ENGINE_OPTIONS_DIR);
        self.ctx.configure_auth()?;

        let config = self.generate_engine_options();
        self.ctx.install_engine_config(&config)?;
        self.service(ENGINE_PACKAGE, ServiceAction::Restart)?;
        self.ctx.wait_for_engine()?;

        Ok(self.ctx.auth.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cert;
    use crate::drivers::fake::FakeDriver;
    use crate::provision::testing::*;
    use crate::ssh::fake::FakeSshCommander;
    use tempfile::TempDir;

    const HOSTS: &str = "127.0.0.1 localhost\n127.0.1.1 debian\n";

    #[test]
    fn test_set_hostname_twice_is_stable() {
        let mut driver = FakeDriver::new("vm1");
        let commander = Arc::new(FakeSshCommander::new().with_file("/etc/hosts", HOSTS));
        let provisioner = DebianProvisioner::new(ProvisionContext::new(
            &mut driver,
            Box::new(SharedCommander(commander.clone())),
            Arc::new(RecordingImages::default()),
        ));

        provisioner.set_hostname("vm1").unwrap();
        let once = commander.file("/etc/hosts").unwrap();
        provisioner.set_hostname("vm1").unwrap();
        let twice = commander.file("/etc/hosts").unwrap();

        assert_eq!(once, "127.0.0.1 localhost\n127.0.1.1 vm1\n");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_package_commands() {
        assert_eq!(
            apt_command("podman", PackageAction::Purge),
            "sudo DEBIAN_FRONTEND=noninteractive apt-get purge -y podman"
        );
        assert_eq!(
            apt_command("podman", PackageAction::Remove),
            "sudo DEBIAN_FRONTEND=noninteractive apt-get remove -y podman"
        );
        assert!(apt_command("podman", PackageAction::Install).starts_with("sudo apt-get update && "));
    }

    #[test]
    fn test_provision_writes_options_file() {
        let temp = TempDir::new().unwrap();
        let auth = bootstrapped_auth(temp.path());
        let mut driver = FakeDriver::new("vm1").with_ip("10.0.0.4");
        let commander = Arc::new(FakeSshCommander::new().with_file("/etc/hosts", HOSTS));
        let mut provisioner = DebianProvisioner::new(ProvisionContext::new(
            &mut driver,
            Box::new(SharedCommander(commander.clone())),
            Arc::new(RecordingImages::default()),
        ));
        let engine = EngineOptions {
            labels: vec!["a=1".to_string(), "b=2".to_string()],
            ..EngineOptions::new()
        };

        let auth = provisioner.provision(auth, engine).unwrap();

        let options = commander.file("/etc/default/podman").unwrap();
        assert_eq!(options.lines().filter(|l| *l == "--label a=1").count(), 1);
        assert_eq!(options.lines().filter(|l| *l == "--label b=2").count(), 1);
        assert!(!options.contains("--insecure-registry"));
        assert!(options.contains("--tlskey /etc/podman/server-key.pem\n"));
        assert!(commander.file("/etc/podman/server.pem").is_some());
        assert!(commander.calls().contains(&"sudo systemctl restart podman".to_string()));

        let sans = cert::read_sans(&auth.server_cert_path).unwrap();
        assert!(sans.contains(&"10.0.0.4".to_string()));
        assert!(sans.contains(&"localhost".to_string()));
    }
}
