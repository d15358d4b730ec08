//! RHEL, CentOS and Fedora guests (yum + systemd)

use super::engine_config::{labels_with_provider, render_redhat};
use super::utils::update_redhat_hosts;
use super::{
    ENGINE_PACKAGE, EngineConfig, OsRelease, PackageAction, ProvisionContext, ProvisionError,
    Provisioner, ServiceAction,
};
use crate::auth::AuthOptions;
use crate::engine::EngineOptions;

pub const NAME: &str = "redhat";
pub const OS_IDS: &[&str] = &["rhel", "centos", "fedora"];

const ENGINE_OPTIONS_DIR: &str = "/etc/podman";

pub struct RedHatProvisioner<'a> {
    ctx: ProvisionContext<'a>,
    os_release: Option<OsRelease>,
}

impl<'a> RedHatProvisioner<'a> {
    pub fn new(ctx: ProvisionContext<'a>) -> Self {
        Self {
            ctx,
            os_release: None,
        }
    }
}

/// yum has no purge; Purge removes like Remove
fn yum_command(name: &str, action: PackageAction) -> String {
    let verb = match action {
        PackageAction::Install => "install",
        PackageAction::Remove => "remove",
        PackageAction::Purge => "remove",
        PackageAction::Upgrade => "upgrade",
    };
    format!("sudo -E yum {verb} -y {name}")
}

impl Provisioner for RedHatProvisioner<'_> {
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

    fn set_hostname(&self, hostname: &str) -> Result<(), ProvisionError> {
        self.ctx.ssh(&format!(
            "sudo hostname {hostname} && echo {hostname:?} | sudo tee /etc/hostname"
        ))?;
        self.ctx.update_hosts_file(hostname, update_redhat_hosts)
    }

    fn engine_options_dir(&self) -> &'static str {
        ENGINE_OPTIONS_DIR
    }

    fn package(&mut self, name: &str, action: PackageAction) -> Result<(), ProvisionError> {
        self.ctx.ssh(&yum_command(name, action))?;
        Ok(())
    }

    /// Unit files may have changed with a package install, so start and
    /// restart reload systemd first
    fn service(&self, name: &str, action: ServiceAction) -> Result<(), ProvisionError> {
        if matches!(action, ServiceAction::Start | ServiceAction::Restart) {
            self.ctx.ssh("sudo systemctl daemon-reload")?;
        }
        self.ctx.ssh(&format!("sudo systemctl -f {action} {name}"))?;
        Ok(())
    }

    fn generate_engine_options(&self) -> EngineConfig {
        let labels = labels_with_provider(&self.ctx.engine, &self.ctx.driver.driver_name());
        render_redhat(ENGINE_OPTIONS_DIR, &self.ctx.auth, &self.ctx.engine, &labels)
    }

    fn provision(
        &mut self,
        auth: AuthOptions,
        engine: EngineOptions,
    ) -> Result<AuthOptions, ProvisionError> {
        self.ctx.auth = auth;
        self.ctx.engine = engine;

        self.set_hostname(&self.ctx.driver.machine_name())?;

        let package = self.ctx.engine.install_package.clone();
        tracing::debug!("installing base package: name={}", package);
        self.package(&package, PackageAction::Install)?;
        self.service(ENGINE_PACKAGE, ServiceAction::Enable)?;

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
