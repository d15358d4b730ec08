//! boot2podman / Tiny Core guests

use super::engine_config::{labels_with_provider, render_boot2podman};
use super::{
    ENGINE_PACKAGE, EngineConfig, OsRelease, PackageAction, ProvisionContext, ProvisionError,
    Provisioner, ServiceAction,
};
use crate::auth::AuthOptions;
use crate::drivers::wait_for_state;
use crate::engine::EngineOptions;
use crate::state::State;

pub const NAME: &str = "boot2podman";
pub const OS_IDS: &[&str] = &["boot2podman", "tinycore"];

const ENGINE_OPTIONS_DIR: &str = "/var/lib/boot2podman";

pub struct Boot2PodmanProvisioner<'a> {
    ctx: ProvisionContext<'a>,
    os_release: Option<OsRelease>,
}

impl<'a> Boot2PodmanProvisioner<'a> {
    pub fn new(ctx: ProvisionContext<'a>) -> Self {
        Self {
            ctx,
            os_release: None,
        }
    }

    /// Stop the VM, swap in a fresh boot image and start it again
    ///
    /// The image comes from the driver's `boot_image_url` when it has one,
    /// otherwise from the local cache.
    fn upgrade_image(&mut self) -> Result<(), ProvisionError> {
        let raw = self.ctx.driver.to_raw()?;
        let source = raw
            .get("boot_image_url")
            .and_then(serde_json::Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        let machine_name = self.ctx.driver.machine_name();

        tracing::info!("Stopping machine to do the upgrade...");
        self.ctx.driver.stop()?;
        wait_for_state(&*self.ctx.driver, State::Stopped, self.ctx.wait)?;

        tracing::info!("Upgrading machine {:?}...", machine_name);
        self.ctx
            .images
            .copy_to_machine_dir(source.as_deref(), &machine_name)?;

        tracing::info!("Starting machine back up...");
        self.ctx.driver.start()?;
        wait_for_state(&*self.ctx.driver, State::Running, self.ctx.wait)?;
        Ok(())
    }
}

impl Provisioner for Boot2PodmanProvisioner<'_> {
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
        tracing::debug!("Setting hostname {}", hostname);
        self.ctx.ssh(&format!(
            "sudo /usr/bin/sethostname {hostname} && sudo mkdir -p {dir}/etc && echo {hostname:?} | sudo tee {dir}/etc/hostname",
            dir = ENGINE_OPTIONS_DIR,
        ))?;
        Ok(())
    }

    fn engine_options_dir(&self) -> &'static str {
        ENGINE_OPTIONS_DIR
    }

    /// Only the engine upgrade is meaningful on an image-based guest
    fn package(&mut self, name: &str, action: PackageAction) -> Result<(), ProvisionError> {
        if name == ENGINE_PACKAGE && action == PackageAction::Upgrade {
            return self.upgrade_image();
        }
        Ok(())
    }

    fn service(&self, name: &str, action: ServiceAction) -> Result<(), ProvisionError> {
        self.ctx.ssh(&format!("sudo /etc/init.d/{name} {action}"))?;
        Ok(())
    }

    fn generate_engine_options(&self) -> EngineConfig {
        let labels = labels_with_provider(&self.ctx.engine, &self.ctx.driver.driver_name());
        render_boot2podman(ENGINE_OPTIONS_DIR, &self.ctx.auth, &self.ctx.engine, &labels)
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
