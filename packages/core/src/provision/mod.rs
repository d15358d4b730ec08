//! Guest provisioning
//!
//! Once a machine accepts SSH logins, a [`Provisioner`] matching its
//! `/etc/os-release` sets the hostname, issues and installs a TLS server
//! certificate, and writes the container engine configuration. All remote
//! work goes through an [`SshCommander`], so every step can be driven by a
//! scripted commander in tests.

pub mod boot2podman;
pub mod debian;
mod engine_config;
mod error;
pub mod os_release;
pub mod redhat;
mod utils;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use engine_config::{EngineConfig, labels_with_provider};
pub use error::ProvisionError;
pub use os_release::OsRelease;
pub use utils::{server_cert_hosts, update_debian_hosts, update_redhat_hosts};

use crate::auth::AuthOptions;
use crate::drivers::image::BootImageStore;
use crate::drivers::{Driver, WaitPolicy};
use crate::engine::EngineOptions;
use crate::ssh::{self, SshCommander};

/// Package and service name of the container engine on the guest
pub const ENGINE_PACKAGE: &str = "podman";

const SSH_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Package manager operations
///
/// Not every family distinguishes all four: the RedHat provisioner runs
/// `Purge` as a plain remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageAction {
    Install,
    Remove,
    Purge,
    Upgrade,
}

/// Init system operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OS-family specific guest setup
pub trait Provisioner {
    fn name(&self) -> &'static str;

    /// True when the detected OS belongs to this provisioner's family
    fn compatible_with_host(&self) -> bool;

    fn set_os_release(&mut self, release: OsRelease);

    fn os_release(&self) -> Option<&OsRelease>;

    fn hostname(&self) -> Result<String, ProvisionError>;

    fn set_hostname(&self, hostname: &str) -> Result<(), ProvisionError>;

    fn engine_options_dir(&self) -> &'static str;

    fn package(&mut self, name: &str, action: PackageAction) -> Result<(), ProvisionError>;

    fn service(&self, name: &str, action: ServiceAction) -> Result<(), ProvisionError>;

    /// Render the engine config for the current auth and engine options
    fn generate_engine_options(&self) -> EngineConfig;

    /// Run the full setup; returns the auth options with remote paths filled in
    fn provision(
        &mut self,
        auth: AuthOptions,
        engine: EngineOptions,
    ) -> Result<AuthOptions, ProvisionError>;
}

/// Everything a provisioner works with for one machine
pub struct ProvisionContext<'a> {
    pub driver: &'a mut dyn Driver,
    pub commander: Box<dyn SshCommander>,
    pub auth: AuthOptions,
    pub engine: EngineOptions,
    pub wait: WaitPolicy,
    /// Bound on SSH login attempts before provisioning; `None` waits forever
    pub ssh_attempts: Option<u32>,
    pub images: Arc<dyn BootImageStore>,
}

impl<'a> ProvisionContext<'a> {
    pub fn new(
        driver: &'a mut dyn Driver,
        commander: Box<dyn SshCommander>,
        images: Arc<dyn BootImageStore>,
    ) -> Self {
        Self {
            driver,
            commander,
            auth: AuthOptions::default(),
            engine: EngineOptions::new(),
            wait: WaitPolicy::default(),
            ssh_attempts: None,
            images,
        }
    }

    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_ssh_attempts(mut self, attempts: Option<u32>) -> Self {
        self.ssh_attempts = attempts;
        self
    }
}

type Constructor = for<'a> fn(ProvisionContext<'a>) -> Box<dyn Provisioner + 'a>;

struct Registration {
    name: &'static str,
    ids: &'static [&'static str],
    build: Constructor,
}

fn build_boot2podman<'a>(ctx: ProvisionContext<'a>) -> Box<dyn Provisioner + 'a> {
    Box::new(boot2podman::Boot2PodmanProvisioner::new(ctx))
}

fn build_debian<'a>(ctx: ProvisionContext<'a>) -> Box<dyn Provisioner + 'a> {
    Box::new(debian::DebianProvisioner::new(ctx))
}

fn build_redhat<'a>(ctx: ProvisionContext<'a>) -> Box<dyn Provisioner + 'a> {
    Box::new(redhat::RedHatProvisioner::new(ctx))
}

const REGISTRY: &[Registration] = &[
    Registration {
        name: boot2podman::NAME,
        ids: boot2podman::OS_IDS,
        build: build_boot2podman,
    },
    Registration {
        name: debian::NAME,
        ids: debian::OS_IDS,
        build: build_debian,
    },
    Registration {
        name: redhat::NAME,
        ids: redhat::OS_IDS,
        build: build_redhat,
    },
];

/// Names of the known provisioners, in detection order
pub fn provisioner_names() -> Vec<&'static str> {
    REGISTRY.iter().map(|r| r.name).collect()
}

/// Probe the guest OS and pick the provisioner for it
///
/// An exact `ID` match wins over an `ID_LIKE` match.
pub fn detect_provisioner<'a>(
    ctx: ProvisionContext<'a>,
) -> Result<Box<dyn Provisioner + 'a>, ProvisionError> {
    tracing::info!("Detecting the provisioner...");
    let output = ctx.commander.run("cat /etc/os-release")?;
    let release = OsRelease::parse(&output)?;

    let registration = REGISTRY
        .iter()
        .find(|r| release.matches(r.ids))
        .or_else(|| REGISTRY.iter().find(|r| release.is_like(r.ids)))
        .ok_or_else(|| {
            ProvisionError::NoCompatibleProvisioner(release.display_name().to_string())
        })?;

    tracing::debug!(
        "OS {} handled by the {} provisioner",
        release.display_name(),
        registration.name
    );
    let mut provisioner = (registration.build)(ctx);
    provisioner.set_os_release(release);
    Ok(provisioner)
}

/// Detect the guest OS and provision it
pub fn run(
    ctx: ProvisionContext<'_>,
    auth: AuthOptions,
    engine: EngineOptions,
) -> Result<AuthOptions, ProvisionError> {
    let mut provisioner = detect_provisioner(ctx)?;
    provisioner.provision(auth, engine)
}

/// Wait for SSH on a freshly started machine, then [`run`]
pub fn provision_host(
    ctx: ProvisionContext<'_>,
    auth: AuthOptions,
    engine: EngineOptions,
) -> Result<AuthOptions, ProvisionError> {
    ssh::wait_for_ssh(&*ctx.driver, SSH_RETRY_INTERVAL, ctx.ssh_attempts)?;
    run(ctx, auth, engine)
}
