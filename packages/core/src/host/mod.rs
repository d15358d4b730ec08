//! Hosts: the unit users operate on
//!
//! A [`Host`] pairs a driver with the auth and engine options used to
//! provision it. Records live in a [`HostStore`]; the driver payload is kept
//! as raw JSON until a [`DriverCatalog`](crate::plugin::DriverCatalog) turns
//! it into a live driver.

mod error;
pub mod lock;
pub mod migrate;
pub mod storage;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use error::HostError;
pub use lock::HostLock;
pub use migrate::{HostRecord, migrate_record};
pub use storage::{Filestore, HostStore};

use crate::auth::AuthOptions;
use crate::cert;
use crate::drivers::image::BootImageStore;
use crate::drivers::{Driver, WaitPolicy, wait_for_state};
use crate::engine::EngineOptions;
use crate::plugin::DriverCatalog;
use crate::provision::{self, PackageAction, ProvisionContext, ServiceAction};
use crate::ssh::SshCommander;
use crate::state::State;
use crate::version::CONFIG_VERSION;

/// Options that shape provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOptions {
    #[serde(default = "EngineOptions::new")]
    pub engine: EngineOptions,
    #[serde(default)]
    pub auth: AuthOptions,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            engine: EngineOptions::new(),
            auth: AuthOptions::default(),
        }
    }
}

/// Driver state of a host, live or still as stored
pub enum DriverPayload {
    Decoded(Box<dyn Driver>),
    Raw(Value),
}

pub struct Host {
    pub name: String,
    pub config_version: u32,
    pub driver_name: String,
    pub driver: DriverPayload,
    pub host_options: HostOptions,
    /// Payload as last read from disk; fields the live driver does not know
    /// survive the next save
    pub raw_driver: Value,
    pub extra: Map<String, Value>,
    wait: WaitPolicy,
    ssh_attempts: Option<u32>,
}

impl Host {
    pub fn new(name: &str, driver: Box<dyn Driver>, host_options: HostOptions) -> Self {
        Self {
            name: name.to_string(),
            config_version: CONFIG_VERSION,
            driver_name: driver.driver_name(),
            driver: DriverPayload::Decoded(driver),
            host_options,
            raw_driver: Value::Null,
            extra: Map::new(),
            wait: WaitPolicy::default(),
            ssh_attempts: None,
        }
    }

    pub fn from_record(record: HostRecord) -> Self {
        Self {
            name: record.name,
            config_version: record.config_version,
            driver_name: record.driver_name,
            driver: DriverPayload::Raw(record.driver.clone()),
            host_options: record.host_options,
            raw_driver: record.driver,
            extra: record.extra,
            wait: WaitPolicy::default(),
            ssh_attempts: None,
        }
    }

    /// Poll settings for the state waits after lifecycle calls
    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn set_wait(&mut self, wait: WaitPolicy) {
        self.wait = wait;
    }

    /// Bound on SSH login attempts before provisioning; `None` waits forever
    pub fn set_ssh_attempts(&mut self, attempts: Option<u32>) {
        self.ssh_attempts = attempts;
    }

    /// Record form, merging the live driver state over the stored payload
    pub fn to_record(&self) -> Result<HostRecord, HostError> {
        let driver = match &self.driver {
            DriverPayload::Decoded(driver) => merge_raw(&self.raw_driver, driver.to_raw()?),
            DriverPayload::Raw(raw) => raw.clone(),
        };
        Ok(HostRecord {
            config_version: self.config_version,
            name: self.name.clone(),
            driver_name: self.driver_name.clone(),
            driver,
            host_options: self.host_options.clone(),
            extra: self.extra.clone(),
        })
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self.driver, DriverPayload::Decoded(_))
    }

    /// Build the live driver from the stored payload, once
    pub fn decode(&mut self, catalog: &DriverCatalog, store_path: &Path) -> Result<(), HostError> {
        if let DriverPayload::Raw(raw) = &self.driver {
            let driver = catalog.load_driver(&self.driver_name, &self.name, store_path, raw)?;
            self.driver = DriverPayload::Decoded(driver);
        }
        Ok(())
    }

    pub fn driver(&self) -> Result<&dyn Driver, HostError> {
        match &self.driver {
            DriverPayload::Decoded(driver) => Ok(driver.as_ref()),
            DriverPayload::Raw(_) => Err(HostError::DriverNotLoaded(self.name.clone())),
        }
    }

    pub fn driver_mut(&mut self) -> Result<&mut dyn Driver, HostError> {
        match &mut self.driver {
            DriverPayload::Decoded(driver) => Ok(driver.as_mut()),
            DriverPayload::Raw(_) => Err(HostError::DriverNotLoaded(self.name.clone())),
        }
    }

    pub fn state(&self) -> Result<State, HostError> {
        Ok(self.driver()?.get_state()?)
    }

    pub fn url(&self) -> Result<String, HostError> {
        Ok(self.driver()?.get_url()?)
    }

    pub fn ip(&self) -> Result<String, HostError> {
        Ok(self.driver()?.get_ip()?)
    }

    pub fn start(&mut self) -> Result<(), HostError> {
        tracing::info!("Starting {:?}...", self.name);
        let wait = self.wait;
        let driver = self.driver_mut()?;
        driver.start()?;
        wait_for_state(driver, State::Running, wait)?;
        tracing::info!("Machine {:?} was started.", self.name);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), HostError> {
        tracing::info!("Stopping {:?}...", self.name);
        let wait = self.wait;
        let driver = self.driver_mut()?;
        driver.stop()?;
        wait_for_state(driver, State::Stopped, wait)?;
        tracing::info!("Machine {:?} was stopped.", self.name);
        Ok(())
    }

    pub fn kill(&mut self) -> Result<(), HostError> {
        tracing::info!("Killing {:?}...", self.name);
        let wait = self.wait;
        let driver = self.driver_mut()?;
        driver.kill()?;
        wait_for_state(driver, State::Stopped, wait)?;
        tracing::info!("Machine {:?} was killed.", self.name);
        Ok(())
    }

    /// Start a stopped machine, restart a running one, leave others alone
    pub fn restart(&mut self) -> Result<(), HostError> {
        tracing::info!("Restarting {:?}...", self.name);
        match self.state()? {
            State::Stopped => self.start(),
            State::Running => {
                let wait = self.wait;
                let driver = self.driver_mut()?;
                driver.restart()?;
                wait_for_state(driver, State::Running, wait)?;
                Ok(())
            }
            other => {
                tracing::debug!("Not restarting {:?} in state {:?}", self.name, other);
                Ok(())
            }
        }
    }

    /// Tear down the backend; the record is removed by the store
    pub fn remove(&mut self) -> Result<(), HostError> {
        self.driver_mut()?.remove()?;
        Ok(())
    }

    fn context<'a>(
        driver: &'a mut dyn Driver,
        commander: Box<dyn SshCommander>,
        images: Arc<dyn BootImageStore>,
        wait: WaitPolicy,
    ) -> ProvisionContext<'a> {
        ProvisionContext::new(driver, commander, images).with_wait(wait)
    }

    /// Wait for SSH, then run the provisioner matching the guest OS
    ///
    /// The auth options come back with the remote certificate paths filled in.
    pub fn provision(
        &mut self,
        commander: Box<dyn SshCommander>,
        images: Arc<dyn BootImageStore>,
    ) -> Result<(), HostError> {
        let auth = self.host_options.auth.clone();
        let engine = self.host_options.engine.clone();
        let wait = self.wait;
        let ssh_attempts = self.ssh_attempts;
        let ctx = Self::context(self.driver_mut()?, commander, images, wait)
            .with_ssh_attempts(ssh_attempts);
        let auth = provision::provision_host(ctx, auth, engine)?;
        self.host_options.auth = auth;
        Ok(())
    }

    /// Issue fresh certificates and push them to a running machine
    ///
    /// With `regenerate_ca` the CA and client certificates are replaced too,
    /// which invalidates every other host signed by the old CA.
    pub fn regenerate_certs(
        &mut self,
        commander: Box<dyn SshCommander>,
        images: Arc<dyn BootImageStore>,
        regenerate_ca: bool,
    ) -> Result<(), HostError> {
        self.require_running()?;
        tracing::info!("Regenerating TLS certificates for {:?}", self.name);
        cert::bootstrap_certificates(&self.host_options.auth, regenerate_ca)?;

        let auth = self.host_options.auth.clone();
        let engine = self.host_options.engine.clone();
        let wait = self.wait;
        let ctx = Self::context(self.driver_mut()?, commander, images, wait);
        let auth = provision::run(ctx, auth, engine)?;
        self.host_options.auth = auth;
        Ok(())
    }

    /// Upgrade the engine (or boot image) and restart it
    pub fn upgrade(
        &mut self,
        commander: Box<dyn SshCommander>,
        images: Arc<dyn BootImageStore>,
    ) -> Result<(), HostError> {
        self.require_running()?;
        let wait = self.wait;
        let ctx = Self::context(self.driver_mut()?, commander, images, wait);
        let mut provisioner = provision::detect_provisioner(ctx)?;

        tracing::info!("Upgrading {}...", provision::ENGINE_PACKAGE);
        provisioner.package(provision::ENGINE_PACKAGE, PackageAction::Upgrade)?;
        tracing::info!("Restarting {}...", provision::ENGINE_PACKAGE);
        provisioner.service(provision::ENGINE_PACKAGE, ServiceAction::Restart)?;
        Ok(())
    }

    fn require_running(&self) -> Result<(), HostError> {
        if self.state()? != State::Running {
            return Err(HostError::NotRunning(self.name.clone()));
        }
        Ok(())
    }
}

/// Overlay `fresh` on `stored`, keeping stored keys the driver no longer emits
fn merge_raw(stored: &Value, fresh: Value) -> Value {
    match (stored, fresh) {
        (Value::Object(stored), Value::Object(fresh)) => {
            let mut merged = stored.clone();
            merged.extend(fresh);
            Value::Object(merged)
        }
        (_, fresh) => fresh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fake::FakeDriver;
    use crate::provision::testing::{RecordingImages, SharedCommander, quick_wait};
    use crate::ssh::fake::FakeSshCommander;
    use serde_json::json;
    use std::time::Duration;

    fn fake_host(driver: FakeDriver) -> Host {
        Host::new("vm1", Box::new(driver), HostOptions::default()).with_wait(quick_wait())
    }

    #[test]
    fn test_lifecycle_waits_for_state() {
        let mut host = fake_host(FakeDriver::new("vm1").with_state(State::Stopped));
        host.start().unwrap();
        assert_eq!(host.state().unwrap(), State::Running);
        host.stop().unwrap();
        assert_eq!(host.state().unwrap(), State::Stopped);
        host.restart().unwrap();
        assert_eq!(host.state().unwrap(), State::Running);
        host.kill().unwrap();
        assert_eq!(host.state().unwrap(), State::Stopped);
    }

    #[test]
    fn test_start_reports_state_timeout() {
        let driver = FakeDriver::new("vm1").with_state_error("qemu monitor unavailable");
        let mut host = fake_host(driver);
        let err = host.start().unwrap_err();
        assert!(err.to_string().contains("did not reach expected state Running"));
    }

    #[test]
    fn test_raw_host_refuses_driver_calls() {
        let record = HostRecord {
            config_version: CONFIG_VERSION,
            name: "vm1".to_string(),
            driver_name: "none".to_string(),
            driver: json!({
                "machine_name": "vm1",
                "store_path": "/tmp/machina-store",
                "url": "tcp://10.0.0.5:2376"
            }),
            host_options: HostOptions::default(),
            extra: Map::new(),
        };
        let mut host = Host::from_record(record);
        assert!(matches!(host.url(), Err(HostError::DriverNotLoaded(_))));

        host.decode(&DriverCatalog::in_process(), Path::new("/tmp/machina-store"))
            .unwrap();
        assert_eq!(host.url().unwrap(), "tcp://10.0.0.5:2376");
    }

    #[test]
    fn test_record_keeps_unknown_driver_fields() {
        let record = HostRecord {
            config_version: CONFIG_VERSION,
            name: "vm1".to_string(),
            driver_name: "none".to_string(),
            driver: json!({
                "machine_name": "vm1",
                "store_path": "/tmp/machina-store",
                "url": "tcp://10.0.0.5:2376",
                "plugin_only_field": 7
            }),
            host_options: HostOptions::default(),
            extra: Map::new(),
        };
        let mut host = Host::from_record(record);
        host.decode(&DriverCatalog::in_process(), Path::new("/tmp/machina-store"))
            .unwrap();

        let saved = host.to_record().unwrap();
        assert_eq!(saved.driver["plugin_only_field"], json!(7));
        assert_eq!(saved.driver["url"], json!("tcp://10.0.0.5:2376"));
    }

    #[test]
    fn test_merge_prefers_live_state() {
        let merged = merge_raw(&json!({"a": 1, "b": 1}), json!({"b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
        assert_eq!(merge_raw(&Value::Null, json!({"b": 2})), json!({"b": 2}));
    }

    #[test]
    fn test_upgrade_requires_running() {
        let mut host = fake_host(FakeDriver::new("vm1").with_state(State::Stopped));
        let commander = Arc::new(FakeSshCommander::new());
        let err = host
            .upgrade(
                Box::new(SharedCommander(commander.clone())),
                Arc::new(RecordingImages::default()),
            )
            .unwrap_err();
        assert!(matches!(err, HostError::NotRunning(_)));
        assert!(commander.calls().is_empty());
    }

    #[test]
    fn test_upgrade_debian_guest() {
        let mut host = fake_host(FakeDriver::new("vm1").with_state(State::Running));
        let commander = Arc::new(
            FakeSshCommander::new().respond("cat /etc/os-release", "ID=debian\nNAME=\"Debian\"\n"),
        );
        host.upgrade(
            Box::new(SharedCommander(commander.clone())),
            Arc::new(RecordingImages::default()),
        )
        .unwrap();

        let calls = commander.calls();
        let upgrade = calls
            .iter()
            .position(|c| c.contains("apt-get") && c.contains("podman"))
            .unwrap();
        let restart = calls
            .iter()
            .position(|c| c == "sudo systemctl restart podman")
            .unwrap();
        assert!(upgrade < restart);
    }

    #[test]
    fn test_restart_leaves_other_states() {
        let mut host = fake_host(
            FakeDriver::new("vm1")
                .with_state(State::Paused)
                .with_delay(Duration::from_millis(1)),
        );
        host.restart().unwrap();
        assert_eq!(host.state().unwrap(), State::Paused);
    }
}
