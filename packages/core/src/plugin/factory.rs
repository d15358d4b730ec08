//! Driver construction by name
//!
//! [`BuiltinFactory`] builds compiled-in drivers directly. [`PluginFactory`]
//! re-executes a binary in plugin mode and hands back an [`RpcDriver`] bound
//! to the child. [`DriverCatalog`] decides which one serves a given name.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::TransportError;
use super::client::{PluginProcess, RpcDriver};
use crate::drivers::{self, Driver, DriverError, none};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Produces an unconfigured driver for one machine
pub trait DriverFactory: Send + Sync {
    fn new_driver(
        &self,
        driver_name: &str,
        machine_name: &str,
        store_path: &Path,
    ) -> Result<Box<dyn Driver>, DriverError>;
}

/// In-process construction of compiled-in drivers
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinFactory;

impl DriverFactory for BuiltinFactory {
    fn new_driver(
        &self,
        driver_name: &str,
        machine_name: &str,
        store_path: &Path,
    ) -> Result<Box<dyn Driver>, DriverError> {
        drivers::new_builtin(driver_name, machine_name, store_path)
            .ok_or_else(|| TransportError::UnknownDriver(driver_name.to_string()).into())
    }
}

/// Drivers served from a child process of `executable`
#[derive(Debug, Clone)]
pub struct PluginFactory {
    executable: PathBuf,
    handshake_timeout: Duration,
}

impl PluginFactory {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Re-execute the running binary
    pub fn current_exe() -> Result<Self, TransportError> {
        let executable = std::env::current_exe().map_err(|e| TransportError::Spawn {
            driver: String::new(),
            message: format!("cannot locate own executable: {e}"),
        })?;
        Ok(Self::new(executable))
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Start a plugin child and return the proxy that owns it
    pub fn spawn_driver(
        &self,
        driver_name: &str,
        machine_name: &str,
        store_path: &Path,
    ) -> Result<RpcDriver, DriverError> {
        let (process, socket) =
            PluginProcess::spawn(&self.executable, driver_name, self.handshake_timeout)?;
        // On any error below `process` drops here and takes the child with it
        let driver = RpcDriver::connect(&socket, driver_name, machine_name, store_path)?;
        Ok(driver.with_process(process))
    }
}

impl DriverFactory for PluginFactory {
    fn new_driver(
        &self,
        driver_name: &str,
        machine_name: &str,
        store_path: &Path,
    ) -> Result<Box<dyn Driver>, DriverError> {
        Ok(Box::new(self.spawn_driver(driver_name, machine_name, store_path)?))
    }
}

/// Routes driver names to a factory
///
/// Without a plugin factory everything is built in-process. With one,
/// non-builtin names always go to it, and so do the builtin hypervisor
/// drivers when `isolate` is set. `none` has no backend to isolate and
/// always stays in-process.
#[derive(Clone)]
pub struct DriverCatalog {
    builtin: Arc<dyn DriverFactory>,
    plugins: Option<Arc<dyn DriverFactory>>,
    isolate: bool,
}

impl DriverCatalog {
    pub fn in_process() -> Self {
        Self {
            builtin: Arc::new(BuiltinFactory),
            plugins: None,
            isolate: false,
        }
    }

    pub fn with_plugins(plugins: Arc<dyn DriverFactory>, isolate: bool) -> Self {
        Self {
            builtin: Arc::new(BuiltinFactory),
            plugins: Some(plugins),
            isolate,
        }
    }

    pub fn is_builtin(driver_name: &str) -> bool {
        drivers::BUILTIN_DRIVERS.contains(&driver_name)
    }

    fn factory_for(&self, driver_name: &str) -> &dyn DriverFactory {
        match &self.plugins {
            Some(plugins)
                if !Self::is_builtin(driver_name)
                    || (self.isolate && driver_name != none::DRIVER_NAME) =>
            {
                plugins.as_ref()
            }
            _ => self.builtin.as_ref(),
        }
    }

    pub fn new_driver(
        &self,
        driver_name: &str,
        machine_name: &str,
        store_path: &Path,
    ) -> Result<Box<dyn Driver>, DriverError> {
        self.factory_for(driver_name)
            .new_driver(driver_name, machine_name, store_path)
    }

    /// Construct a driver and restore its state from a host record payload
    pub fn load_driver(
        &self,
        driver_name: &str,
        machine_name: &str,
        store_path: &Path,
        raw: &serde_json::Value,
    ) -> Result<Box<dyn Driver>, DriverError> {
        let mut driver = self.new_driver(driver_name, machine_name, store_path)?;
        driver.load_raw(raw)?;
        Ok(driver)
    }
}

impl Default for DriverCatalog {
    fn default() -> Self {
        Self::in_process()
    }
}
