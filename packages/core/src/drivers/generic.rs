//! Driver for an existing machine reachable over SSH

use std::fs;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{BaseDriver, Driver, DriverError, DriverOptions, Flag, decode_state, encode_state};
use crate::ssh::run_ssh_command_from_driver;
use crate::state::State;

pub const DRIVER_NAME: &str = "generic";

const DEFAULT_ENGINE_PORT: u16 = 2376;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericDriver {
    #[serde(flatten)]
    pub base: BaseDriver,
    #[serde(default = "default_engine_port")]
    pub engine_port: u16,
    /// Key supplied by the operator, copied into the machine dir on create
    #[serde(default)]
    pub source_ssh_key: String,
}

fn default_engine_port() -> u16 {
    DEFAULT_ENGINE_PORT
}

impl GenericDriver {
    pub fn new(machine_name: &str, store_path: &Path) -> Self {
        Self {
            base: BaseDriver::new(machine_name, store_path),
            engine_port: DEFAULT_ENGINE_PORT,
            source_ssh_key: String::new(),
        }
    }

    fn ssh_socket_addr(&self) -> Option<SocketAddr> {
        (self.base.ip_address.as_str(), self.base.get_ssh_port())
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
    }
}

impl Driver for GenericDriver {
    fn driver_name(&self) -> String {
        DRIVER_NAME.to_string()
    }

    fn machine_name(&self) -> String {
        self.base.machine_name.clone()
    }

    fn create_flags(&self) -> Vec<Flag> {
        vec![
            Flag::string("generic-ip-address", "IP Address of machine", "")
                .with_env("GENERIC_IP_ADDRESS"),
            Flag::string("generic-ssh-user", "SSH user", "root").with_env("GENERIC_SSH_USER"),
            Flag::string("generic-ssh-key", "SSH private key path", "")
                .with_env("GENERIC_SSH_KEY"),
            Flag::int("generic-ssh-port", "SSH port", 22).with_env("GENERIC_SSH_PORT"),
            Flag::int(
                "generic-engine-port",
                "Engine port",
                i64::from(DEFAULT_ENGINE_PORT),
            )
            .with_env("GENERIC_ENGINE_PORT"),
        ]
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> Result<(), DriverError> {
        let ip = options.string("generic-ip-address");
        if ip.is_empty() {
            return Err(DriverError::InvalidConfig(
                "generic driver requires the --generic-ip-address option".to_string(),
            ));
        }
        self.base.ip_address = ip;

        let user = options.string("generic-ssh-user");
        if !user.is_empty() {
            self.base.ssh_user = user;
        }
        self.base.ssh_port = port_option(options, "generic-ssh-port")?.unwrap_or(22);
        self.engine_port =
            port_option(options, "generic-engine-port")?.unwrap_or(DEFAULT_ENGINE_PORT);
        self.source_ssh_key = options.string("generic-ssh-key");
        Ok(())
    }

    fn pre_create_check(&self) -> Result<(), DriverError> {
        if !self.source_ssh_key.is_empty() && !Path::new(&self.source_ssh_key).exists() {
            return Err(DriverError::InvalidConfig(format!(
                "SSH key does not exist: {}",
                self.source_ssh_key
            )));
        }
        Ok(())
    }

    fn create(&mut self) -> Result<(), DriverError> {
        if self.source_ssh_key.is_empty() {
            tracing::info!("No SSH key specified; relying on the local SSH agent");
            return Ok(());
        }

        let target = self.base.resolve_store_path("id_rsa");
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        tracing::info!("Importing SSH key {}", self.source_ssh_key);
        fs::copy(&self.source_ssh_key, &target)?;
        let public = format!("{}.pub", self.source_ssh_key);
        if Path::new(&public).exists() {
            fs::copy(&public, target.with_extension("pub"))?;
        }
        self.base.ssh_key_path = target.display().to_string();
        Ok(())
    }

    fn get_ip(&self) -> Result<String, DriverError> {
        self.base.get_ip()
    }

    fn get_url(&self) -> Result<String, DriverError> {
        if self.base.ip_address.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("tcp://{}:{}", self.base.ip_address, self.engine_port))
    }

    fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        self.base.get_ip()
    }

    fn get_ssh_port(&self) -> Result<u16, DriverError> {
        Ok(self.base.get_ssh_port())
    }

    fn get_ssh_username(&self) -> String {
        self.base.get_ssh_username()
    }

    fn get_ssh_key_path(&self) -> String {
        if self.source_ssh_key.is_empty() && self.base.ssh_key_path.is_empty() {
            return String::new();
        }
        self.base.get_ssh_key_path()
    }

    /// Running when the SSH port accepts TCP connections
    fn get_state(&self) -> Result<State, DriverError> {
        let Some(addr) = self.ssh_socket_addr() else {
            return Ok(State::Stopped);
        };
        match TcpStream::connect_timeout(&addr, PROBE_TIMEOUT) {
            Ok(_) => Ok(State::Running),
            Err(e) => {
                tracing::debug!("SSH port probe on {} failed: {}", addr, e);
                Ok(State::Stopped)
            }
        }
    }

    fn start(&mut self) -> Result<(), DriverError> {
        Err(DriverError::not_supported(DRIVER_NAME, "start"))
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        Err(DriverError::not_supported(DRIVER_NAME, "stop"))
    }

    fn kill(&mut self) -> Result<(), DriverError> {
        tracing::info!("Powering off {} over SSH", self.base.machine_name);
        run_ssh_command_from_driver(&*self, "sudo shutdown -P now")?;
        Ok(())
    }

    fn remove(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn restart(&mut self) -> Result<(), DriverError> {
        tracing::info!("Restarting {} over SSH", self.base.machine_name);
        run_ssh_command_from_driver(&*self, "sudo shutdown -r now")?;
        Ok(())
    }

    fn to_raw(&self) -> Result<serde_json::Value, DriverError> {
        encode_state(self)
    }

    fn load_raw(&mut self, raw: &serde_json::Value) -> Result<(), DriverError> {
        *self = decode_state(raw)?;
        Ok(())
    }
}

fn port_option(options: &DriverOptions, name: &str) -> Result<Option<u16>, DriverError> {
    match options.int(name) {
        0 => Ok(None),
        value => u16::try_from(value)
            .map(Some)
            .map_err(|_| DriverError::InvalidConfig(format!("{name} out of range: {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::FlagValue;
    use std::net::TcpListener;
    use tempfile::TempDir;

    fn options(ip: &str) -> DriverOptions {
        let mut options = DriverOptions::new();
        options.set("generic-ip-address", FlagValue::String(ip.to_string()));
        options
    }

    #[test]
    fn test_ip_is_required() {
        let mut driver = GenericDriver::new("box", Path::new("/store"));
        assert!(matches!(
            driver.set_config_from_flags(&DriverOptions::new()),
            Err(DriverError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_defaults_applied() {
        let mut driver = GenericDriver::new("box", Path::new("/store"));
        driver.set_config_from_flags(&options("10.1.2.3")).unwrap();
        assert_eq!(driver.get_ssh_port().unwrap(), 22);
        assert_eq!(driver.get_ssh_username(), "root");
        assert_eq!(driver.get_url().unwrap(), "tcp://10.1.2.3:2376");
        assert_eq!(driver.get_ssh_key_path(), "");
    }

    #[test]
    fn test_port_out_of_range() {
        let mut driver = GenericDriver::new("box", Path::new("/store"));
        let mut options = options("10.1.2.3");
        options.set("generic-ssh-port", FlagValue::Int(70000));
        assert!(driver.set_config_from_flags(&options).is_err());
    }

    #[test]
    fn test_state_from_port_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut driver = GenericDriver::new("box", Path::new("/store"));
        let mut opts = options("127.0.0.1");
        opts.set("generic-ssh-port", FlagValue::Int(i64::from(port)));
        driver.set_config_from_flags(&opts).unwrap();
        assert_eq!(driver.get_state().unwrap(), State::Running);

        drop(listener);
        assert_eq!(driver.get_state().unwrap(), State::Stopped);
    }

    #[test]
    fn test_create_imports_key() {
        let temp = TempDir::new().unwrap();
        let key = temp.path().join("operator_key");
        std::fs::write(&key, "PRIVATE").unwrap();
        std::fs::write(temp.path().join("operator_key.pub"), "PUBLIC").unwrap();

        let store = temp.path().join("store");
        let mut driver = GenericDriver::new("box", &store);
        let mut opts = options("10.1.2.3");
        opts.set(
            "generic-ssh-key",
            FlagValue::String(key.display().to_string()),
        );
        driver.set_config_from_flags(&opts).unwrap();
        driver.pre_create_check().unwrap();
        driver.create().unwrap();

        let imported = store.join("machines/box/id_rsa");
        assert_eq!(std::fs::read_to_string(&imported).unwrap(), "PRIVATE");
        assert!(store.join("machines/box/id_rsa.pub").exists());
        assert_eq!(driver.get_ssh_key_path(), imported.display().to_string());
    }

    #[test]
    fn test_start_not_supported() {
        let mut driver = GenericDriver::new("box", Path::new("/store"));
        assert!(matches!(
            driver.start(),
            Err(DriverError::NotSupported { .. })
        ));
    }
}
