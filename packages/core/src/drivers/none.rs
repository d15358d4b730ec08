//! Driver for hosts created elsewhere: only an engine URL is known

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{BaseDriver, Driver, DriverError, DriverOptions, Flag, decode_state, encode_state, host_from_url};
use crate::state::State;

pub const DRIVER_NAME: &str = "none";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoneDriver {
    #[serde(flatten)]
    pub base: BaseDriver,
    #[serde(default)]
    pub url: String,
}

impl NoneDriver {
    pub fn new(machine_name: &str, store_path: &Path) -> Self {
        Self {
            base: BaseDriver::new(machine_name, store_path),
            url: String::new(),
        }
    }
}

impl Driver for NoneDriver {
    fn driver_name(&self) -> String {
        DRIVER_NAME.to_string()
    }

    fn machine_name(&self) -> String {
        self.base.machine_name.clone()
    }

    fn create_flags(&self) -> Vec<Flag> {
        vec![Flag::string("url", "URL of host when no driver is selected", "")]
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> Result<(), DriverError> {
        let url = options.string("url");
        if url.is_empty() {
            return Err(DriverError::InvalidConfig(
                "--url option is required when no driver is selected".to_string(),
            ));
        }
        self.base.ip_address = host_from_url(&url).unwrap_or_default();
        self.url = url;
        Ok(())
    }

    fn get_ip(&self) -> Result<String, DriverError> {
        self.base.get_ip()
    }

    fn get_url(&self) -> Result<String, DriverError> {
        Ok(self.url.clone())
    }

    fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        Err(DriverError::not_supported(DRIVER_NAME, "SSH"))
    }

    fn get_ssh_port(&self) -> Result<u16, DriverError> {
        Err(DriverError::not_supported(DRIVER_NAME, "SSH"))
    }

    fn get_ssh_username(&self) -> String {
        self.base.get_ssh_username()
    }

    fn get_ssh_key_path(&self) -> String {
        self.base.get_ssh_key_path()
    }

    fn get_state(&self) -> Result<State, DriverError> {
        Ok(State::Running)
    }

    fn create(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        Err(DriverError::not_supported(DRIVER_NAME, "start"))
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        Err(DriverError::not_supported(DRIVER_NAME, "stop"))
    }

    fn kill(&mut self) -> Result<(), DriverError> {
        Err(DriverError::not_supported(DRIVER_NAME, "kill"))
    }

    fn remove(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn restart(&mut self) -> Result<(), DriverError> {
        Err(DriverError::not_supported(DRIVER_NAME, "restart"))
    }

    fn to_raw(&self) -> Result<serde_json::Value, DriverError> {
        encode_state(self)
    }

    fn load_raw(&mut self, raw: &serde_json::Value) -> Result<(), DriverError> {
        *self = decode_state(raw)?;
        Ok(())
    }
}
