//! Scripted driver for unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Driver, DriverError, DriverOptions, Flag};
use crate::state::State;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FakeDriver {
    pub machine_name: String,
    pub state: State,
    pub ip: String,
    pub url: String,
    #[serde(skip)]
    pub url_error: Option<String>,
    #[serde(skip)]
    pub state_error: Option<String>,
    #[serde(skip)]
    pub not_running_error: bool,
    #[serde(skip)]
    pub delay: Option<Duration>,
    #[serde(skip)]
    pub state_calls: Arc<AtomicUsize>,
    #[serde(skip)]
    pub plugin_pid: Option<u32>,
}

impl FakeDriver {
    pub fn new(machine_name: &str) -> Self {
        Self {
            machine_name: machine_name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip = ip.to_string();
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn with_url_error(mut self, message: &str) -> Self {
        self.url_error = Some(message.to_string());
        self
    }

    pub fn with_state_error(mut self, message: &str) -> Self {
        self.state_error = Some(message.to_string());
        self
    }

    /// URL lookup fails with the canonical not-running error
    pub fn not_running(mut self) -> Self {
        self.not_running_error = true;
        self.state = State::Stopped;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Pretend `pid` is the plugin child serving this driver
    pub fn with_plugin_pid(mut self, pid: u32) -> Self {
        self.plugin_pid = Some(pid);
        self
    }

    fn pause(&self) {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
    }
}

impl Driver for FakeDriver {
    fn driver_name(&self) -> String {
        "fake".to_string()
    }

    fn machine_name(&self) -> String {
        self.machine_name.clone()
    }

    fn create_flags(&self) -> Vec<Flag> {
        vec![Flag::string("fake-url", "URL to report", "")]
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> Result<(), DriverError> {
        self.url = options.string("fake-url");
        Ok(())
    }

    fn get_ip(&self) -> Result<String, DriverError> {
        if self.ip.is_empty() {
            return Err(DriverError::IpNotSet);
        }
        Ok(self.ip.clone())
    }

    fn get_url(&self) -> Result<String, DriverError> {
        self.pause();
        if self.not_running_error {
            return Err(DriverError::HostIsNotRunning);
        }
        if let Some(message) = &self.url_error {
            return Err(DriverError::Command(message.clone()));
        }
        Ok(self.url.clone())
    }

    fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        self.get_ip()
    }

    fn get_ssh_port(&self) -> Result<u16, DriverError> {
        Ok(22)
    }

    fn get_ssh_username(&self) -> String {
        "root".to_string()
    }

    fn get_ssh_key_path(&self) -> String {
        String::new()
    }

    fn get_state(&self) -> Result<State, DriverError> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        self.pause();
        if let Some(message) = &self.state_error {
            return Err(DriverError::Command(message.clone()));
        }
        Ok(self.state)
    }

    fn create(&mut self) -> Result<(), DriverError> {
        self.state = State::Running;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.state = State::Running;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.state = State::Stopped;
        Ok(())
    }

    fn kill(&mut self) -> Result<(), DriverError> {
        self.state = State::Stopped;
        Ok(())
    }

    fn remove(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn restart(&mut self) -> Result<(), DriverError> {
        self.state = State::Running;
        Ok(())
    }

    fn to_raw(&self) -> Result<serde_json::Value, DriverError> {
        serde_json::to_value(self).map_err(|e| DriverError::Decode(e.to_string()))
    }

    fn plugin_pid(&self) -> Option<u32> {
        self.plugin_pid
    }

    fn load_raw(&mut self, raw: &serde_json::Value) -> Result<(), DriverError> {
        *self = serde_json::from_value(raw.clone()).map_err(|e| DriverError::Decode(e.to_string()))?;
        Ok(())
    }
}
