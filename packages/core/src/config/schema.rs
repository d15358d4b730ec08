//! Configuration schema for machina
//!
//! Defines the structure and defaults for the config.json file.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drivers::WaitPolicy;

/// Main configuration structure for machina
///
/// Serialized to/from `~/.config/machina/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Config file version for migrations
    pub version: u32,

    /// Machine store root; the data directory when unset
    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    /// Per-host deadline for `ls` and `active` (default: 10)
    #[serde(default = "default_ls_timeout_secs")]
    pub ls_timeout_secs: u64,

    /// Polls before a state wait gives up (default: 60)
    #[serde(default = "default_state_wait_attempts")]
    pub state_wait_attempts: u32,

    /// Delay between state polls in milliseconds (default: 3000)
    #[serde(default = "default_state_wait_interval_ms")]
    pub state_wait_interval_ms: u64,

    /// SSH connect timeout in seconds (default: 10)
    #[serde(default = "default_ssh_connect_timeout_secs")]
    pub ssh_connect_timeout_secs: u64,

    /// Login attempts before provisioning gives up on SSH; unset retries
    /// until the machine answers
    #[serde(default)]
    pub ssh_wait_attempts: Option<u32>,

    /// Driver used by `create` without `--driver` (default: "qemu")
    #[serde(default = "default_driver")]
    pub default_driver: String,

    /// Variable naming the engine endpoint the shell points at
    /// (default: "CONTAINER_HOST")
    #[serde(default = "default_engine_host_var")]
    pub engine_host_var: String,

    /// Run hypervisor drivers in a child process (default: true)
    ///
    /// Drivers that are not compiled in always run in a child process;
    /// `none` always runs in-process.
    #[serde(default = "default_driver_isolation")]
    pub driver_isolation: bool,
}

fn default_ls_timeout_secs() -> u64 {
    10
}

fn default_state_wait_attempts() -> u32 {
    60
}

fn default_state_wait_interval_ms() -> u64 {
    3000
}

fn default_ssh_connect_timeout_secs() -> u64 {
    10
}

fn default_driver() -> String {
    "qemu".to_string()
}

fn default_engine_host_var() -> String {
    "CONTAINER_HOST".to_string()
}

fn default_driver_isolation() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            storage_path: None,
            ls_timeout_secs: default_ls_timeout_secs(),
            state_wait_attempts: default_state_wait_attempts(),
            state_wait_interval_ms: default_state_wait_interval_ms(),
            ssh_connect_timeout_secs: default_ssh_connect_timeout_secs(),
            ssh_wait_attempts: None,
            default_driver: default_driver(),
            engine_host_var: default_engine_host_var(),
            driver_isolation: default_driver_isolation(),
        }
    }
}

impl Config {
    /// Create a new Config with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ls_timeout(&self) -> Duration {
        Duration::from_secs(self.ls_timeout_secs)
    }

    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_timeout_secs)
    }

    /// Polling used when waiting for a machine to reach a state
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            attempts: self.state_wait_attempts.max(1),
            interval: Duration::from_millis(self.state_wait_interval_ms),
        }
    }

    /// Reject values that would make every command fail
    pub fn validate(&self) -> Result<(), String> {
        if self.ls_timeout_secs == 0 {
            return Err("ls_timeout_secs must be at least 1".to_string());
        }
        if self.state_wait_attempts == 0 {
            return Err("state_wait_attempts must be at least 1".to_string());
        }
        if self.ssh_wait_attempts == Some(0) {
            return Err("ssh_wait_attempts must be at least 1 when set".to_string());
        }
        if self.default_driver.trim().is_empty() {
            return Err("default_driver must not be empty".to_string());
        }
        if self.engine_host_var.trim().is_empty() {
            return Err("engine_host_var must not be empty".to_string());
        }
        Ok(())
    }
}
