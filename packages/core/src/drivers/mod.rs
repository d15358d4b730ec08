//! Driver abstraction
//!
//! A [`Driver`] implements the VM lifecycle for one backend. Built-in drivers
//! live in this module; any of them can also be served from a plugin process
//! (see [`crate::plugin`]), in which case callers hold an RPC proxy that
//! implements the same trait.

pub mod base;
mod error;
pub mod generic;
pub mod image;
pub mod none;
pub mod options;
pub mod qemu;

#[cfg(test)]
pub(crate) mod fake;

use std::path::Path;
use std::time::Duration;

pub use base::BaseDriver;
pub use error::DriverError;
pub use options::{DriverOptions, Flag, FlagValue};

use crate::state::State;

/// Lifecycle operations for one backend variant
///
/// Methods other than the flag accessors are only meaningful after
/// `set_config_from_flags` (or `load_raw`) populated the backend fields.
/// `get_state` must return in bounded time.
pub trait Driver: Send + Sync {
    fn driver_name(&self) -> String;

    fn machine_name(&self) -> String;

    fn create_flags(&self) -> Vec<Flag>;

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> Result<(), DriverError>;

    fn get_ip(&self) -> Result<String, DriverError>;

    /// Engine endpoint, or an empty string when there is none yet
    fn get_url(&self) -> Result<String, DriverError>;

    fn get_ssh_hostname(&self) -> Result<String, DriverError>;

    fn get_ssh_port(&self) -> Result<u16, DriverError>;

    fn get_ssh_username(&self) -> String;

    fn get_ssh_key_path(&self) -> String;

    fn get_state(&self) -> Result<State, DriverError>;

    fn pre_create_check(&self) -> Result<(), DriverError> {
        Ok(())
    }

    fn create(&mut self) -> Result<(), DriverError>;

    fn start(&mut self) -> Result<(), DriverError>;

    fn stop(&mut self) -> Result<(), DriverError>;

    fn kill(&mut self) -> Result<(), DriverError>;

    fn remove(&mut self) -> Result<(), DriverError>;

    fn restart(&mut self) -> Result<(), DriverError>;

    /// Serialise backend state for the host record
    fn to_raw(&self) -> Result<serde_json::Value, DriverError>;

    /// Replace backend state from a host record payload
    fn load_raw(&mut self, raw: &serde_json::Value) -> Result<(), DriverError>;

    /// Child process serving this driver, for drivers living in a plugin
    fn plugin_pid(&self) -> Option<u32> {
        None
    }
}

/// Names of the drivers compiled into this binary
pub const BUILTIN_DRIVERS: [&str; 3] = [none::DRIVER_NAME, generic::DRIVER_NAME, qemu::DRIVER_NAME];

/// Construct a compiled-in driver by name, unconfigured
pub fn new_builtin(
    driver_name: &str,
    machine_name: &str,
    store_path: &Path,
) -> Option<Box<dyn Driver>> {
    match driver_name {
        none::DRIVER_NAME => Some(Box::new(none::NoneDriver::new(machine_name, store_path))),
        generic::DRIVER_NAME => Some(Box::new(generic::GenericDriver::new(
            machine_name,
            store_path,
        ))),
        qemu::DRIVER_NAME => Some(Box::new(qemu::QemuDriver::new(machine_name, store_path))),
        _ => None,
    }
}

pub(crate) fn encode_state<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, DriverError> {
    serde_json::to_value(value).map_err(|e| DriverError::Decode(e.to_string()))
}

pub(crate) fn decode_state<T: serde::de::DeserializeOwned>(
    raw: &serde_json::Value,
) -> Result<T, DriverError> {
    serde_json::from_value(raw.clone()).map_err(|e| DriverError::Decode(e.to_string()))
}

/// Host part of an endpoint URL such as `tcp://10.0.0.5:2376`
pub fn host_from_url(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or_default();
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or_default()
    } else {
        authority.split(':').next().unwrap_or_default()
    };
    (!host.is_empty()).then(|| host.to_string())
}

/// Bounded polling parameters for state waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            attempts: 60,
            interval: Duration::from_secs(3),
        }
    }
}

/// Poll `predicate` until it returns true or the attempts run out
pub fn wait_for<F>(mut predicate: F, policy: WaitPolicy) -> Result<(), DriverError>
where
    F: FnMut() -> bool,
{
    for attempt in 0..policy.attempts {
        if predicate() {
            return Ok(());
        }
        if attempt + 1 < policy.attempts {
            std::thread::sleep(policy.interval);
        }
    }
    Err(DriverError::RetriesExceeded(policy.attempts))
}

/// Poll `get_state` until the driver reports `desired`
///
/// State errors count as "not there yet"; only exhausting the attempts fails.
pub fn wait_for_state(
    driver: &dyn Driver,
    desired: State,
    policy: WaitPolicy,
) -> Result<(), DriverError> {
    let reached = wait_for(
        || match driver.get_state() {
            Ok(state) => state == desired,
            Err(e) => {
                tracing::debug!("Error getting machine state: {}", e);
                false
            }
        },
        policy,
    );
    reached.map_err(|_| DriverError::StateTimeout {
        expected: desired,
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fake::FakeDriver;

    fn quick(attempts: u32) -> WaitPolicy {
        WaitPolicy {
            attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_wait_for_succeeds_eventually() {
        let mut calls = 0;
        let result = wait_for(
            || {
                calls += 1;
                calls == 3
            },
            quick(5),
        );
        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_wait_for_exhausts() {
        let result = wait_for(|| false, quick(4));
        assert!(matches!(result, Err(DriverError::RetriesExceeded(4))));
    }

    #[test]
    fn test_wait_for_state_reports_expected_state() {
        let driver = FakeDriver::new("vm1").with_state(State::Stopped);
        let err = wait_for_state(&driver, State::Running, quick(2)).unwrap_err();
        assert!(matches!(
            err,
            DriverError::StateTimeout {
                expected: State::Running,
                attempts: 2
            }
        ));
    }

    #[test]
    fn test_host_from_url() {
        assert_eq!(host_from_url("tcp://10.0.0.5:2376").as_deref(), Some("10.0.0.5"));
        assert_eq!(host_from_url("ssh://core@example.com/run").as_deref(), Some("example.com"));
        assert_eq!(host_from_url("tcp://[fe80::1]:2376").as_deref(), Some("fe80::1"));
        assert_eq!(host_from_url("").as_deref(), None);
    }

    #[test]
    fn test_new_builtin_knows_compiled_drivers() {
        for name in BUILTIN_DRIVERS {
            let driver = new_builtin(name, "vm1", Path::new("/tmp/store")).unwrap();
            assert_eq!(driver.driver_name(), name);
            assert_eq!(driver.machine_name(), "vm1");
        }
        assert!(new_builtin("virtualbox", "vm1", Path::new("/tmp/store")).is_none());
    }
}
