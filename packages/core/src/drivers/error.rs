//! Driver error types

use thiserror::Error;

use crate::plugin::TransportError;
use crate::ssh::SshError;
use crate::state::State;

/// Errors reported by a driver, in-process or through the plugin channel
#[derive(Error, Debug)]
pub enum DriverError {
    /// Canonical "not running" condition; listings treat it as expected
    #[error("Host is not running")]
    HostIsNotRunning,

    /// Driver has no address recorded yet
    #[error("IP address is not set")]
    IpNotSet,

    /// Operation not available for this backend
    #[error("{driver} driver does not support {operation}")]
    NotSupported {
        driver: String,
        operation: &'static str,
    },

    /// Backend never reached the state a wait loop was polling for
    #[error("Maximum number of retries ({attempts}) exceeded: machine did not reach expected state {expected}")]
    StateTimeout { expected: State, attempts: u32 },

    /// Generic polling helper ran out of attempts
    #[error("Maximum number of retries ({0}) exceeded")]
    RetriesExceeded(u32),

    /// Required or malformed driver option
    #[error("Invalid driver configuration: {0}")]
    InvalidConfig(String),

    /// Backend command (qemu, qemu-img, ssh-keygen...) failed
    #[error("{0}")]
    Command(String),

    /// Error reported by a driver running in a plugin process
    #[error("{0}")]
    Remote(String),

    /// The plugin channel itself failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("Failed to decode driver state: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub fn not_supported(driver: &str, operation: &'static str) -> Self {
        DriverError::NotSupported {
            driver: driver.to_string(),
            operation,
        }
    }

    /// True for the canonical not-running error, whichever side of the plugin
    /// boundary produced it.
    pub fn is_not_running(&self) -> bool {
        match self {
            DriverError::HostIsNotRunning => true,
            DriverError::Remote(message) => {
                message == &DriverError::HostIsNotRunning.to_string()
            }
            _ => false,
        }
    }

    /// True when the failure is the transport, not the backend
    pub fn is_transport(&self) -> bool {
        matches!(self, DriverError::Transport(_))
    }
}
