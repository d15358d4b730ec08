//! Host-specific error types
//!
//! Errors that can occur while loading, saving or operating on a host.

use thiserror::Error;

use crate::cert::CertError;
use crate::drivers::DriverError;
use crate::provision::ProvisionError;

/// Errors that can occur during host operations
#[derive(Error, Debug)]
pub enum HostError {
    /// No record for this name in the store
    #[error("Host does not exist: {0:?}")]
    NotFound(String),

    /// A record with this name is already present
    #[error("Host already exists: {0:?}")]
    AlreadyExists(String),

    /// Record present but unreadable or undecodable
    #[error("Failed to load host {name:?}: {message}")]
    LoadFailed { name: String, message: String },

    /// Record could not be written
    #[error("Failed to save host {name:?}: {message}")]
    SaveFailed { name: String, message: String },

    /// Record written by a newer client
    #[error(
        "Config version {version} of host {name:?} is from the future -- you should upgrade your machina client"
    )]
    ConfigFromFuture { name: String, version: u32 },

    /// Name does not fit the allowed pattern
    #[error("Invalid host name {0:?}: names must start with a letter or digit and contain only letters, digits, dots and dashes")]
    InvalidName(String),

    /// Driver payload has not been decoded into a live driver yet
    #[error("Driver for host {0:?} is not loaded")]
    DriverNotLoaded(String),

    /// Operation needs a running machine
    #[error("Host {0:?} must be running for this operation")]
    NotRunning(String),

    /// Another process holds the host lock
    #[error("Host {name:?} is locked by another machina process (PID: {pid})")]
    Locked { name: String, pid: u32 },

    /// The lock file could not be managed
    #[error("Failed to lock host {name:?}: {message}")]
    LockFailed { name: String, message: String },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Cert(#[from] CertError),
}

impl HostError {
    /// True for the canonical driver "not running" condition
    pub fn is_not_running(&self) -> bool {
        matches!(self, HostError::Driver(e) if e.is_not_running())
    }
}
