//! Provisioning error types

use std::path::PathBuf;

use thiserror::Error;

use crate::cert::CertError;
use crate::drivers::DriverError;
use crate::ssh::SshError;

/// Errors from a provisioning run
///
/// Every step propagates its underlying failure unchanged; the run stops at
/// the first one.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Cert(#[from] CertError),

    /// /etc/os-release missing or without an ID
    #[error("Could not detect OS: {0}")]
    OsRelease(String),

    #[error("No provisioner found for OS '{0}'")]
    NoCompatibleProvisioner(String),

    #[error("Container engine did not become available: {0}")]
    EngineUnavailable(String),

    #[error("Copying {} to machine dir failed: {source}", path.display())]
    CopyCert {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
