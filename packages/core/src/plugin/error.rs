//! Plugin channel errors

use thiserror::Error;

/// Failures of the plugin process or its channel, as opposed to errors the
/// driver inside the plugin reported
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to start plugin for driver {driver}: {message}")]
    Spawn { driver: String, message: String },

    #[error("Plugin handshake failed: {0}")]
    Handshake(String),

    /// The plugin exited or closed the channel; every later call fails too
    #[error("Connection to plugin lost: {0}")]
    ConnectionLost(String),

    #[error("Unsupported driver: {0}")]
    UnknownDriver(String),

    #[error("Plugin protocol error: {0}")]
    Protocol(String),
}
