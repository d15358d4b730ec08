//! Out-of-process drivers
//!
//! A driver can run in a child process and be driven over a local socket.
//! The child is the same binary, started with [`PLUGIN_MODE_VAR`] set to `1`
//! and [`PLUGIN_DRIVER_VAR`] naming the driver. It prints
//! `MACHINA_PLUGIN_ADDR=<socket>` on stdout, then serves newline-delimited
//! JSON requests (see [`protocol`]) on that socket.

pub mod client;
mod error;
pub mod factory;
pub mod protocol;
pub mod server;

pub use client::{PluginProcess, RpcDriver};
pub use error::TransportError;
pub use factory::{BuiltinFactory, DriverCatalog, DriverFactory, PluginFactory};

use crate::environment::{Environment, non_empty_var};

pub const PLUGIN_MODE_VAR: &str = "PLUGIN_MODE";
pub const PLUGIN_DRIVER_VAR: &str = "PLUGIN_DRIVER_NAME";
pub const HANDSHAKE_PREFIX: &str = "MACHINA_PLUGIN_ADDR=";

/// Driver to serve when this process was started in plugin mode
///
/// `Some("")` means plugin mode without a driver name, which the server
/// rejects like any other unknown driver.
pub fn plugin_driver_from_env(env: &dyn Environment) -> Option<String> {
    if env.var(PLUGIN_MODE_VAR).as_deref() != Some("1") {
        return None;
    }
    Some(non_empty_var(env, PLUGIN_DRIVER_VAR).unwrap_or_default())
}
