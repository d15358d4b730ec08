//! machina-core - Core library for machina
//!
//! This library provides the machine drivers, the driver plugin transport,
//! guest provisioning, TLS bootstrap and the host store used by the CLI.

pub mod api;
pub mod auth;
pub mod cert;
pub mod config;
pub mod drivers;
pub mod engine;
pub mod environment;
pub mod host;
pub mod list;
pub mod plugin;
pub mod process;
pub mod provision;
pub mod ssh;
pub mod state;
pub mod version;

// Re-export the types most commands need
pub use api::{Client, validate_host_name};
pub use config::{Config, load_config, save_config};
pub use drivers::{Driver, DriverError, DriverOptions, WaitPolicy};
pub use host::{Filestore, Host, HostError, HostStore};
pub use list::{HostListItem, ListContext, ListError, get_host_list_items};
pub use state::State;
pub use version::{CONFIG_VERSION, get_version, get_version_long};
