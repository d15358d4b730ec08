//! CLI command implementations
//!
//! Machine commands resolve their targets through [`targets`]; commands that
//! accept several machines report each failure and keep going.

mod active;
mod address;
mod config;
mod create;
mod inspect;
mod kill;
mod ls;
mod provision;
mod restart;
mod rm;
mod start;
mod status;
mod stop;
mod targets;

pub use active::{ActiveArgs, cmd_active};
pub use address::{cmd_ip, cmd_url};
pub use config::{ConfigArgs, cmd_config};
pub use create::{CreateArgs, cmd_create};
pub use inspect::{cmd_inspect, cmd_ssh_config};
pub use kill::cmd_kill;
pub use ls::{LsArgs, cmd_ls};
pub use provision::{RegenerateCertsArgs, cmd_provision, cmd_regenerate_certs, cmd_upgrade};
pub use restart::cmd_restart;
pub use rm::{RmArgs, cmd_rm};
pub use start::cmd_start;
pub use status::cmd_status;
pub use stop::cmd_stop;
pub use targets::{HostArg, HostsArgs};
