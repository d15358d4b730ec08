//! Config subcommand implementations
//!
//! Provides `machina config` subcommands for viewing configuration.
//! The file itself is edited by hand; see `machina config path`.

mod get;
mod show;

use anyhow::Result;
use clap::{Args, Subcommand};
use machina_core::Config;

pub use get::cmd_config_get;
pub use show::cmd_config_show;

/// Configuration command arguments
#[derive(Args)]
pub struct ConfigArgs {
    /// Output as JSON instead of table format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<ConfigSubcommands>,
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigSubcommands {
    /// Show current configuration
    Show {
        /// Output as JSON instead of table format
        #[arg(long)]
        json: bool,
    },
    /// Get a single configuration value
    Get {
        /// Configuration key (e.g., "ls_timeout_secs", "default_driver")
        key: String,
    },
    /// Print the path of the config file
    Path,
}

/// Handle config command
///
/// If no subcommand is given, defaults to Show.
pub fn cmd_config(args: ConfigArgs, config: &Config, quiet: bool) -> Result<()> {
    match args.command {
        Some(ConfigSubcommands::Show { json }) => cmd_config_show(config, json || args.json, quiet),
        Some(ConfigSubcommands::Get { key }) => cmd_config_get(config, &key),
        Some(ConfigSubcommands::Path) => {
            let path = machina_core::config::get_config_path()
                .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;
            println!("{}", path.display());
            Ok(())
        }
        None => cmd_config_show(config, args.json, quiet),
    }
}
