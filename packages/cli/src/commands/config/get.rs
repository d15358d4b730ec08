//! Config get subcommand
//!
//! Retrieves a single configuration value by key.

use anyhow::{Result, bail};
use machina_core::Config;

use super::show::rows;

/// Print one value, unformatted, for scripting
pub fn cmd_config_get(config: &Config, key: &str) -> Result<()> {
    println!("{}", lookup(config, key)?);
    Ok(())
}

fn lookup(config: &Config, key: &str) -> Result<String> {
    let wanted = key.to_lowercase();
    let rows = rows(config);
    match rows.iter().find(|(name, _)| *name == wanted) {
        Some((_, value)) => Ok(value.clone()),
        None => {
            let valid: Vec<&str> = rows.iter().map(|(name, _)| *name).collect();
            bail!(
                "Unknown configuration key: {key}\n\nValid keys:\n  {}",
                valid.join("\n  ")
            )
        }
    }
}
