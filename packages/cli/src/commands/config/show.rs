//! Config show subcommand
//!
//! Displays current configuration in table or JSON format.

use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use machina_core::environment::ProcessEnvironment;
use machina_core::{Config, config};

/// Show current configuration, plus the store path it resolves to
pub fn cmd_config_show(config: &Config, json: bool, quiet: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Key", "Value"]);
    for (key, value) in rows(config) {
        table.add_row(vec![Cell::new(key), Cell::new(value)]);
    }

    // Effective store path, which may come from the environment
    let store = config::get_storage_path(&ProcessEnvironment, config)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    table.add_row(vec![
        Cell::new("(effective store)").fg(Color::DarkGrey),
        Cell::new(store).fg(Color::DarkGrey),
    ]);

    println!("{table}");

    if !quiet {
        if let Some(path) = config::get_config_path() {
            println!();
            println!("Config file: {}", path.display());
        }
    }
    Ok(())
}

pub(super) fn rows(config: &Config) -> Vec<(&'static str, String)> {
    vec![
        ("version", config.version.to_string()),
        (
            "storage_path",
            config
                .storage_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(default)".to_string()),
        ),
        ("ls_timeout_secs", config.ls_timeout_secs.to_string()),
        ("state_wait_attempts", config.state_wait_attempts.to_string()),
        ("state_wait_interval_ms", config.state_wait_interval_ms.to_string()),
        ("ssh_connect_timeout_secs", config.ssh_connect_timeout_secs.to_string()),
        (
            "ssh_wait_attempts",
            config
                .ssh_wait_attempts
                .map(|n| n.to_string())
                .unwrap_or_else(|| "(unbounded)".to_string()),
        ),
        ("default_driver", config.default_driver.clone()),
        ("engine_host_var", config.engine_host_var.clone()),
        ("driver_isolation", config.driver_isolation.to_string()),
    ]
}
