//! machina CLI entry point
//!
//! The same binary doubles as the driver plugin server: when started with
//! the plugin environment set, it serves one driver and never parses
//! command-line arguments.

use console::style;
use machina_core::environment::ProcessEnvironment;
use machina_core::plugin::plugin_driver_from_env;

fn main() {
    if let Some(driver_name) = plugin_driver_from_env(&ProcessEnvironment) {
        std::process::exit(machina::run_plugin(&driver_name));
    }

    if let Err(e) = machina::run() {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}
