//! Create command implementation
//!
//! Builds a new machine record, creates the backend, and provisions it.
//! Driver-specific settings are passed as `-o name=value`; their names come
//! from the driver's own flag list.

use anyhow::{Context as _, Result, anyhow};
use clap::Args;
use comfy_table::Table;
use console::style;
use machina_core::drivers::{DriverOptions, Flag, FlagValue};
use machina_core::engine::EngineOptions;
use machina_core::environment::ProcessEnvironment;

use super::targets::with_spinner;
use crate::Context;

/// Arguments for the create command
#[derive(Args)]
pub struct CreateArgs {
    /// Machine name
    #[arg(required_unless_present = "driver_options")]
    pub name: Option<String>,

    /// Driver to create the machine with (defaults to `default_driver` from the config)
    #[arg(short, long)]
    pub driver: Option<String>,

    /// Driver option as name=value (repeatable)
    #[arg(short = 'o', long = "driver-opt", value_name = "NAME=VALUE")]
    pub driver_opts: Vec<String>,

    /// Print the options the driver accepts and exit
    #[arg(long)]
    pub driver_options: bool,

    /// Extra flag for the engine (repeatable)
    #[arg(long = "engine-opt")]
    pub engine_opts: Vec<String>,

    /// Environment variable for the engine, as KEY=VALUE (repeatable)
    #[arg(long = "engine-env")]
    pub engine_env: Vec<String>,

    /// Insecure registry for the engine (repeatable)
    #[arg(long = "engine-insecure-registry")]
    pub engine_insecure_registry: Vec<String>,

    /// Registry mirror for the engine (repeatable)
    #[arg(long = "engine-registry-mirror")]
    pub engine_registry_mirror: Vec<String>,

    /// Label for the engine, as key=value (repeatable)
    #[arg(long = "engine-label")]
    pub engine_label: Vec<String>,

    /// Storage driver for the engine
    #[arg(long = "engine-storage-driver", default_value = "")]
    pub engine_storage_driver: String,

    /// Package installed by package-manager based provisioners
    #[arg(long = "engine-install-package", default_value = "podman")]
    pub engine_install_package: String,

    /// Extra subject alternative name for the server certificate (repeatable)
    #[arg(long = "tls-san")]
    pub tls_san: Vec<String>,
}

impl CreateArgs {
    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            arbitrary_flags: self.engine_opts.clone(),
            env: self.engine_env.clone(),
            insecure_registry: self.engine_insecure_registry.clone(),
            labels: self.engine_label.clone(),
            registry_mirror: self.engine_registry_mirror.clone(),
            storage_driver: self.engine_storage_driver.clone(),
            install_package: self.engine_install_package.clone(),
        }
    }
}

/// Create and provision a machine
pub fn cmd_create(args: &CreateArgs, ctx: &Context) -> Result<()> {
    let driver_name = args
        .driver
        .clone()
        .unwrap_or_else(|| ctx.config.default_driver.clone());

    let name = match (&args.name, args.driver_options) {
        (_, true) => return print_driver_options(&driver_name, ctx),
        (Some(name), false) => name.clone(),
        (None, false) => return Err(anyhow!("A machine name is required")),
    };

    let mut host = ctx.client.new_host(&driver_name, &name)?;

    let flags = host.driver()?.create_flags();
    let options = driver_options(&driver_name, &flags, &args.driver_opts)?;
    host.driver_mut()?
        .set_config_from_flags(&options)
        .with_context(|| format!("Invalid options for driver {driver_name}"))?;

    host.host_options.engine = args.engine_options();
    host.host_options.auth.server_cert_sans = args.tls_san.clone();

    let created = with_spinner(ctx.quiet, &name, "Creating", "created", || {
        ctx.client.create(&mut host)?;
        Ok(())
    });

    if let Err(e) = created {
        eprintln!(
            "  {} Remove the partial machine with: {}",
            style("Tip:").cyan(),
            style(format!("machina rm -f {name}")).green()
        );
        return Err(e.context(format!("Error creating machine {name}")));
    }

    if !ctx.quiet {
        println!(
            "{} Machine {} is ready at {}",
            style("Done:").green().bold(),
            style(&name).cyan(),
            style(host.url().unwrap_or_default()).yellow()
        );
    }
    Ok(())
}

/// Seed every driver flag from its default or environment variable, then
/// apply `name=value` overrides
///
/// A bare `name` sets a boolean flag to true.
fn driver_options(driver_name: &str, flags: &[Flag], overrides: &[String]) -> Result<DriverOptions> {
    let mut options = DriverOptions::from_flags(flags, &ProcessEnvironment);
    for raw in overrides {
        let (key, value) = match raw.split_once('=') {
            Some((key, value)) => (key.trim(), value),
            None => (raw.trim(), ""),
        };
        let flag = flags.iter().find(|flag| flag.name == key).ok_or_else(|| {
            anyhow!(
                "Driver {driver_name} has no option '{key}' (see `machina create --driver {driver_name} --driver-options`)"
            )
        })?;
        options.set_from_str(flag, value).map_err(|e| anyhow!(e))?;
    }
    Ok(options)
}

fn print_driver_options(driver_name: &str, ctx: &Context) -> Result<()> {
    let driver = ctx
        .client
        .catalog()
        .new_driver(driver_name, "", ctx.client.store_path())?;

    let mut table = Table::new();
    table.set_header(vec!["Option", "Default", "Environment", "Description"]);
    for flag in driver.create_flags() {
        table.add_row(vec![
            flag.name.clone(),
            format_default(&flag.default),
            flag.env_var.clone().unwrap_or_default(),
            flag.usage.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn format_default(value: &FlagValue) -> String {
    match value {
        FlagValue::Bool(b) => b.to_string(),
        FlagValue::Int(i) => i.to_string(),
        FlagValue::String(s) => s.clone(),
        FlagValue::StringSlice(items) => items.join(","),
    }
}
