//! machina CLI - Create and manage podman virtual machines
//!
//! This module contains the shared CLI implementation used by the binary.

mod commands;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use console::style;
use machina_core::environment::ProcessEnvironment;
use machina_core::plugin::{DriverCatalog, PluginFactory};
use machina_core::ssh::ExternalConnector;
use machina_core::{Client, Config, config, get_version, load_config};
use tracing_subscriber::EnvFilter;

/// Create and manage podman virtual machines
#[derive(Parser)]
#[command(name = "machina")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Create and manage podman virtual machines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Increase verbosity level
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Machine store root (overrides MACHINA_STORAGE_PATH and the config file)
    #[arg(short = 's', long, global = true)]
    storage_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a machine
    Create(commands::CreateArgs),
    /// Re-provision existing machines
    Provision(commands::HostsArgs),
    /// Start machines
    Start(commands::HostsArgs),
    /// Stop machines
    Stop(commands::HostsArgs),
    /// Kill (abruptly force stop) machines
    Kill(commands::HostsArgs),
    /// Restart machines
    Restart(commands::HostsArgs),
    /// Remove machines
    Rm(commands::RmArgs),
    /// List machines
    Ls(commands::LsArgs),
    /// Print which machine is active
    Active(commands::ActiveArgs),
    /// Get the IP address of machines
    Ip(commands::HostsArgs),
    /// Get the URL of machines
    Url(commands::HostsArgs),
    /// Inspect information about a machine
    Inspect(commands::HostArg),
    /// Get the status of a machine
    Status(commands::HostArg),
    /// Print the SSH connection flags for a machine
    SshConfig(commands::HostArg),
    /// Upgrade podman on machines
    Upgrade(commands::HostsArgs),
    /// Regenerate TLS certificates for machines
    RegenerateCerts(commands::RegenerateCertsArgs),
    /// Show machina configuration
    Config(commands::ConfigArgs),
    /// Show version and build information
    Version,
}

/// What every command gets: loaded config, a client over the machine store,
/// and output preferences
pub(crate) struct Context {
    pub config: Config,
    pub client: Client,
    pub quiet: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    // Configure color output
    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Load config (creates default if missing)
    let config_path = config::get_config_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;

    let config = match load_config() {
        Ok(config) => {
            tracing::debug!("Config loaded from: {}", config_path.display());
            config
        }
        Err(e) => {
            // Display rich error for invalid config
            eprintln!("{} Configuration error", style("Error:").red().bold());
            eprintln!();
            eprintln!("  {:#}", e);
            eprintln!();
            eprintln!("  Config file: {}", style(config_path.display()).yellow());
            eprintln!();
            eprintln!(
                "  {} Check the config file for syntax errors or unknown fields.",
                style("Tip:").cyan()
            );
            std::process::exit(1);
        }
    };

    let Some(command) = cli.command else {
        // No command - show a welcome message and hint to use --help
        if !cli.quiet {
            println!(
                "{} {}",
                style("machina").cyan().bold(),
                style(get_version()).dim()
            );
            println!();
            println!("Run {} for available commands.", style("--help").green());
        }
        return Ok(());
    };

    if let Commands::Version = command {
        println!("machina {}", machina_core::get_version_long());
        return Ok(());
    }
    if let Commands::Config(args) = command {
        return commands::cmd_config(args, &config, cli.quiet);
    }

    let client = build_client(&config, cli.storage_path)?;
    tracing::debug!("Machine store: {}", client.store_path().display());
    let ctx = Context {
        config,
        client,
        quiet: cli.quiet,
    };

    match command {
        Commands::Create(args) => commands::cmd_create(&args, &ctx),
        Commands::Provision(args) => commands::cmd_provision(&args, &ctx),
        Commands::Start(args) => commands::cmd_start(&args, &ctx),
        Commands::Stop(args) => commands::cmd_stop(&args, &ctx),
        Commands::Kill(args) => commands::cmd_kill(&args, &ctx),
        Commands::Restart(args) => commands::cmd_restart(&args, &ctx),
        Commands::Rm(args) => commands::cmd_rm(&args, &ctx),
        Commands::Ls(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::cmd_ls(&args, &ctx))
        }
        Commands::Active(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::cmd_active(&args, &ctx))
        }
        Commands::Ip(args) => commands::cmd_ip(&args, &ctx),
        Commands::Url(args) => commands::cmd_url(&args, &ctx),
        Commands::Inspect(args) => commands::cmd_inspect(&args, &ctx),
        Commands::Status(args) => commands::cmd_status(&args, &ctx),
        Commands::SshConfig(args) => commands::cmd_ssh_config(&args, &ctx),
        Commands::Upgrade(args) => commands::cmd_upgrade(&args, &ctx),
        Commands::RegenerateCerts(args) => commands::cmd_regenerate_certs(&args, &ctx),
        Commands::Config(_) | Commands::Version => Ok(()),
    }
}

/// Serve a driver over the plugin channel instead of running the CLI
///
/// Returns the process exit code.
pub fn run_plugin(driver_name: &str) -> i32 {
    init_tracing(0);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            return 1;
        }
    };

    match rt.block_on(machina_core::plugin::server::run(
        driver_name,
        machina_core::plugin::server::ACCEPT_TIMEOUT,
    )) {
        Ok(()) => 0,
        Err(e) => {
            // The parent recognises this line on our stderr
            eprintln!("{e}");
            1
        }
    }
}

/// Log to stderr; stdout carries command output and the plugin handshake
fn init_tracing(verbose: u8) {
    let default_directive = if verbose > 0 { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

fn build_client(config: &Config, storage_override: Option<PathBuf>) -> Result<Client> {
    let store_path = match storage_override {
        Some(path) => path,
        None => config::get_storage_path(&ProcessEnvironment, config)
            .ok_or_else(|| anyhow::anyhow!("Could not determine machine store directory"))?,
    };

    let plugins = PluginFactory::current_exe().context("Failed to set up driver plugins")?;
    let catalog = DriverCatalog::with_plugins(Arc::new(plugins), config.driver_isolation);
    let connector = ExternalConnector {
        connect_timeout: config.ssh_connect_timeout(),
    };

    Ok(Client::new(store_path, catalog)
        .with_connector(Arc::new(connector))
        .with_wait(config.wait_policy())
        .with_ssh_attempts(config.ssh_wait_attempts))
}
