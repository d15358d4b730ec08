//! Provision, upgrade and regenerate-certs commands
//!
//! All three talk to the guest over SSH and rewrite the stored record.

use anyhow::Result;
use clap::Args;
use console::style;
use dialoguer::Confirm;

use super::targets::{HostsArgs, run_action, with_spinner};
use crate::Context;

/// Arguments for the regenerate-certs command
#[derive(Args)]
pub struct RegenerateCertsArgs {
    /// Machine names (defaults to "default")
    pub names: Vec<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub force: bool,

    /// Also regenerate the CA and client certificates
    #[arg(long)]
    pub client_certs: bool,
}

/// Re-run the provisioner on machines
pub fn cmd_provision(args: &HostsArgs, ctx: &Context) -> Result<()> {
    run_action(&ctx.client, &args.names, |client, host| {
        let _lock = client.lock(&host.name)?;
        let name = host.name.clone();
        with_spinner(ctx.quiet, &name, "Provisioning", "provisioned", || {
            client.provision(host)?;
            Ok(())
        })
    })
}

/// Upgrade the engine on machines to the latest version
pub fn cmd_upgrade(args: &HostsArgs, ctx: &Context) -> Result<()> {
    run_action(&ctx.client, &args.names, |client, host| {
        let name = host.name.clone();
        with_spinner(ctx.quiet, &name, "Upgrading", "upgraded", || {
            client.upgrade(host)?;
            Ok(())
        })
    })
}

/// Issue new server certificates and restart the engine
pub fn cmd_regenerate_certs(args: &RegenerateCertsArgs, ctx: &Context) -> Result<()> {
    if !args.force {
        let proceed = Confirm::new()
            .with_prompt("Regenerate TLS machine certs?  Warning: this is irreversible.")
            .default(false)
            .interact()?;
        if !proceed {
            return Ok(());
        }
    }

    if args.client_certs && !ctx.quiet {
        eprintln!(
            "{} The CA is regenerated too: every machine signed by the old CA needs new certs.",
            style("Warning:").yellow().bold()
        );
    }

    run_action(&ctx.client, &args.names, |client, host| {
        let name = host.name.clone();
        with_spinner(ctx.quiet, &name, "Regenerating certificates for", "certificates regenerated", || {
            client.regenerate_certs(host, args.client_certs)?;
            Ok(())
        })
    })
}
