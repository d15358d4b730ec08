//! Restart command implementation
//!
//! Restarts running machines and starts stopped ones.

use anyhow::Result;

use super::targets::{HostsArgs, run_action, with_spinner};
use crate::Context;

/// Restart machines, `default` when none are named
pub fn cmd_restart(args: &HostsArgs, ctx: &Context) -> Result<()> {
    run_action(&ctx.client, &args.names, |client, host| {
        let _lock = client.lock(&host.name)?;
        let name = host.name.clone();
        with_spinner(ctx.quiet, &name, "Restarting", "restarted", || {
            host.restart()?;
            Ok(())
        })?;
        client.save(host)?;
        Ok(())
    })?;

    if !ctx.quiet {
        eprintln!("Restarted machines may have new IP addresses.");
    }
    Ok(())
}
