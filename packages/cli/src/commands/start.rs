//! Start command implementation
//!
//! Starts one or more machines and waits for them to report Running.

use anyhow::Result;

use super::targets::{HostsArgs, run_action, with_spinner};
use crate::Context;

/// Start machines, `default` when none are named
pub fn cmd_start(args: &HostsArgs, ctx: &Context) -> Result<()> {
    run_action(&ctx.client, &args.names, |client, host| {
        let _lock = client.lock(&host.name)?;
        let name = host.name.clone();
        with_spinner(ctx.quiet, &name, "Starting", "started", || {
            host.start()?;
            Ok(())
        })?;
        client.save(host)?;
        Ok(())
    })?;

    if !ctx.quiet {
        eprintln!("Started machines may have new IP addresses.");
    }
    Ok(())
}
