//! Stop command implementation
//!
//! Stops one or more machines gracefully.

use anyhow::Result;

use super::targets::{HostsArgs, run_action, with_spinner};
use crate::Context;

/// Stop machines, `default` when none are named
pub fn cmd_stop(args: &HostsArgs, ctx: &Context) -> Result<()> {
    run_action(&ctx.client, &args.names, |client, host| {
        let _lock = client.lock(&host.name)?;
        let name = host.name.clone();
        with_spinner(ctx.quiet, &name, "Stopping", "stopped", || {
            host.stop()?;
            Ok(())
        })?;
        client.save(host)?;
        Ok(())
    })
}
