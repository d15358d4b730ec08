//! Kill command implementation

use anyhow::Result;

use super::targets::{HostsArgs, run_action, with_spinner};
use crate::Context;

/// Force-stop machines without a guest shutdown
pub fn cmd_kill(args: &HostsArgs, ctx: &Context) -> Result<()> {
    run_action(&ctx.client, &args.names, |client, host| {
        let _lock = client.lock(&host.name)?;
        let name = host.name.clone();
        with_spinner(ctx.quiet, &name, "Killing", "killed", || {
            host.kill()?;
            Ok(())
        })?;
        client.save(host)?;
        Ok(())
    })
}
