//! `ip` and `url` commands
//!
//! Print one line per machine on stdout so the output can be captured.

use anyhow::Result;

use super::targets::{HostsArgs, run_action};
use crate::Context;

pub fn cmd_ip(args: &HostsArgs, ctx: &Context) -> Result<()> {
    run_action(&ctx.client, &args.names, |_, host| {
        println!("{}", host.ip()?);
        Ok(())
    })
}

pub fn cmd_url(args: &HostsArgs, ctx: &Context) -> Result<()> {
    run_action(&ctx.client, &args.names, |_, host| {
        println!("{}", host.url()?);
        Ok(())
    })
}
