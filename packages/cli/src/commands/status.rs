//! Status command implementation

use anyhow::Result;

use super::targets::{HostArg, target_name};
use crate::Context;
use crate::output::state_style;

/// Print the machine's state as the driver reports it
pub fn cmd_status(args: &HostArg, ctx: &Context) -> Result<()> {
    let name = target_name(&ctx.client, args.name.as_deref())?;
    let host = ctx.client.load(&name)?;
    let state = host.state()?;
    println!("{}", state_style(state));
    Ok(())
}
