//! `inspect` and `ssh-config` commands

use anyhow::Result;

use super::targets::{HostArg, target_name};
use crate::Context;

/// Print the stored record with the live driver state merged in, as JSON
pub fn cmd_inspect(args: &HostArg, ctx: &Context) -> Result<()> {
    let name = target_name(&ctx.client, args.name.as_deref())?;
    let host = ctx.client.load(&name)?;
    let record = host.to_record()?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Print SSH connection flags, one per line
pub fn cmd_ssh_config(args: &HostArg, ctx: &Context) -> Result<()> {
    let name = target_name(&ctx.client, args.name.as_deref())?;
    let host = ctx.client.load(&name)?;
    let driver = host.driver()?;

    let addr = driver.get_ssh_hostname()?;
    let port = driver.get_ssh_port()?;
    println!(
        "{}",
        format_ssh_flags(&driver.get_ssh_username(), &addr, port, &driver.get_ssh_key_path())
    );
    Ok(())
}

/// The engine socket is only reachable as root, so any resolved address
/// gets `root` regardless of the driver's login user
fn format_ssh_flags(user: &str, addr: &str, port: u16, key: &str) -> String {
    let user = if addr.is_empty() { user } else { "root" };
    format!("--username={user}\n--host={addr}\n--port={port}\n--identity-file={key}")
}
