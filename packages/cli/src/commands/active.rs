//! Active command implementation
//!
//! Prints the machine the engine endpoint variable points at.

use anyhow::Result;
use clap::Args;
use machina_core::environment::ProcessEnvironment;
use machina_core::list::{self, ListContext};

use crate::Context;

/// Arguments for the active command
#[derive(Args)]
pub struct ActiveArgs {
    /// Per-machine timeout in seconds (defaults to `ls_timeout_secs` from the config)
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

pub async fn cmd_active(args: &ActiveArgs, ctx: &Context) -> Result<()> {
    let (hosts, hosts_in_error) = ctx.client.load_all_stored()?;
    let timeout = args
        .timeout
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| ctx.config.ls_timeout());
    let list_ctx = ListContext::from_env(&ProcessEnvironment, &ctx.config.engine_host_var, timeout)
        .with_decoder(ctx.client.decoder());

    let items = list::get_host_list_items(hosts, hosts_in_error, &list_ctx).await;
    let active = list::active_host(&items)?;
    println!("{}", active.name);
    Ok(())
}
