//! Remove command implementation
//!
//! Deletes the backend and the local record of one or more machines.

use anyhow::{Result, bail};
use clap::Args;
use console::style;
use dialoguer::Confirm;

use super::targets::{ActionFailed, with_spinner};
use crate::Context;

/// Arguments for the rm command
#[derive(Args)]
pub struct RmArgs {
    /// Machine names
    pub names: Vec<String>,

    /// Remove the local record even if the backend cannot be removed; implies -y
    #[arg(short, long)]
    pub force: bool,

    /// Assume yes to the confirmation prompt
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,
}

pub fn cmd_rm(args: &RmArgs, ctx: &Context) -> Result<()> {
    if args.names.is_empty() {
        bail!("Expected one or more machine names as arguments");
    }

    if !args.yes && !args.force {
        println!("About to remove {}", style(args.names.join(", ")).cyan());
        println!(
            "{} This action will delete both local reference and remote instance.",
            style("WARNING:").yellow().bold()
        );
        let confirmed = Confirm::new()
            .with_prompt("Are you sure?")
            .default(false)
            .interact()?;
        if !confirmed {
            return Ok(());
        }
    }

    let mut failed = Vec::new();
    for name in &args.names {
        let removed = with_spinner(ctx.quiet, name, "Removing", "removed", || {
            ctx.client.remove(name, args.force)?;
            Ok(())
        });
        if let Err(e) = removed {
            eprintln!("{} {}: {:#}", style("Error").red().bold(), name, e);
            failed.push(name.clone());
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(ActionFailed {
            failed,
            total: args.names.len(),
        }
        .into())
    }
}
