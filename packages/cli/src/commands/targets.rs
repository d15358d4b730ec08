//! Host selection and per-host fan-out shared by the machine commands

use std::fmt;

use anyhow::Result;
use clap::Args;
use console::style;
use machina_core::{Client, Host, HostStore};

use crate::output::CommandSpinner;

/// Host targeted when a command gets no machine names
pub const DEFAULT_MACHINE_NAME: &str = "default";

/// Arguments for commands acting on one or more machines
#[derive(Args)]
pub struct HostsArgs {
    /// Machine names (defaults to "default")
    pub names: Vec<String>,
}

/// Arguments for commands acting on exactly one machine
#[derive(Args)]
pub struct HostArg {
    /// Machine name (defaults to "default")
    pub name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("No machine name(s) specified and no \"default\" machine exists")]
pub struct NoDefaultHost;

/// Some hosts of a multi-host command failed; each was already reported
#[derive(Debug)]
pub struct ActionFailed {
    pub failed: Vec<String>,
    pub total: usize,
}

impl fmt::Display for ActionFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} machine(s) failed: {}",
            self.failed.len(),
            self.total,
            self.failed.join(", ")
        )
    }
}

impl std::error::Error for ActionFailed {}

/// Names given on the command line, or `default` if it exists
pub fn target_names(client: &Client, names: &[String]) -> Result<Vec<String>> {
    if !names.is_empty() {
        return Ok(names.to_vec());
    }
    if client.store().exists(DEFAULT_MACHINE_NAME)? {
        return Ok(vec![DEFAULT_MACHINE_NAME.to_string()]);
    }
    Err(NoDefaultHost.into())
}

/// Resolve a single optional name the same way
pub fn target_name(client: &Client, name: Option<&str>) -> Result<String> {
    let names: Vec<String> = name.map(str::to_string).into_iter().collect();
    let mut targets = target_names(client, &names)?;
    Ok(targets.remove(0))
}

/// Load each target and run `action` on it
///
/// A failing host is reported on stderr and the remaining hosts still run;
/// the combined failure is returned at the end.
pub fn run_action<F>(client: &Client, names: &[String], mut action: F) -> Result<()>
where
    F: FnMut(&Client, &mut Host) -> Result<()>,
{
    let targets = target_names(client, names)?;
    let mut failed = Vec::new();

    for name in &targets {
        let outcome = client
            .load(name)
            .map_err(anyhow::Error::from)
            .and_then(|mut host| action(client, &mut host));
        if let Err(e) = outcome {
            eprintln!("{} {}: {:#}", style("Error").red().bold(), name, e);
            failed.push(name.clone());
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(ActionFailed {
            failed,
            total: targets.len(),
        }
        .into())
    }
}

/// Run `work` behind a spinner labelled with the host name
pub fn with_spinner<T>(
    quiet: bool,
    name: &str,
    doing: &str,
    done: &str,
    work: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let spinner = CommandSpinner::new_maybe(&format!("{doing} {name}..."), quiet);
    match work() {
        Ok(value) => {
            spinner.success(&format!("{name}: {done}"));
            Ok(value)
        }
        Err(e) => {
            spinner.fail(&format!("{name}: failed"));
            Err(e)
        }
    }
}
