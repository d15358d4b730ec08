//! Concurrent status listing
//!
//! Every host is queried on its own thread and raced against a per-host
//! timeout. Answers are merged with the hosts that failed to load and sorted
//! by name, so the output order never depends on which host answered first.

mod filter;
mod sort;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use futures_util::future;
use thiserror::Error;
use tokio::sync::oneshot;

pub use filter::{FilterOptions, filter_hosts, parse_filters};
pub use sort::natural_cmp;

use crate::engine::EngineOptions;
use crate::environment::{Environment, non_empty_var};
use crate::host::{Host, HostError};
use crate::plugin::DriverCatalog;
use crate::process::signal_process;
use crate::state::State;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Driver column for records that could not be loaded
pub const NOT_FOUND_DRIVER: &str = "not found";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListError {
    #[error("No active host found")]
    NoActiveHost,

    #[error("Error getting active host: timeout")]
    ActiveHostTimeout,

    #[error("Unsupported filter syntax: {0:?}")]
    FilterSyntax(String),

    #[error("Unsupported filter key '{0}'")]
    UnsupportedFilterKey(String),

    #[error("Invalid name filter {pattern:?}: {message}")]
    InvalidNamePattern { pattern: String, message: String },
}

/// One row of a listing
#[derive(Debug, Clone, PartialEq)]
pub struct HostListItem {
    pub name: String,
    pub active: bool,
    pub driver_name: String,
    pub state: State,
    pub url: String,
    pub engine_options: Option<EngineOptions>,
    pub error: String,
    pub response_time: Duration,
}

impl HostListItem {
    /// `*` for the active host, `-` otherwise
    pub fn active_marker(&self) -> &'static str {
        if self.active { "*" } else { "-" }
    }

    fn timed_out(name: String, driver_name: String, timeout: Duration) -> Self {
        Self {
            name,
            active: false,
            driver_name,
            state: State::Timeout,
            url: String::new(),
            engine_options: None,
            error: String::new(),
            response_time: timeout,
        }
    }

    fn in_error(name: String, err: &HostError) -> Self {
        Self {
            name,
            active: false,
            driver_name: NOT_FOUND_DRIVER.to_string(),
            state: State::Error,
            url: String::new(),
            engine_options: None,
            error: flatten(&err.to_string()),
            response_time: Duration::ZERO,
        }
    }

    fn undecodable(host: &Host, err: &HostError) -> Self {
        Self {
            name: host.name.clone(),
            active: false,
            driver_name: host.driver_name.clone(),
            state: State::Error,
            url: String::new(),
            engine_options: Some(host.host_options.engine.clone()),
            error: flatten(&err.to_string()),
            response_time: Duration::ZERO,
        }
    }
}

fn flatten(message: &str) -> String {
    message.replace(['\r', '\n'], " ")
}

/// Builds live drivers for hosts handed to a listing still undecoded
///
/// Decoding can mean starting a plugin process, so it happens on the
/// per-host worker and counts against the host's timeout.
#[derive(Clone)]
pub struct HostDecoder {
    catalog: DriverCatalog,
    store_path: PathBuf,
}

impl HostDecoder {
    pub fn new(catalog: DriverCatalog, store_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            store_path: store_path.into(),
        }
    }

    fn decode(&self, host: &mut Host) -> Result<(), HostError> {
        host.decode(&self.catalog, &self.store_path)
    }
}

impl fmt::Debug for HostDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDecoder")
            .field("store_path", &self.store_path)
            .finish_non_exhaustive()
    }
}

/// Inputs of a listing that come from outside the host records
#[derive(Debug, Clone)]
pub struct ListContext {
    pub timeout: Duration,
    /// Engine endpoint the operator currently points at
    pub engine_endpoint: Option<String>,
    /// Required when any host arrives with its driver undecoded
    pub decoder: Option<HostDecoder>,
}

impl ListContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            engine_endpoint: None,
            decoder: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.engine_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_decoder(mut self, decoder: HostDecoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Read the selected endpoint from `var` (e.g. `CONTAINER_HOST`)
    pub fn from_env(env: &dyn Environment, var: &str, timeout: Duration) -> Self {
        Self {
            engine_endpoint: non_empty_var(env, var),
            ..Self::new(timeout)
        }
    }

    fn decode(&self, host: &mut Host) -> Result<(), HostError> {
        match &self.decoder {
            Some(decoder) if !host.is_decoded() => decoder.decode(host),
            _ => Ok(()),
        }
    }

    fn is_active(&self, state: State, url: &str) -> bool {
        state == State::Running && self.engine_endpoint.as_deref() == Some(url)
    }
}

/// Query every host and merge in the ones that failed to load
pub async fn get_host_list_items(
    hosts: Vec<Host>,
    hosts_in_error: BTreeMap<String, HostError>,
    ctx: &ListContext,
) -> Vec<HostListItem> {
    tracing::debug!("timeout set to {:?}", ctx.timeout);
    let ctx = Arc::new(ctx.clone());

    let queries = hosts
        .into_iter()
        .map(|host| get_host_state(host, ctx.clone()));
    let mut items = future::join_all(queries).await;

    items.extend(
        hosts_in_error
            .iter()
            .map(|(name, err)| HostListItem::in_error(name.clone(), err)),
    );

    items.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    items
}

/// Race one host's query against the timeout
///
/// The query runs on a detached thread: a driver that never answers must not
/// hold up the runtime. If the timeout wins, the receiver is dropped and the
/// thread's late send fails quietly. A plugin child the thread was talking
/// to is killed so it does not outlive the listing.
async fn get_host_state(host: Host, ctx: Arc<ListContext>) -> HostListItem {
    let name = host.name.clone();
    let driver_name = host.driver_name.clone();
    let (tx, rx) = oneshot::channel();
    let plugin_pid = Arc::new(AtomicU32::new(0));

    let thread_ctx = ctx.clone();
    let thread_pid = plugin_pid.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("ls-{name}"))
        .spawn(move || {
            let mut host = host;
            let item = match thread_ctx.decode(&mut host) {
                Ok(()) => {
                    if let Some(pid) = host.driver().ok().and_then(|d| d.plugin_pid()) {
                        thread_pid.store(pid, Ordering::SeqCst);
                    }
                    attempt_get_host_state(&host, &thread_ctx)
                }
                Err(e) => HostListItem::undecodable(&host, &e),
            };
            if tx.send(item).is_err() {
                tracing::debug!("Discarding late answer from {}", host.name);
            }
        });
    if let Err(e) = spawned {
        return HostListItem {
            error: format!("failed to query host: {e}"),
            state: State::Error,
            ..HostListItem::timed_out(name, driver_name, Duration::ZERO)
        };
    }

    match tokio::time::timeout(ctx.timeout, rx).await {
        Ok(Ok(item)) => item,
        Ok(Err(_)) => HostListItem {
            error: "state query aborted".to_string(),
            state: State::Error,
            ..HostListItem::timed_out(name, driver_name, Duration::ZERO)
        },
        Err(_) => {
            tracing::debug!("Host {} did not answer within {:?}", name, ctx.timeout);
            let pid = plugin_pid.load(Ordering::SeqCst);
            if pid != 0 {
                tracing::debug!("Killing plugin {} serving {}", pid, name);
                if let Err(e) = signal_process(pid, "KILL") {
                    tracing::debug!("Could not kill plugin {}: {}", pid, e);
                }
            }
            HostListItem::timed_out(name, driver_name, ctx.timeout)
        }
    }
}

/// Ask the driver as little as possible: a URL implies Running
fn attempt_get_host_state(host: &Host, ctx: &ListContext) -> HostListItem {
    let begin = Instant::now();

    let (state, url, err) = match host.url() {
        Ok(url) if !url.is_empty() => (State::Running, url, None),
        Ok(url) => match host.state() {
            Ok(state) => (state, url, None),
            Err(e) => (State::None, url, Some(e)),
        },
        Err(e) => (host.state().unwrap_or_default(), String::new(), Some(e)),
    };

    let error = match err {
        Some(e) if !e.is_not_running() => e.to_string(),
        _ => String::new(),
    };

    HostListItem {
        name: host.name.clone(),
        active: ctx.is_active(state, &url),
        driver_name: host.driver_name.clone(),
        state,
        url,
        engine_options: Some(host.host_options.engine.clone()),
        error,
        response_time: begin.elapsed(),
    }
}

/// The host the operator's engine endpoint points at
///
/// With no active host, a timed-out host might have been the one, so that
/// case is reported separately from a plain miss.
pub fn active_host(items: &[HostListItem]) -> Result<&HostListItem, ListError> {
    if let Some(item) = items.iter().find(|item| item.active) {
        return Ok(item);
    }
    if items.iter().any(|item| item.state == State::Timeout) {
        return Err(ListError::ActiveHostTimeout);
    }
    Err(ListError::NoActiveHost)
}
