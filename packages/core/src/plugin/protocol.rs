//! Wire format of the plugin channel
//!
//! One JSON object per line in each direction. The client sends a
//! [`Request`] and blocks until the matching [`Response`] line arrives.

use serde::{Deserialize, Serialize};

use crate::drivers::{DriverError, DriverOptions, Flag};
use crate::state::State;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Construct the served driver for one machine; must come first
    Init {
        machine_name: String,
        store_path: String,
    },
    DriverName,
    MachineName,
    CreateFlags,
    SetConfigFromFlags {
        options: DriverOptions,
    },
    SetConfigRaw {
        raw: serde_json::Value,
    },
    GetConfigRaw,
    GetIp,
    GetUrl,
    GetSshHostname,
    GetSshPort,
    GetSshUsername,
    GetSshKeyPath,
    GetState,
    PreCreateCheck,
    Create,
    Start,
    Stop,
    Kill,
    Remove,
    Restart,
    /// Ends the session; the server stops after answering
    Close,
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::Init { .. } => "init",
            Request::DriverName => "driver_name",
            Request::MachineName => "machine_name",
            Request::CreateFlags => "create_flags",
            Request::SetConfigFromFlags { .. } => "set_config_from_flags",
            Request::SetConfigRaw { .. } => "set_config_raw",
            Request::GetConfigRaw => "get_config_raw",
            Request::GetIp => "get_ip",
            Request::GetUrl => "get_url",
            Request::GetSshHostname => "get_ssh_hostname",
            Request::GetSshPort => "get_ssh_port",
            Request::GetSshUsername => "get_ssh_username",
            Request::GetSshKeyPath => "get_ssh_key_path",
            Request::GetState => "get_state",
            Request::PreCreateCheck => "pre_create_check",
            Request::Create => "create",
            Request::Start => "start",
            Request::Stop => "stop",
            Request::Kill => "kill",
            Request::Remove => "remove",
            Request::Restart => "restart",
            Request::Close => "close",
        }
    }
}

/// Error classes that survive the trip across the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    HostIsNotRunning,
    NotSupported { driver: String, operation: String },
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Response {
    Unit,
    Text(String),
    Port(u16),
    State(State),
    Flags(Vec<Flag>),
    Raw(serde_json::Value),
    Err {
        message: String,
        kind: RemoteErrorKind,
    },
}

/// Operation names drivers use in `NotSupported`; the error type wants a
/// static string back on the client side
const KNOWN_OPERATIONS: &[&str] = &["SSH", "start", "stop", "kill", "restart", "create", "remove"];

impl Response {
    pub fn from_error(err: &DriverError) -> Self {
        let kind = if err.is_not_running() {
            RemoteErrorKind::HostIsNotRunning
        } else if let DriverError::NotSupported { driver, operation } = err {
            RemoteErrorKind::NotSupported {
                driver: driver.clone(),
                operation: operation.to_string(),
            }
        } else {
            RemoteErrorKind::Other
        };
        Response::Err {
            message: err.to_string(),
            kind,
        }
    }

    /// Rebuild the driver error carried by an `Err` frame
    ///
    /// `method` names the call, used when the operation is not a known one.
    pub fn into_driver_error(message: String, kind: RemoteErrorKind, method: &'static str) -> DriverError {
        match kind {
            RemoteErrorKind::HostIsNotRunning => DriverError::HostIsNotRunning,
            RemoteErrorKind::NotSupported { driver, operation } => {
                let operation = KNOWN_OPERATIONS
                    .iter()
                    .find(|known| **known == operation)
                    .copied()
                    .unwrap_or(method);
                DriverError::NotSupported { driver, operation }
            }
            RemoteErrorKind::Other => DriverError::Remote(message),
        }
    }
}
