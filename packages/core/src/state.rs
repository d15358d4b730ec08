//! Machine lifecycle states

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state reported by a driver
///
/// `Timeout` is never produced by a driver; the listing aggregator assigns it
/// when a host fails to answer within the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum State {
    #[default]
    None,
    Running,
    Paused,
    Saved,
    Stopped,
    Stopping,
    Starting,
    Error,
    Timeout,
}

impl State {
    pub const ALL: [State; 9] = [
        State::None,
        State::Running,
        State::Paused,
        State::Saved,
        State::Stopped,
        State::Stopping,
        State::Starting,
        State::Error,
        State::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::None => "",
            State::Running => "Running",
            State::Paused => "Paused",
            State::Saved => "Saved",
            State::Stopped => "Stopped",
            State::Stopping => "Stopping",
            State::Starting => "Starting",
            State::Error => "Error",
            State::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown machine state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for State {
    type Err = UnknownState;

    /// Case-insensitive; the empty string and "none" both map to [`State::None`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if wanted.is_empty() || wanted.eq_ignore_ascii_case("none") {
            return Ok(State::None);
        }
        State::ALL
            .iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}
