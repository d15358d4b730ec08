//! Color utilities for CLI output
//!
//! Provides consistent color styling for machine states.

use comfy_table::Color;
use console::{Style, StyledObject};
use machina_core::State;

/// Style a machine state with appropriate colors
///
/// - Running -> green bold
/// - Stopped, Error -> red
/// - Starting, Stopping, Paused, Saved -> yellow
/// - Timeout, None -> dim
pub fn state_style(state: State) -> StyledObject<&'static str> {
    let style = match state {
        State::Running => Style::new().green().bold(),
        State::Stopped | State::Error => Style::new().red(),
        State::Starting | State::Stopping | State::Paused | State::Saved => Style::new().yellow(),
        State::Timeout | State::None => Style::new().dim(),
    };
    style.apply_to(state.as_str())
}

/// Table cell color for a machine state, matching [`state_style`]
pub fn state_color(state: State) -> Color {
    match state {
        State::Running => Color::Green,
        State::Stopped | State::Error => Color::Red,
        State::Starting | State::Stopping | State::Paused | State::Saved => Color::Yellow,
        State::Timeout | State::None => Color::DarkGrey,
    }
}
