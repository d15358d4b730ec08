//! Spinner for long machine operations
//!
//! Creating, provisioning and stopping a VM can take minutes; the spinner
//! shows which machine is being worked on and for how long.

use std::time::Duration;

use console::Term;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Animated `message (MM:SS)` line on stderr
///
/// A no-op in quiet mode or when stderr is not a terminal, so scripted
/// callers get plain output.
pub struct CommandSpinner {
    bar: Option<ProgressBar>,
}

impl CommandSpinner {
    /// Start ticking at 100ms intervals
    pub fn new(message: &str) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg} ({elapsed_precise:.dim})")
                .expect("spinner template is valid")
                .tick_chars("\u{28CB}\u{2819}\u{2839}\u{2838}\u{283C}\u{2834}\u{2826}\u{2827}\u{2807}\u{280F}"),
        );
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar: Some(bar) }
    }

    pub fn new_maybe(message: &str, quiet: bool) -> Self {
        if quiet || !Term::stderr().is_term() {
            Self { bar: None }
        } else {
            Self::new(message)
        }
    }

    /// Finish with a green checkmark
    pub fn success(self, message: &str) {
        if let Some(bar) = self.bar {
            bar.finish_with_message(format!(
                "{} {}",
                console::style("\u{2713}").green(),
                message
            ));
        }
    }

    /// Finish with a red cross; the error itself is printed by the caller
    pub fn fail(self, message: &str) {
        if let Some(bar) = self.bar {
            bar.finish_with_message(format!("{} {}", console::style("\u{2717}").red(), message));
        }
    }
}
