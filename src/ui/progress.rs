//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// A task spinner with CI fallback
///
/// Draws to stderr so stdout stays clean for paths and JSON.
pub struct TaskSpinner {
    spinner: Option<ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                    .template("{spinner:.cyan} {msg}  {elapsed:.dim}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_message(message.to_string());
            spinner.enable_steady_tick(Duration::from_millis(120));
            self.spinner = Some(spinner);
        } else {
            eprintln!("{} {}", style("...").dim(), message);
        }
    }

    /// Update the spinner message
    pub fn message(&mut self, message: &str) {
        if let Some(ref spinner) = self.spinner {
            spinner.set_message(message.to_string());
        }
        // No output in plain mode for message updates
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        self.finish(style("✓").green(), style("[OK]").green(), message);
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        self.finish(style("✗").red(), style("[FAIL]").red(), message);
    }

    /// Clear the spinner without any message
    pub fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    fn finish(
        &mut self,
        symbol: console::StyledObject<&str>,
        tag: console::StyledObject<&str>,
        message: &str,
    ) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
            eprintln!("{} {}", symbol, message);
        } else if self.interactive {
            eprintln!("{} {}", symbol, message);
        } else {
            eprintln!("{} {}", tag, message);
        }
    }
}

impl Drop for TaskSpinner {
    fn drop(&mut self) {
        self.clear();
    }
}
