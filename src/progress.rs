use crossterm::style::Stylize;
use indicatif::{ProgressBar, ProgressStyle};

/// Sink for human-readable progress notices.
///
/// Passed into the resolver and the accounting engine instead of writing to
/// a global logger, so tests can capture what would have been printed.
pub trait Notice: Send + Sync {
    fn notice(&self, message: &str);
}

/// Writes notices to stderr as dimmed `→ message` lines.
pub struct StderrNotice;

impl Notice for StderrNotice {
    fn notice(&self, message: &str) {
        eprintln!("{} {}", "→".dim(), message);
    }
}

/// A simple spinner for long-running stages.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn new(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.dim} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(message.into());
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    /// Clear the spinner and print a `✔ message` line to stderr.
    pub fn finish(self, message: impl Into<String>) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", "✔".green(), message.into());
    }

    /// Clear the spinner without printing anything, e.g. on error.
    pub fn abandon(self) {
        self.bar.finish_and_clear();
    }
}
