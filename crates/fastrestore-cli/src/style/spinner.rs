//! Progress spinners using indicatif.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

const SPINNER: &[&str] = &["◐ ", "◓ ", "◑ ", "◒ "];

/// Starts a spinner showing `msg`. Hidden when stderr is not a terminal.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(SPINNER)
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn finish_with(pb: &ProgressBar, prefix: &'static str, msg: &str) {
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix);
    pb.finish_with_message(msg.to_string());
}

pub fn finish_success(pb: &ProgressBar, msg: &str) {
    finish_with(pb, "✓", msg);
}

pub fn finish_error(pb: &ProgressBar, msg: &str) {
    finish_with(pb, "✗", msg);
}
