// src/commands/progress.rs
//! Progress display for batch runs
//!
//! An overall bar with a status line below naming the document a worker
//! just finished. Safe to update from rayon workers.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

pub struct BatchProgress {
    _multi: MultiProgress,
    overall: ProgressBar,
    status: ProgressBar,
}

impl BatchProgress {
    /// Create a tracker for `total` documents
    pub fn new(total: u64, operation: &str) -> Self {
        let multi = MultiProgress::new();

        let overall = ProgressBar::new(total);
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{msg} ({pos}/{len}) [{bar:40.green/dim}] {percent}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        overall.set_message(operation.to_string());

        let status = ProgressBar::new_spinner();
        status.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        status.enable_steady_tick(Duration::from_millis(100));

        let overall = multi.add(overall);
        let status = multi.add(status);

        Self {
            _multi: multi,
            overall,
            status,
        }
    }

    /// Spinner only, for listing work whose size is not known yet
    pub fn spinner(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    /// Mark one document done
    pub fn complete(&self, path: &str, outcome: &str) {
        self.status.set_message(format!("{} [{}]", path, outcome));
        self.overall.inc(1);
    }

    pub fn finish(&self, message: &str) {
        self.status.finish_and_clear();
        self.overall.finish_with_message(message.to_string());
    }
}
