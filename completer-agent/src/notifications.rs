//! User-visible progress and error relay.
//!
//! The requester translates model-loading lifecycle messages into calls on
//! a [`CompletionNotifier`]; host applications implement it to drive their
//! own notification UI. The default implementation logs through `tracing`.

use std::collections::HashMap;
use tracing::{error, info};

/// Sink for user-visible loading progress and generation errors.
pub trait CompletionNotifier: Send + Sync {
    /// First loading event for `file` of `model`.
    fn loading_started(&self, model: &str, file: &str);

    /// Byte-level progress; `percent` aggregates every file of the model
    /// seen so far.
    fn loading_progress(&self, model: &str, file: &str, loaded: u64, total: u64, percent: f32);

    /// One file finished downloading.
    fn loading_done(&self, model: &str, file: &str);

    /// The model's pipeline is ready; resolves the loading notification.
    fn model_ready(&self, model: &str);

    /// A generation failed with a non-interruption error.
    fn generation_failed(&self, error: &str);
}

/// Default notifier: structured logs instead of a UI.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl CompletionNotifier for TracingNotifier {
    fn loading_started(&self, model: &str, file: &str) {
        info!("loading {}: {}", model, file);
    }

    fn loading_progress(&self, model: &str, file: &str, loaded: u64, total: u64, percent: f32) {
        info!(
            "loading {}: {} {} / {} ({:.0}%)",
            model,
            file,
            format_file_size(loaded, 2),
            format_file_size(total, 2),
            percent
        );
    }

    fn loading_done(&self, model: &str, file: &str) {
        info!("loading {}: {} done", model, file);
    }

    fn model_ready(&self, model: &str) {
        info!("model {} ready", model);
    }

    fn generation_failed(&self, error: &str) {
        error!("completion generation failed: {}", error);
    }
}

/// Per-model aggregate of in-progress file downloads, backing one
/// user-visible notification from the first loading event until `ready`.
#[derive(Debug, Default)]
pub struct LoadingNotification {
    files: HashMap<String, (u64, u64)>,
}

impl LoadingNotification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record progress for one file and return the aggregate percentage
    /// across every file observed so far.
    pub fn observe(&mut self, file: &str, loaded: u64, total: u64) -> f32 {
        self.files.insert(file.to_string(), (loaded, total));
        self.percent()
    }

    pub fn percent(&self) -> f32 {
        let (loaded, total) = self
            .files
            .values()
            .fold((0u64, 0u64), |(l, t), (fl, ft)| (l + fl, t + ft));
        if total == 0 {
            0.0
        } else {
            (loaded as f32 / total as f32) * 100.0
        }
    }
}

const SIZE_UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Format bytes to a human readable string, e.g. `1.50 MB`.
pub fn format_file_size(bytes: u64, decimal_point: usize) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    if exponent >= SIZE_UNITS.len() {
        return bytes.to_string();
    }
    let scaled = bytes as f64 / 1024f64.powi(exponent as i32);
    // Trim trailing zeros the way a float-to-string round trip does.
    let rounded = format!("{:.*}", decimal_point, scaled);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, SIZE_UNITS[exponent])
}
