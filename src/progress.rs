//! Progress reporting
//!
//! Operations stream user-facing progress lines (spinner text) through a
//! sink owned by the caller. The default sink forwards to `tracing`; a CLI
//! front-end can install its own to drive an interactive spinner.

use std::sync::Arc;
use tracing::info;

pub trait ProgressSink: Send + Sync {
    /// Replace the current progress line.
    fn update(&self, message: &str);

    /// Mark the current step finished.
    fn finish(&self, message: &str) {
        self.update(message);
    }
}

/// Default sink: progress lines become `tracing` events.
#[derive(Debug, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn update(&self, message: &str) {
        info!(target: "eon_ops::progress", "{message}");
    }
}

pub type SharedProgress = Arc<dyn ProgressSink>;

pub fn default_progress() -> SharedProgress {
    Arc::new(TracingProgress)
}
