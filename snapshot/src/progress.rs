//! Reporting of the bytes snapshotted per schema.
//!
//! Progress is approximate: every row advances its schema bar by the average row size of its
//! table, not by the size of the row itself.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use crate::error::SnapshotResult;

/// Progress indicator of a single schema.
pub trait ProgressBar: Send + Sync {
    /// Advances the bar by `bytes`.
    fn add(&self, bytes: u64) -> SnapshotResult<()>;
}

/// Creates a [`ProgressBar`] for each snapshotted schema.
pub trait ProgressBarBuilder: Send + Sync {
    fn build(&self, total_bytes: u64, description: &str) -> Arc<dyn ProgressBar>;
}

/// Advances `progress_bar` and logs failures instead of returning them.
pub(crate) fn advance(progress_bar: &dyn ProgressBar, bytes: u64) {
    if let Err(err) = progress_bar.add(bytes) {
        warn!(error = %err, "could not update snapshot progress");
    }
}

/// Number of steps reported by a [`LogProgressBar`] between zero and its total.
const LOG_STEPS: u64 = 10;

/// [`ProgressBar`] which logs every time another tenth of its total is reached.
pub struct LogProgressBar {
    description: String,
    total_bytes: u64,
    processed_bytes: AtomicU64,
    logged_steps: AtomicU64,
}

impl LogProgressBar {
    pub fn new(total_bytes: u64, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            total_bytes,
            processed_bytes: AtomicU64::new(0),
            logged_steps: AtomicU64::new(0),
        }
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes.load(Ordering::Relaxed)
    }

    fn step_of(&self, processed_bytes: u64) -> u64 {
        if self.total_bytes == 0 {
            return LOG_STEPS;
        }

        let step = (processed_bytes as u128 * LOG_STEPS as u128 / self.total_bytes as u128) as u64;
        step.min(LOG_STEPS)
    }
}

impl fmt::Debug for LogProgressBar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogProgressBar")
            .field("description", &self.description)
            .field("total_bytes", &self.total_bytes)
            .field("processed_bytes", &self.processed_bytes())
            .finish()
    }
}

impl ProgressBar for LogProgressBar {
    fn add(&self, bytes: u64) -> SnapshotResult<()> {
        let processed_bytes = self.processed_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let step = self.step_of(processed_bytes);

        // Only the caller moving the step forward logs it.
        let previous_step = self.logged_steps.fetch_max(step, Ordering::Relaxed);
        if step > previous_step {
            info!(
                description = %self.description,
                processed_bytes,
                total_bytes = self.total_bytes,
                "snapshot progress {}%",
                step * 100 / LOG_STEPS
            );
        }

        Ok(())
    }
}

/// Builds [`LogProgressBar`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgressBarBuilder;

impl ProgressBarBuilder for LogProgressBarBuilder {
    fn build(&self, total_bytes: u64, description: &str) -> Arc<dyn ProgressBar> {
        Arc::new(LogProgressBar::new(total_bytes, description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_progress_bar_tracks_steps() {
        let progress_bar = LogProgressBar::new(1000, "public");

        progress_bar.add(50).unwrap();
        assert_eq!(progress_bar.logged_steps.load(Ordering::Relaxed), 0);

        progress_bar.add(200).unwrap();
        assert_eq!(progress_bar.logged_steps.load(Ordering::Relaxed), 2);

        // Estimates can exceed the total.
        progress_bar.add(5000).unwrap();
        assert_eq!(progress_bar.logged_steps.load(Ordering::Relaxed), LOG_STEPS);
        assert_eq!(progress_bar.processed_bytes(), 5250);
    }

    #[test]
    fn empty_total_is_complete() {
        let progress_bar = LogProgressBar::new(0, "empty");

        progress_bar.add(0).unwrap();
        assert_eq!(progress_bar.logged_steps.load(Ordering::Relaxed), LOG_STEPS);
    }
}
