use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{ErrorKind, SnapshotResult};
use crate::progress::{ProgressBar, ProgressBarBuilder};
use crate::snapshot_error;

/// Progress bar remembering the bytes it was advanced by.
#[derive(Debug)]
pub struct RecordingProgressBar {
    pub description: String,
    pub total_bytes: u64,
    added_bytes: AtomicU64,
    updates: AtomicU64,
    fail: bool,
}

impl RecordingProgressBar {
    pub fn added_bytes(&self) -> u64 {
        self.added_bytes.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }
}

impl ProgressBar for RecordingProgressBar {
    fn add(&self, bytes: u64) -> SnapshotResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(snapshot_error!(
                ErrorKind::ProgressError,
                "Progress bar rejected update"
            ));
        }

        self.added_bytes.fetch_add(bytes, Ordering::SeqCst);

        Ok(())
    }
}

/// Builds [`RecordingProgressBar`]s and keeps them for inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingProgressBarBuilder {
    bars: Arc<Mutex<Vec<Arc<RecordingProgressBar>>>>,
    fail_updates: bool,
}

impl RecordingProgressBarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every bar built afterwards fail its updates.
    pub fn failing() -> Self {
        Self {
            bars: Arc::default(),
            fail_updates: true,
        }
    }

    pub fn bars(&self) -> Vec<Arc<RecordingProgressBar>> {
        self.bars.lock().unwrap().clone()
    }

    pub fn bar(&self, description: &str) -> Option<Arc<RecordingProgressBar>> {
        self.bars()
            .into_iter()
            .find(|bar| bar.description == description)
    }
}

impl ProgressBarBuilder for RecordingProgressBarBuilder {
    fn build(&self, total_bytes: u64, description: &str) -> Arc<dyn ProgressBar> {
        let bar = Arc::new(RecordingProgressBar {
            description: description.to_string(),
            total_bytes,
            added_bytes: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            fail: self.fail_updates,
        });
        self.bars.lock().unwrap().push(bar.clone());

        bar
    }
}
