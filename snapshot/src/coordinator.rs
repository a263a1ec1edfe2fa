//! Ownership of the exported snapshot of a run.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{ErrorKind, SnapshotResult};
use crate::snapshot_error;
use crate::source::{SnapshotExporter, SnapshotId, SnapshotSource};

/// Holds the exporting transaction of a run.
///
/// Exactly one snapshot is exported per coordinator. Readers are opened through
/// [`SnapshotHandle`]s, which stay valid until [`SnapshotCoordinator::release`] is called.
pub struct SnapshotCoordinator<S: SnapshotSource> {
    exporter: S::Exporter,
    handle: SnapshotHandle<S>,
}

impl<S: SnapshotSource> SnapshotCoordinator<S> {
    /// Exports a new snapshot from `source`.
    pub async fn export(source: S) -> SnapshotResult<Self> {
        let exporter = source.export_snapshot().await.map_err(|err| {
            snapshot_error!(
                ErrorKind::SnapshotExportFailed,
                "Error exporting snapshot",
                source: err
            )
        })?;

        let snapshot_id = Arc::new(exporter.snapshot_id().clone());
        info!(%snapshot_id, "snapshot exported, readers can now import it");

        Ok(Self {
            exporter,
            handle: SnapshotHandle {
                source,
                snapshot_id,
            },
        })
    }

    pub fn snapshot_id(&self) -> &SnapshotId {
        &self.handle.snapshot_id
    }

    /// Returns a handle for opening readers on the exported snapshot.
    pub fn handle(&self) -> SnapshotHandle<S> {
        self.handle.clone()
    }

    /// Ends the exporting transaction.
    ///
    /// Failures are only logged since every reader already holds its own copy of the snapshot.
    pub async fn release(self) {
        let snapshot_id = self.handle.snapshot_id;
        match self.exporter.release().await {
            Ok(()) => info!(%snapshot_id, "released exported snapshot"),
            Err(err) => warn!(%snapshot_id, error = %err, "could not release exported snapshot"),
        }
    }
}

/// Cheap, immutable reference to an exported snapshot shared by every table task.
pub struct SnapshotHandle<S> {
    source: S,
    snapshot_id: Arc<SnapshotId>,
}

impl<S: Clone> Clone for SnapshotHandle<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            snapshot_id: self.snapshot_id.clone(),
        }
    }
}

impl<S: SnapshotSource> SnapshotHandle<S> {
    pub fn snapshot_id(&self) -> &SnapshotId {
        &self.snapshot_id
    }

    /// Opens a new reader which imported the snapshot.
    pub async fn open_reader(&self) -> SnapshotResult<S::Reader> {
        self.source
            .open_reader(&self.snapshot_id)
            .await
            .map_err(|err| {
                snapshot_error!(
                    ErrorKind::SnapshotImportFailed,
                    "Error setting transaction snapshot",
                    self.snapshot_id.to_string(),
                    source: err
                )
            })
    }
}
