use serde::Deserialize;

use crate::shared::ValidationError;

/// Tuning knobs of a snapshot run.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SnapshotConfig {
    /// Target number of bytes read by a single page range query.
    #[serde(default = "default_batch_bytes")]
    pub batch_bytes: u64,
    /// Maximum number of tables snapshotted at the same time, across all schemas.
    #[serde(default = "default_max_table_workers")]
    pub max_table_workers: u16,
    /// Maximum number of page ranges of one table read at the same time.
    #[serde(default = "default_max_range_workers")]
    pub max_range_workers: u16,
    /// Whether per schema progress is reported.
    #[serde(default)]
    pub progress_tracking: bool,
}

impl SnapshotConfig {
    /// Default target size of a page range query: 80 MiB.
    pub const DEFAULT_BATCH_BYTES: u64 = 80 * 1024 * 1024;

    pub const DEFAULT_MAX_TABLE_WORKERS: u16 = 4;

    pub const DEFAULT_MAX_RANGE_WORKERS: u16 = 4;

    /// Validates the worker counts and the batch size.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_bytes == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "snapshot.batch_bytes".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_table_workers == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "snapshot.max_table_workers".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_range_workers == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "snapshot.max_range_workers".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Upper bound of reader connections opened by a run, excluding the exporting connection.
    pub fn max_reader_connections(&self) -> usize {
        self.max_table_workers as usize * self.max_range_workers as usize
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            batch_bytes: default_batch_bytes(),
            max_table_workers: default_max_table_workers(),
            max_range_workers: default_max_range_workers(),
            progress_tracking: false,
        }
    }
}

fn default_batch_bytes() -> u64 {
    SnapshotConfig::DEFAULT_BATCH_BYTES
}

fn default_max_table_workers() -> u16 {
    SnapshotConfig::DEFAULT_MAX_TABLE_WORKERS
}

fn default_max_range_workers() -> u16 {
    SnapshotConfig::DEFAULT_MAX_RANGE_WORKERS
}
