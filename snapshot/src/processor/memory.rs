use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SnapshotResult;
use crate::processor::RowProcessor;
use crate::types::{Row, TableName};

/// Processor keeping every row in memory, in arrival order.
///
/// Meant for tests and small tables. Clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowProcessor {
    rows: Arc<Mutex<Vec<Row>>>,
}

impl MemoryRowProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all rows received so far.
    pub async fn rows(&self) -> Vec<Row> {
        self.rows.lock().await.clone()
    }

    /// Returns a copy of the rows received for `table_name`.
    pub async fn table_rows(&self, table_name: &TableName) -> Vec<Row> {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|row| row.table_name.as_ref() == table_name)
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.rows.lock().await.clear();
    }
}

impl RowProcessor for MemoryRowProcessor {
    fn name() -> &'static str {
        "memory"
    }

    async fn process_row(&self, row: Row) -> SnapshotResult<()> {
        debug!(table_name = %row.table_name, columns = row.columns.len(), "storing row");

        self.rows.lock().await.push(row);

        Ok(())
    }
}
