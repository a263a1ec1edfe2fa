use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ErrorKind, SnapshotResult};
use crate::processor::RowProcessor;
use crate::snapshot_error;
use crate::types::{Row, TableName};

/// Wraps a processor and rejects every row of one table.
#[derive(Debug, Clone)]
pub struct RejectingRowProcessor<P> {
    inner: P,
    rejected_table: Arc<TableName>,
    rejected_rows: Arc<AtomicU64>,
}

impl<P> RejectingRowProcessor<P> {
    pub fn wrap(inner: P, rejected_table: TableName) -> Self {
        Self {
            inner,
            rejected_table: Arc::new(rejected_table),
            rejected_rows: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn rejected_rows(&self) -> u64 {
        self.rejected_rows.load(Ordering::SeqCst)
    }
}

impl<P> RowProcessor for RejectingRowProcessor<P>
where
    P: RowProcessor + Sync,
{
    fn name() -> &'static str {
        "rejecting"
    }

    async fn process_row(&self, row: Row) -> SnapshotResult<()> {
        if row.table_name == self.rejected_table {
            self.rejected_rows.fetch_add(1, Ordering::SeqCst);

            return Err(snapshot_error!(
                ErrorKind::ProcessorError,
                "Row rejected by processor",
                row.table_name.to_string()
            ));
        }

        self.inner.process_row(row).await
    }
}
