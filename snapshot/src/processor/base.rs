use std::future::Future;

use crate::error::SnapshotResult;
use crate::types::Row;

/// Receiver of the rows captured by a snapshot run.
///
/// [`RowProcessor::process_row`] is called concurrently by every worker reading a table. The
/// worker waits for the returned future before reading the next row, so a slow processor slows
/// the snapshot down instead of having rows buffered in memory.
///
/// Returning an error fails the table the row belongs to. Other tables are not affected.
pub trait RowProcessor {
    /// Returns the name of the processor.
    fn name() -> &'static str;

    /// Takes ownership of a captured row.
    fn process_row(&self, row: Row) -> impl Future<Output = SnapshotResult<()>> + Send;
}
