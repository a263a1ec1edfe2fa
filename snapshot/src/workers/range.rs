use std::sync::Arc;

use futures::TryStreamExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::conversions::registry::TypeRegistry;
use crate::error::SnapshotResult;
use crate::partition::PageRanges;
use crate::processor::RowProcessor;
use crate::progress::{ProgressBar, advance};
use crate::source::SnapshotReader;
use crate::types::{PageRange, TableInfo, TableName};

/// Everything the workers of one table share.
pub struct TableContext<P> {
    pub table_name: Arc<TableName>,
    pub table_info: TableInfo,
    pub processor: P,
    pub registry: Arc<TypeRegistry>,
    pub progress_bar: Option<Arc<dyn ProgressBar>>,
}

/// Streams the rows of `range` to the processor one by one.
///
/// The next row is only read once the processor took the previous one. Returns the number of
/// processed rows.
pub async fn copy_range<R, P>(
    reader: &R,
    context: &TableContext<P>,
    range: PageRange,
) -> SnapshotResult<u64>
where
    R: SnapshotReader,
    P: RowProcessor,
{
    debug!(table_name = %context.table_name, %range, "fetching page range");

    let mut records = reader.fetch_page_range(&context.table_name, range).await?;

    let mut rows: u64 = 0;
    while let Some(record) = records.try_next().await? {
        let row = context.registry.map_record(&context.table_name, &record)?;
        context.processor.process_row(row).await?;

        if let Some(progress_bar) = &context.progress_bar {
            advance(progress_bar.as_ref(), context.table_info.avg_row_bytes);
        }

        rows += 1;
    }

    debug!(table_name = %context.table_name, %range, rows, "copied page range");

    Ok(rows)
}

/// Copies page ranges from a queue shared with the other workers of the table until the queue
/// is empty.
pub struct RangeWorker<P> {
    worker_id: usize,
    ranges: Arc<Mutex<PageRanges>>,
    context: Arc<TableContext<P>>,
}

impl<P> RangeWorker<P>
where
    P: RowProcessor,
{
    pub fn new(
        worker_id: usize,
        ranges: Arc<Mutex<PageRanges>>,
        context: Arc<TableContext<P>>,
    ) -> Self {
        Self {
            worker_id,
            ranges,
            context,
        }
    }

    /// Runs the worker on `reader` and gives the reader back together with the number of
    /// processed rows.
    pub async fn run<R: SnapshotReader>(self, reader: R) -> SnapshotResult<(R, u64)> {
        let mut rows: u64 = 0;
        let mut ranges: u64 = 0;

        loop {
            // The lock is released before the range is read.
            let next_range = self.ranges.lock().await.next();
            let Some(range) = next_range else {
                break;
            };

            rows += copy_range(&reader, &self.context, range).await?;
            ranges += 1;
        }

        debug!(
            table_name = %self.context.table_name,
            worker_id = self.worker_id,
            ranges,
            rows,
            "range worker finished"
        );

        Ok((reader, rows))
    }
}
