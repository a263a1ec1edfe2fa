use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::conversions::registry::TypeRegistry;
use crate::coordinator::SnapshotHandle;
use crate::error::{ErrorKind, SnapshotResult};
use crate::partition::{TailScan, partition};
use crate::processor::RowProcessor;
use crate::progress::ProgressBar;
use crate::snapshot_error;
use crate::source::{SnapshotReader, SnapshotSource};
use crate::stats::resolve_table_info;
use crate::types::TableName;
use crate::workers::range::{RangeWorker, TableContext, copy_range};

/// Lifecycle of a table within a snapshot run.
///
/// `Done` and `Failed` are terminal. A failed table never affects the other tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Pending,
    StatsResolved,
    RangesComputed,
    Streaming,
    Done,
    Failed,
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            TableState::Pending => "pending",
            TableState::StatsResolved => "stats_resolved",
            TableState::RangesComputed => "ranges_computed",
            TableState::Streaming => "streaming",
            TableState::Done => "done",
            TableState::Failed => "failed",
        };

        f.write_str(state)
    }
}

/// Counters of a table that was snapshotted successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableSnapshotStats {
    pub rows: u64,
    /// Ranges planned from the table statistics.
    pub ranges: u64,
    /// Pages found past the end estimated by the table statistics.
    pub tail_pages: u64,
}

/// Snapshots a single table.
pub struct TableWorker<S: SnapshotSource, P> {
    table_name: Arc<TableName>,
    snapshot: SnapshotHandle<S>,
    processor: P,
    registry: Arc<TypeRegistry>,
    progress_bar: Option<Arc<dyn ProgressBar>>,
    batch_bytes: u64,
    max_range_workers: u16,
    state: TableState,
}

impl<S, P> TableWorker<S, P>
where
    S: SnapshotSource,
    P: RowProcessor + Clone + Send + Sync + 'static,
{
    pub fn new(
        table_name: Arc<TableName>,
        snapshot: SnapshotHandle<S>,
        processor: P,
        registry: Arc<TypeRegistry>,
        progress_bar: Option<Arc<dyn ProgressBar>>,
        batch_bytes: u64,
        max_range_workers: u16,
    ) -> Self {
        Self {
            table_name,
            snapshot,
            processor,
            registry,
            progress_bar,
            batch_bytes,
            max_range_workers,
            state: TableState::Pending,
        }
    }

    /// Runs the worker until the table reached a terminal state.
    pub async fn run(mut self) -> SnapshotResult<TableSnapshotStats> {
        info!(table_name = %self.table_name, "starting table snapshot");

        let result = self.snapshot_table().await;
        match &result {
            Ok(stats) => {
                self.transition(TableState::Done);
                info!(
                    table_name = %self.table_name,
                    rows = stats.rows,
                    ranges = stats.ranges,
                    tail_pages = stats.tail_pages,
                    "completed table snapshot"
                );
            }
            Err(err) => {
                self.transition(TableState::Failed);
                error!(table_name = %self.table_name, error = %err, "table snapshot failed");
            }
        }

        result
    }

    async fn snapshot_table(&mut self) -> SnapshotResult<TableSnapshotStats> {
        let reader = self.snapshot.open_reader().await?;

        let table_info = resolve_table_info(&reader, &self.table_name, self.batch_bytes).await?;
        self.transition(TableState::StatsResolved);

        let ranges = partition(&table_info);
        let tail_boundary = ranges.end();
        let range_count = ranges.size_hint().0;
        self.transition(TableState::RangesComputed);

        let context = Arc::new(TableContext {
            table_name: self.table_name.clone(),
            table_info,
            processor: self.processor.clone(),
            registry: self.registry.clone(),
            progress_bar: self.progress_bar.clone(),
        });

        // Extra readers are only opened when there are ranges left for them.
        let worker_count = (self.max_range_workers as usize).clamp(1, range_count.max(1));
        let ranges = Arc::new(Mutex::new(ranges));

        self.transition(TableState::Streaming);
        debug!(
            table_name = %self.table_name,
            range_count,
            worker_count,
            "starting range workers"
        );

        let mut join_set = JoinSet::new();
        let mut first_reader = Some(reader);
        for worker_id in 0..worker_count {
            let reader = first_reader.take();
            let snapshot = self.snapshot.clone();
            let worker = RangeWorker::new(worker_id, ranges.clone(), context.clone());

            join_set.spawn(async move {
                let reader = match reader {
                    Some(reader) => reader,
                    None => snapshot.open_reader().await?,
                };

                worker.run(reader).await
            });
        }

        let mut rows: u64 = 0;
        let mut readers = Vec::with_capacity(worker_count);
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok((reader, worker_rows))) => {
                    rows += worker_rows;
                    readers.push(reader);
                }
                Ok(Err(err)) => {
                    error!(
                        table_name = %self.table_name,
                        error = %err,
                        "one or more range workers failed"
                    );
                    // Waits for the aborted workers so their readers are closed with the table.
                    join_set.shutdown().await;

                    return Err(err);
                }
                Err(join_err) => {
                    error!(
                        table_name = %self.table_name,
                        error = %join_err,
                        "one or more range workers panicked"
                    );
                    join_set.shutdown().await;

                    return Err(snapshot_error!(
                        ErrorKind::RangeWorkerPanic,
                        "One or more range workers panicked, aborting table",
                        join_err.to_string()
                    ));
                }
            }
        }

        // The statistics can be older than the snapshot, so rows may live past their last page.
        let Some(reader) = readers.pop() else {
            bail!(
                ErrorKind::InvalidState,
                "No reader left to scan the table tail",
                self.table_name.to_string()
            );
        };

        let mut tail = TailScan::new(tail_boundary);
        let mut tail_pages: u64 = 0;
        while let Some(range) = tail.next_range(&reader, &self.table_name).await? {
            rows += copy_range(&reader, &context, range).await?;
            tail_pages += 1;
        }

        if tail_pages > 0 {
            info!(
                table_name = %self.table_name,
                tail_pages,
                "copied pages past the estimated table size"
            );
        }

        readers.push(reader);
        for reader in readers {
            if let Err(err) = reader.release().await {
                warn!(table_name = %self.table_name, error = %err, "could not release reader");
            }
        }

        Ok(TableSnapshotStats {
            rows,
            ranges: range_count as u64,
            tail_pages,
        })
    }

    fn transition(&mut self, state: TableState) {
        debug!(
            table_name = %self.table_name,
            from = %self.state,
            to = %state,
            "table state changed"
        );

        self.state = state;
    }
}
