//! Orchestration of a snapshot run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use config::shared::SnapshotConfig;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, warn};

use crate::concurrency::shutdown::{ShutdownRx, is_shutdown_requested, wait_for_shutdown};
use crate::conversions::registry::TypeRegistry;
use crate::coordinator::{SnapshotCoordinator, SnapshotHandle};
use crate::error::{ErrorKind, SnapshotError, SnapshotResult};
use crate::processor::RowProcessor;
use crate::progress::{LogProgressBarBuilder, ProgressBar, ProgressBarBuilder};
use crate::report::{CaptureError, CaptureErrors};
use crate::snapshot_error;
use crate::source::{SnapshotReader, SnapshotSource};
use crate::types::{SchemaTables, SnapshotRequest, TableName, WILDCARD_TABLE};
use crate::workers::table::{TableSnapshotStats, TableWorker};

/// Tables of a schema ready to be snapshotted.
struct PreparedSchema {
    tables: Vec<String>,
    progress_bar: Option<Arc<dyn ProgressBar>>,
}

type TableTaskResult = Result<SnapshotResult<TableSnapshotStats>, Box<dyn Any + Send>>;

/// Takes consistent snapshots of sets of tables.
///
/// Every table of a run is read from the same exported snapshot, by up to
/// `max_table_workers * max_range_workers` readers at a time. One more connection holds the
/// exported snapshot for the whole run.
pub struct SnapshotGenerator<S, P> {
    source: S,
    processor: P,
    config: Arc<SnapshotConfig>,
    progress_bar_builder: Arc<dyn ProgressBarBuilder>,
    registry: Arc<TypeRegistry>,
    shutdown_rx: ShutdownRx,
}

impl<S, P> SnapshotGenerator<S, P>
where
    S: SnapshotSource,
    P: RowProcessor + Clone + Send + Sync + 'static,
{
    pub fn new(source: S, processor: P, config: SnapshotConfig, shutdown_rx: ShutdownRx) -> Self {
        Self {
            source,
            processor,
            config: Arc::new(config),
            progress_bar_builder: Arc::new(LogProgressBarBuilder),
            registry: Arc::new(TypeRegistry::default()),
            shutdown_rx,
        }
    }

    /// Replaces the builder of the progress bars used when progress tracking is enabled.
    pub fn with_progress_bar_builder(mut self, builder: Arc<dyn ProgressBarBuilder>) -> Self {
        self.progress_bar_builder = builder;
        self
    }

    /// Replaces the registry decoding column values.
    pub fn with_type_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Snapshots every table of `request` and hands their rows to the processor.
    ///
    /// Failures of single tables or schemas do not stop the other tables, they are returned
    /// together in [`CaptureError::Partial`] once every table finished. A failed snapshot export
    /// is reported for every requested schema. Shutdown aborts the run with
    /// [`CaptureError::Aborted`].
    pub async fn create_snapshot(&self, request: &SnapshotRequest) -> Result<(), CaptureError> {
        if request.is_empty() {
            info!("nothing to snapshot, the request has no tables");
            return Ok(());
        }

        let mut shutdown_rx = self.shutdown_rx.clone();
        if is_shutdown_requested(&shutdown_rx) {
            return Err(CaptureError::Aborted(aborted()));
        }

        info!(
            schemas = ?request.schema_names().collect::<Vec<_>>(),
            processor = P::name(),
            max_table_workers = self.config.max_table_workers,
            max_range_workers = self.config.max_range_workers,
            "starting snapshot"
        );

        let exported = tokio::select! {
            biased;

            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("shutdown requested while exporting snapshot");
                return Err(CaptureError::Aborted(aborted()));
            }
            exported = SnapshotCoordinator::export(self.source.clone()) => exported,
        };

        let coordinator = match exported {
            Ok(coordinator) => coordinator,
            Err(err) => {
                error!(error = %err, "could not export snapshot");

                let mut errors = CaptureErrors::new();
                for schema in request.schema_names() {
                    errors.add_global_error(schema, err.clone());
                }

                return errors.into_result();
            }
        };

        let result = self
            .snapshot_schemas(coordinator.handle(), request, &mut shutdown_rx)
            .await;

        // Readers have finished or were aborted, the exported snapshot is not needed anymore.
        coordinator.release().await;

        match result {
            Ok(errors) => {
                if errors.is_empty() {
                    info!("snapshot completed");
                } else {
                    warn!(
                        failed_tables = errors.table_error_count(),
                        "snapshot completed with errors"
                    );
                }

                errors.into_result()
            }
            Err(err) => Err(CaptureError::Aborted(err)),
        }
    }

    /// Dispatches the tables of every schema and waits for all of them.
    ///
    /// Returns an error only when shutdown was requested.
    async fn snapshot_schemas(
        &self,
        snapshot: SnapshotHandle<S>,
        request: &SnapshotRequest,
        shutdown_rx: &mut ShutdownRx,
    ) -> SnapshotResult<CaptureErrors> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_table_workers.max(1) as usize));
        let mut join_set: JoinSet<(Arc<TableName>, TableTaskResult)> = JoinSet::new();
        let mut errors = CaptureErrors::new();

        for schema_tables in request.schemas() {
            if schema_tables.tables.is_empty() {
                continue;
            }

            let prepared = tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut *shutdown_rx) => {
                    return Err(self.abort(&mut join_set).await);
                }
                prepared = self.prepare_schema(&snapshot, &semaphore, schema_tables) => prepared,
            };

            let prepared = match prepared {
                Ok(prepared) => prepared,
                Err(err) => {
                    error!(
                        schema = %schema_tables.schema,
                        error = %err,
                        "could not prepare schema, skipping its tables"
                    );
                    errors.add_global_error(&schema_tables.schema, err);
                    continue;
                }
            };

            info!(
                schema = %schema_tables.schema,
                tables = prepared.tables.len(),
                "dispatching schema tables"
            );

            for table in prepared.tables {
                let table_name = Arc::new(TableName::new(&schema_tables.schema, table));
                self.spawn_table(
                    &mut join_set,
                    &semaphore,
                    &snapshot,
                    table_name,
                    prepared.progress_bar.clone(),
                );
            }
        }

        loop {
            let next = tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut *shutdown_rx) => {
                    return Err(self.abort(&mut join_set).await);
                }
                next = join_set.join_next() => next,
            };

            let Some(result) = next else {
                break;
            };

            match result {
                Ok((_, Ok(Ok(_)))) => {}
                Ok((table_name, Ok(Err(err)))) => {
                    errors.add_table_error(&table_name.schema, &table_name.name, err);
                }
                Ok((table_name, Err(panic))) => {
                    let message = panic_message(panic.as_ref());
                    error!(table_name = %table_name, panic = %message, "table worker panicked");

                    errors.add_table_error(
                        &table_name.schema,
                        &table_name.name,
                        snapshot_error!(
                            ErrorKind::TableWorkerPanic,
                            "Table worker panicked",
                            message
                        ),
                    );
                }
                Err(join_err) => {
                    // Table tasks catch their panics, only an abort ends up here.
                    error!(error = %join_err, "table task ended unexpectedly");
                    join_set.shutdown().await;

                    return Err(snapshot_error!(
                        ErrorKind::TableWorkerPanic,
                        "A table task ended unexpectedly, aborting snapshot",
                        join_err.to_string()
                    ));
                }
            }
        }

        Ok(errors)
    }

    /// Resolves the tables of a schema and builds its progress bar.
    ///
    /// A reader is only opened when the schema has a wildcard or progress is tracked. It takes
    /// a table slot so that the number of open readers stays bounded.
    async fn prepare_schema(
        &self,
        snapshot: &SnapshotHandle<S>,
        semaphore: &Semaphore,
        schema_tables: &SchemaTables,
    ) -> SnapshotResult<PreparedSchema> {
        let schema = schema_tables.schema.as_str();
        let progress_tracking = self.config.progress_tracking;

        if !schema_tables.is_wildcard() && !progress_tracking {
            return Ok(PreparedSchema {
                tables: schema_tables.tables.clone(),
                progress_bar: None,
            });
        }

        let _permit = semaphore.acquire().await.map_err(|err| {
            snapshot_error!(
                ErrorKind::InvalidState,
                "Could not acquire semaphore while preparing a schema",
                err.to_string()
            )
        })?;

        let reader = snapshot.open_reader().await?;
        let tables = resolve_schema_tables(&reader, schema_tables).await?;

        let progress_bar = if progress_tracking {
            let total_bytes = reader
                .schema_total_bytes(schema, &tables)
                .await
                .map_err(|err| {
                    snapshot_error!(
                        ErrorKind::SchemaSizeFailed,
                        "Error getting schema total bytes",
                        schema,
                        source: err
                    )
                })?;

            info!(schema, total_bytes, "tracking snapshot progress");

            Some(self.progress_bar_builder.build(total_bytes, schema))
        } else {
            None
        };

        if let Err(err) = reader.release().await {
            warn!(schema, error = %err, "could not release schema reader");
        }

        Ok(PreparedSchema {
            tables,
            progress_bar,
        })
    }

    fn spawn_table(
        &self,
        join_set: &mut JoinSet<(Arc<TableName>, TableTaskResult)>,
        semaphore: &Arc<Semaphore>,
        snapshot: &SnapshotHandle<S>,
        table_name: Arc<TableName>,
        progress_bar: Option<Arc<dyn ProgressBar>>,
    ) {
        let worker = TableWorker::new(
            table_name.clone(),
            snapshot.clone(),
            self.processor.clone(),
            self.registry.clone(),
            progress_bar,
            self.config.batch_bytes,
            self.config.max_range_workers,
        );
        let semaphore = semaphore.clone();

        let span = tracing::info_span!("table_snapshot", table_name = %table_name);
        let task = async move {
            // The permit is held until the table reached a terminal state.
            let _permit = semaphore.acquire_owned().await.map_err(|err| {
                snapshot_error!(
                    ErrorKind::InvalidState,
                    "Could not acquire semaphore while snapshotting a table",
                    err.to_string()
                )
            })?;

            worker.run().await
        };

        join_set.spawn(
            async move {
                let result = AssertUnwindSafe(task).catch_unwind().await;
                (table_name, result)
            }
            .instrument(span),
        );
    }

    async fn abort(
        &self,
        join_set: &mut JoinSet<(Arc<TableName>, TableTaskResult)>,
    ) -> SnapshotError {
        info!(
            running_tables = join_set.len(),
            "shutdown requested, aborting snapshot"
        );

        join_set.shutdown().await;

        aborted()
    }
}

fn aborted() -> SnapshotError {
    snapshot_error!(ErrorKind::SnapshotCanceled, "Snapshot was canceled")
}

/// Returns the explicit tables of `schema_tables` followed by the tables matched by its
/// wildcard, without duplicates.
async fn resolve_schema_tables<R: SnapshotReader>(
    reader: &R,
    schema_tables: &SchemaTables,
) -> SnapshotResult<Vec<String>> {
    let mut tables: Vec<String> = schema_tables
        .tables
        .iter()
        .filter(|table| table.as_str() != WILDCARD_TABLE)
        .cloned()
        .collect();

    if schema_tables.is_wildcard() {
        let listed = reader
            .list_tables(&schema_tables.schema)
            .await
            .map_err(|err| {
                snapshot_error!(
                    ErrorKind::SourceSchemaError,
                    "Error listing schema tables",
                    schema_tables.schema.clone(),
                    source: err
                )
            })?;

        for table in listed {
            if !tables.contains(&table) {
                tables.push(table);
            }
        }
    }

    Ok(tables)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
