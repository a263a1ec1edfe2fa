use anyhow::{Context, bail};
use config::shared::SnapshotterConfig;
use snapshot::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use snapshot::generator::SnapshotGenerator;
use snapshot::processor::channel::ChannelRowProcessor;
use snapshot::report::CaptureError;
use snapshot::source::postgres::PgSnapshotSource;
use snapshot::types::{Row, SnapshotRequest};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Runs a single snapshot of the configured tables, streaming rows to stdout.
pub async fn start_snapshotter(
    snapshotter_config: SnapshotterConfig,
    channel_capacity: usize,
) -> anyhow::Result<()> {
    let request = SnapshotRequest::from_selectors(&snapshotter_config.tables)?;
    if request.is_empty() {
        bail!("no tables configured, pass at least one --table selector");
    }

    info!(
        host = %snapshotter_config.source.host,
        database = %snapshotter_config.source.name,
        schemas = ?request.schema_names().collect::<Vec<_>>(),
        "starting snapshot"
    );

    let (processor, rows_rx) = ChannelRowProcessor::new(channel_capacity);
    let writer_handle = tokio::spawn(write_rows(rows_rx));

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let shutdown_handle = spawn_shutdown_listener(shutdown_tx);

    let source = PgSnapshotSource::new(snapshotter_config.source);
    let generator = SnapshotGenerator::new(
        source,
        processor,
        snapshotter_config.snapshot,
        shutdown_rx,
    );
    let result = generator.create_snapshot(&request).await;

    // Dropping the generator drops the last sender, which lets the writer drain and stop.
    drop(generator);
    shutdown_handle.abort();

    let rows = writer_handle
        .await
        .context("row writer task panicked")?
        .context("failed to write rows to stdout")?;

    match result {
        Ok(()) => {
            info!(rows, "snapshot completed");
            Ok(())
        }
        Err(err) => {
            log_capture_error(&err);
            Err(err.into())
        }
    }
}

/// Writes each row as a JSON line and returns the number of rows written.
async fn write_rows(mut rows_rx: mpsc::Receiver<Row>) -> anyhow::Result<u64> {
    let mut stdout = BufWriter::new(tokio::io::stdout());
    let mut rows: u64 = 0;

    while let Some(row) = rows_rx.recv().await {
        let mut line = serde_json::to_vec(&row.to_json())?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        rows += 1;
    }

    stdout.flush().await?;

    Ok(rows)
}

fn spawn_shutdown_listener(shutdown_tx: ShutdownTx) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;

        if let Err(err) = shutdown_tx.shutdown() {
            warn!(error = ?err, "failed to send shutdown signal");
            return;
        }

        info!("shutdown signal sent to the snapshot");
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!(
                error = %err,
                "failed to register sigterm handler, only ctrl+c stops the snapshot"
            );
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = sigterm.recv() => {
            info!("sigterm received, canceling snapshot");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("sigint (ctrl+c) received, canceling snapshot"),
        Err(err) => {
            error!(error = %err, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    }
}

fn log_capture_error(err: &CaptureError) {
    let Some(errors) = err.partial() else {
        error!(error = %err, "snapshot aborted");
        return;
    };

    for schema_errors in errors.schemas() {
        for global_error in &schema_errors.global_errors {
            error!(schema = %schema_errors.schema, error = %global_error, "schema snapshot failed");
        }
        for (table, table_error) in &schema_errors.table_errors {
            error!(
                schema = %schema_errors.schema,
                table = %table,
                error = %table_error,
                "table snapshot failed"
            );
        }
    }
}
