use std::sync::Arc;
use std::time::Duration;

use config::shared::SnapshotConfig;
use snapshot::concurrency::shutdown::create_shutdown_channel;
use snapshot::error::ErrorKind;
use snapshot::generator::SnapshotGenerator;
use snapshot::processor::channel::ChannelRowProcessor;
use snapshot::processor::memory::MemoryRowProcessor;
use snapshot::report::CaptureError;
use snapshot::test_utils::notify::TimedNotify;
use snapshot::test_utils::progress::RecordingProgressBarBuilder;
use snapshot::test_utils::record::id_records;
use snapshot::test_utils::source::{MockSource, MockTable};
use snapshot::types::{SnapshotRequest, TableInfo, TableName};
use telemetry::tracing::init_test_tracing;

/// Source with `tables_per_schema` tables in each of `schemas`, every table having 2 rows on
/// each of its 8 pages.
fn source_with_tables(schemas: &[&str], tables_per_schema: usize) -> MockSource {
    let mut source = MockSource::new();
    for schema in schemas {
        for index in 0..tables_per_schema {
            let table_name = TableName::new(*schema, format!("table_{index}"));
            let mut table = MockTable::new(table_name, TableInfo::new(8, 8192, 64))
                .with_total_bytes(8 * 8192);
            for page in 0..8 {
                table = table.with_page(page, id_records(page as i32 * 2, 2));
            }
            source = source.with_table(table);
        }
    }

    source
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn open_readers_stay_within_worker_bounds() {
    init_test_tracing();

    let source = source_with_tables(&["public", "audit"], 4)
        .with_fetch_delay(Duration::from_millis(10));
    let processor = MemoryRowProcessor::new();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let config = SnapshotConfig {
        batch_bytes: 8192,
        max_table_workers: 2,
        max_range_workers: 3,
        progress_tracking: true,
    };
    let max_readers = config.max_reader_connections();

    let request = SnapshotRequest::from_selectors(["public.*", "audit.*"]).unwrap();
    SnapshotGenerator::new(source.clone(), processor.clone(), config, shutdown_rx)
        .with_progress_bar_builder(Arc::new(RecordingProgressBarBuilder::new()))
        .create_snapshot(&request)
        .await
        .unwrap();

    assert_eq!(processor.rows().await.len(), 2 * 4 * 16);
    assert!(source.max_open_readers() > 1);
    assert!(source.max_open_readers() <= max_readers);

    // The snapshot was exported once and outlived every reader.
    assert_eq!(source.exports(), 1);
    assert_eq!(source.open_readers(), 0);
    assert_eq!(source.reads_after_release(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn single_range_table_opens_a_single_reader() {
    init_test_tracing();

    let table_name = TableName::new("public", "small");
    let source = MockSource::new().with_table(
        MockTable::new(table_name.clone(), TableInfo::new(1, 8192, 64))
            .with_page(0, id_records(0, 4)),
    );
    let processor = MemoryRowProcessor::new();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let config = SnapshotConfig {
        max_range_workers: 8,
        ..SnapshotConfig::default()
    };
    let request = SnapshotRequest::new().with_tables("public", ["small"]);
    SnapshotGenerator::new(source.clone(), processor.clone(), config, shutdown_rx)
        .create_snapshot(&request)
        .await
        .unwrap();

    assert_eq!(processor.table_rows(&table_name).await.len(), 4);
    assert_eq!(source.readers_opened(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_aborts_running_snapshot() {
    init_test_tracing();

    let source = source_with_tables(&["public"], 2)
        .fail_stats(TableName::new("public", "table_1"))
        .hang_fetches();
    let fetch_started = TimedNotify::new(source.fetch_started());
    let processor = MemoryRowProcessor::new();
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let generator = SnapshotGenerator::new(
        source.clone(),
        processor.clone(),
        SnapshotConfig::default(),
        shutdown_rx,
    );
    let request = SnapshotRequest::from_selectors(["public.*"]).unwrap();

    let (result, ()) = tokio::join!(generator.create_snapshot(&request), async {
        fetch_started.notified().await;
        shutdown_tx.shutdown().unwrap();
    });

    // Cancellation wins over the failed statistics of `table_1`.
    let err = result.unwrap_err();
    let CaptureError::Aborted(err) = err else {
        panic!("expected an aborted snapshot, got {err:?}");
    };
    assert_eq!(err.kind(), ErrorKind::SnapshotCanceled);

    assert!(processor.rows().await.is_empty());
    assert!(source.exporter_released());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_before_start_exports_nothing() {
    init_test_tracing();

    let source = source_with_tables(&["public"], 1);
    let processor = MemoryRowProcessor::new();
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    shutdown_tx.shutdown().unwrap();

    let request = SnapshotRequest::from_selectors(["public.table_0"]).unwrap();
    let generator =
        SnapshotGenerator::new(source.clone(), processor, SnapshotConfig::default(), shutdown_rx);
    let err = generator
        .create_snapshot(&request)
        .await
        .unwrap_err();

    assert!(matches!(err, CaptureError::Aborted(_)));
    assert_eq!(source.exports(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocked_processor_pauses_range_reads() {
    init_test_tracing();

    let table_name = TableName::new("public", "small");
    let source = MockSource::new().with_table(
        MockTable::new(table_name.clone(), TableInfo::new(1, 8192, 64))
            .with_page(0, id_records(0, 10)),
    );
    let (processor, mut rows_rx) = ChannelRowProcessor::new(1);
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let generator =
        SnapshotGenerator::new(source.clone(), processor, SnapshotConfig::default(), shutdown_rx);
    let request = SnapshotRequest::new().with_tables("public", ["small"]);

    let (result, (yielded_while_blocked, received)) =
        tokio::join!(generator.create_snapshot(&request), async {
            tokio::time::timeout(Duration::from_secs(5), async {
                while source.yielded_records() < 2 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            let yielded_while_blocked = source.yielded_records();

            let mut received = 0;
            while received < 10 {
                rows_rx.recv().await.unwrap();
                received += 1;
            }

            (yielded_while_blocked, received)
        });

    result.unwrap();
    // One row waits in the channel and one in the blocked send.
    assert_eq!(yielded_while_blocked, 2);
    assert_eq!(received, 10);
    assert_eq!(source.yielded_records(), 10);
}
