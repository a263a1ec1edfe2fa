use std::sync::Arc;

use config::shared::SnapshotConfig;
use snapshot::concurrency::shutdown::create_shutdown_channel;
use snapshot::error::ErrorKind;
use snapshot::generator::SnapshotGenerator;
use snapshot::processor::RowProcessor;
use snapshot::processor::memory::MemoryRowProcessor;
use snapshot::report::CaptureError;
use snapshot::test_utils::processor::RejectingRowProcessor;
use snapshot::test_utils::progress::RecordingProgressBarBuilder;
use snapshot::test_utils::record::{corrupt_int4_field, id_records, int4_field, record};
use snapshot::test_utils::source::{MockSource, MockTable};
use snapshot::types::{SnapshotRequest, TableInfo, TableName};
use telemetry::tracing::init_test_tracing;

fn generator<P>(
    source: &MockSource,
    processor: P,
    config: SnapshotConfig,
) -> SnapshotGenerator<MockSource, P>
where
    P: RowProcessor + Clone + Send + Sync + 'static,
{
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    SnapshotGenerator::new(source.clone(), processor, config, shutdown_rx)
}

fn users() -> TableName {
    TableName::new("public", "users")
}

fn orders() -> TableName {
    TableName::new("public", "orders")
}

fn events() -> TableName {
    TableName::new("audit", "events")
}

/// Source with `public.users`, `public.orders` and `audit.events`, each with 5 rows on every one
/// of its 4 pages.
fn source_with_tables() -> MockSource {
    let mut source = MockSource::new();
    for table_name in [users(), orders(), events()] {
        let mut table =
            MockTable::new(table_name, TableInfo::new(4, 8192, 128)).with_total_bytes(4 * 8192);
        for page in 0..4 {
            table = table.with_page(page, id_records(page as i32 * 5, 5));
        }
        source = source.with_table(table);
    }

    source
}

fn request() -> SnapshotRequest {
    SnapshotRequest::new()
        .with_tables("public", ["users", "orders"])
        .with_tables("audit", ["events"])
}

fn two_workers() -> SnapshotConfig {
    SnapshotConfig {
        batch_bytes: 8192,
        max_table_workers: 2,
        max_range_workers: 2,
        ..SnapshotConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn export_failure_is_reported_for_every_schema() {
    init_test_tracing();

    let source = source_with_tables().fail_export();
    let processor = MemoryRowProcessor::new();

    let err = generator(&source, processor.clone(), two_workers())
        .create_snapshot(&request())
        .await
        .unwrap_err();

    let errors = err.partial().unwrap();
    for schema in ["public", "audit"] {
        let schema_errors = errors.schema(schema).unwrap();
        assert!(schema_errors.table_errors.is_empty());
        assert_eq!(schema_errors.global_errors.len(), 1);
        assert_eq!(
            schema_errors.global_errors[0].kind(),
            ErrorKind::SnapshotExportFailed
        );
        assert!(
            schema_errors.global_errors[0]
                .summary()
                .contains("exporting snapshot")
        );
    }

    assert!(processor.rows().await.is_empty());
    assert_eq!(source.readers_opened(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn import_failure_fails_each_table() {
    init_test_tracing();

    let source = source_with_tables().fail_import();
    let processor = MemoryRowProcessor::new();

    let err = generator(&source, processor.clone(), two_workers())
        .create_snapshot(&request())
        .await
        .unwrap_err();

    let errors = err.partial().unwrap();
    assert_eq!(errors.table_error_count(), 3);
    for (schema, table) in [("public", "users"), ("public", "orders"), ("audit", "events")] {
        let error = errors.table_error(schema, table).unwrap();
        assert_eq!(error.kind(), ErrorKind::SnapshotImportFailed);
        assert!(error.summary().contains("setting transaction snapshot"));
    }

    assert!(processor.rows().await.is_empty());
    assert!(source.exporter_released());
}

#[tokio::test(flavor = "multi_thread")]
async fn stats_failure_does_not_affect_other_tables() {
    init_test_tracing();

    let source = source_with_tables().fail_stats(users());
    let processor = MemoryRowProcessor::new();

    let err = generator(&source, processor.clone(), two_workers())
        .create_snapshot(&request())
        .await
        .unwrap_err();

    let errors = err.partial().unwrap();
    assert_eq!(errors.table_error_count(), 1);
    assert_eq!(
        errors.table_error("public", "users").unwrap().kind(),
        ErrorKind::TableStatsFailed
    );
    assert!(errors.schema("audit").is_none());

    assert!(processor.table_rows(&users()).await.is_empty());
    assert_eq!(processor.table_rows(&orders()).await.len(), 20);
    assert_eq!(processor.table_rows(&events()).await.len(), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_table_is_a_table_error() {
    init_test_tracing();

    let source = source_with_tables();
    let processor = MemoryRowProcessor::new();

    let request = SnapshotRequest::new().with_tables("public", ["users", "missing"]);
    let err = generator(&source, processor.clone(), two_workers())
        .create_snapshot(&request)
        .await
        .unwrap_err();

    let errors = err.partial().unwrap();
    assert_eq!(errors.table_error_count(), 1);
    let error = errors.table_error("public", "missing").unwrap();
    assert_eq!(error.kind(), ErrorKind::TableStatsFailed);
    assert!(error.summary().contains("Table not found"));

    assert_eq!(processor.table_rows(&users()).await.len(), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_failure_stops_only_its_table() {
    init_test_tracing();

    let source = source_with_tables().fail_fetch(orders());
    let processor = MemoryRowProcessor::new();

    let err = generator(&source, processor.clone(), two_workers())
        .create_snapshot(&request())
        .await
        .unwrap_err();

    let errors = err.partial().unwrap();
    assert_eq!(errors.table_error_count(), 1);
    assert_eq!(
        errors.table_error("public", "orders").unwrap().kind(),
        ErrorKind::SourceQueryFailed
    );

    assert!(processor.table_rows(&orders()).await.is_empty());
    assert_eq!(processor.table_rows(&users()).await.len(), 20);
    assert_eq!(processor.table_rows(&events()).await.len(), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn row_stream_failure_stops_only_its_table() {
    init_test_tracing();

    let source = source_with_tables().fail_fetch_after(orders(), 2);
    let processor = MemoryRowProcessor::new();
    let config = SnapshotConfig {
        max_range_workers: 1,
        ..two_workers()
    };

    let err = generator(&source, processor.clone(), config)
        .create_snapshot(&request())
        .await
        .unwrap_err();

    let errors = err.partial().unwrap();
    assert_eq!(errors.table_error_count(), 1);
    assert_eq!(
        errors.table_error("public", "orders").unwrap().kind(),
        ErrorKind::SourceQueryFailed
    );

    // Rows read before the connection broke were already handed over.
    assert_eq!(processor.table_rows(&orders()).await.len(), 2);
    assert_eq!(processor.table_rows(&users()).await.len(), 20);
    assert_eq!(processor.table_rows(&events()).await.len(), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_value_fails_its_table() {
    init_test_tracing();

    let source = source_with_tables().with_table(
        MockTable::new(TableName::new("public", "broken"), TableInfo::new(1, 8192, 64))
            .with_page(0, vec![record(vec![int4_field("id", 1)])])
            .with_page(0, vec![record(vec![corrupt_int4_field("id")])]),
    );
    let processor = MemoryRowProcessor::new();

    let request = SnapshotRequest::new().with_tables("public", ["broken", "users"]);
    let err = generator(&source, processor.clone(), two_workers())
        .create_snapshot(&request)
        .await
        .unwrap_err();

    let errors = err.partial().unwrap();
    assert_eq!(errors.table_error_count(), 1);
    assert_eq!(
        errors.table_error("public", "broken").unwrap().kind(),
        ErrorKind::ConversionError
    );
    assert_eq!(processor.table_rows(&users()).await.len(), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_row_fails_its_table() {
    init_test_tracing();

    let source = source_with_tables();
    let memory = MemoryRowProcessor::new();
    let processor = RejectingRowProcessor::wrap(memory.clone(), users());

    let config = SnapshotConfig {
        max_range_workers: 1,
        ..two_workers()
    };
    let err = generator(&source, processor.clone(), config)
        .create_snapshot(&request())
        .await
        .unwrap_err();

    let errors = err.partial().unwrap();
    assert_eq!(errors.table_error_count(), 1);
    assert_eq!(
        errors.table_error("public", "users").unwrap().kind(),
        ErrorKind::ProcessorError
    );

    // A single worker stops at the first rejected row.
    assert_eq!(processor.rejected_rows(), 1);
    assert_eq!(memory.table_rows(&orders()).await.len(), 20);
    assert_eq!(memory.table_rows(&events()).await.len(), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn schema_size_failure_skips_the_schema() {
    init_test_tracing();

    let source = source_with_tables().fail_total_bytes("audit");
    let processor = MemoryRowProcessor::new();
    let progress = RecordingProgressBarBuilder::new();

    let config = SnapshotConfig {
        progress_tracking: true,
        ..two_workers()
    };
    let err = generator(&source, processor.clone(), config)
        .with_progress_bar_builder(Arc::new(progress.clone()))
        .create_snapshot(&request())
        .await
        .unwrap_err();

    let errors = err.partial().unwrap();
    assert_eq!(errors.table_error_count(), 0);
    let audit_errors = errors.schema("audit").unwrap();
    assert_eq!(audit_errors.global_errors.len(), 1);
    assert_eq!(
        audit_errors.global_errors[0].kind(),
        ErrorKind::SchemaSizeFailed
    );

    assert!(source.fetched_ranges(&events()).is_empty());
    assert_eq!(processor.table_rows(&users()).await.len(), 20);
    assert_eq!(processor.table_rows(&orders()).await.len(), 20);

    let public_bar = progress.bar("public").unwrap();
    assert_eq!(public_bar.total_bytes, 2 * 4 * 8192);
    assert_eq!(public_bar.added_bytes(), 40 * 128);
    assert!(progress.bar("audit").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn wildcard_listing_failure_skips_the_schema() {
    init_test_tracing();

    let source = source_with_tables().fail_list_tables("audit");
    let processor = MemoryRowProcessor::new();

    let request = SnapshotRequest::from_selectors(["audit.*", "public.users"]).unwrap();
    let err = generator(&source, processor.clone(), two_workers())
        .create_snapshot(&request)
        .await
        .unwrap_err();

    let errors = err.partial().unwrap();
    assert_eq!(
        errors.schema("audit").unwrap().global_errors[0].kind(),
        ErrorKind::SourceSchemaError
    );
    assert!(processor.table_rows(&events()).await.is_empty());
    assert_eq!(processor.table_rows(&users()).await.len(), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_progress_updates_do_not_fail_the_run() {
    init_test_tracing();

    let source = source_with_tables();
    let processor = MemoryRowProcessor::new();
    let progress = RecordingProgressBarBuilder::failing();

    let config = SnapshotConfig {
        progress_tracking: true,
        ..two_workers()
    };
    generator(&source, processor.clone(), config)
        .with_progress_bar_builder(Arc::new(progress.clone()))
        .create_snapshot(&request())
        .await
        .unwrap();

    assert_eq!(processor.rows().await.len(), 60);
    let updates: u64 = progress.bars().iter().map(|bar| bar.updates()).sum();
    assert_eq!(updates, 60);
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_errors_render_table_by_table() {
    init_test_tracing();

    let source = source_with_tables().fail_stats(users()).fail_fetch(events());
    let processor = MemoryRowProcessor::new();

    let err = generator(&source, processor, two_workers())
        .create_snapshot(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, CaptureError::Partial(_)));
    let rendered = err.to_string();
    assert!(rendered.starts_with("snapshot completed with errors: "));
    assert!(rendered.contains("table `audit.events`: "));
    assert!(rendered.contains("table `public.users`: Error getting page information for table"));
}
