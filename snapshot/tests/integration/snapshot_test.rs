use std::sync::Arc;

use config::shared::SnapshotConfig;
use snapshot::concurrency::shutdown::create_shutdown_channel;
use snapshot::generator::SnapshotGenerator;
use snapshot::processor::memory::MemoryRowProcessor;
use snapshot::test_utils::progress::RecordingProgressBarBuilder;
use snapshot::test_utils::record::{
    id_records, int4_field, null_field, point_field, record, text_field, uuid_field,
};
use snapshot::test_utils::source::{MockSource, MockTable};
use snapshot::types::{Cell, PageRange, SnapshotRequest, TableInfo, TableName, Type};
use telemetry::tracing::init_test_tracing;
use uuid::Uuid;

fn generator(
    source: &MockSource,
    processor: &MemoryRowProcessor,
    config: SnapshotConfig,
) -> SnapshotGenerator<MockSource, MemoryRowProcessor> {
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    SnapshotGenerator::new(source.clone(), processor.clone(), config, shutdown_rx)
}

fn users() -> TableName {
    TableName::new("public", "users")
}

#[tokio::test(flavor = "multi_thread")]
async fn single_page_table_emits_typed_row() {
    init_test_tracing();

    let id = Uuid::new_v4();
    let source = MockSource::new().with_table(
        MockTable::new(users(), TableInfo::new(0, 1024, 512)).with_page(
            0,
            vec![record(vec![uuid_field("id", id), text_field("name", "alice")])],
        ),
    );
    let processor = MemoryRowProcessor::new();

    let request = SnapshotRequest::new().with_tables("public", ["users"]);
    generator(&source, &processor, SnapshotConfig::default())
        .create_snapshot(&request)
        .await
        .unwrap();

    let rows = processor.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].schema(), "public");
    assert_eq!(rows[0].table(), "users");
    assert_eq!(rows[0].columns.len(), 2);
    assert_eq!(rows[0].columns[0].name, "id");
    assert_eq!(rows[0].columns[0].typ, Type::UUID);
    assert_eq!(rows[0].columns[0].value, Cell::Uuid(id));
    assert_eq!(rows[0].columns[1].name, "name");
    assert_eq!(rows[0].columns[1].value, Cell::String("alice".to_string()));

    assert_eq!(source.fetched_ranges(&users()), [PageRange::new(0, 1)]);
    assert_eq!(source.counted_ranges(&users()), [PageRange::new(1, 2)]);

    assert_eq!(source.exports(), 1);
    assert!(source.exporter_released());
    assert_eq!(source.reads_after_release(), 0);
    assert_eq!(source.open_readers(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn page_past_stale_statistics_is_captured() {
    init_test_tracing();

    let source = MockSource::new().with_table(
        MockTable::new(users(), TableInfo::new(0, 1024, 512))
            .with_page(0, vec![record(vec![text_field("name", "alice")])])
            .with_page(1, vec![record(vec![text_field("name", "bob")])]),
    );
    let processor = MemoryRowProcessor::new();

    let request = SnapshotRequest::new().with_tables("public", ["users"]);
    generator(&source, &processor, SnapshotConfig::default())
        .create_snapshot(&request)
        .await
        .unwrap();

    let mut names: Vec<_> = processor
        .rows()
        .await
        .into_iter()
        .map(|row| row.columns[0].value.clone())
        .collect();
    names.sort_by_key(|cell| format!("{cell:?}"));
    assert_eq!(
        names,
        [
            Cell::String("alice".to_string()),
            Cell::String("bob".to_string())
        ]
    );

    assert_eq!(
        source.fetched_ranges(&users()),
        [PageRange::new(0, 1), PageRange::new(1, 2)]
    );
    assert_eq!(
        source.counted_ranges(&users()),
        [PageRange::new(1, 2), PageRange::new(2, 3)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn consecutive_stale_pages_are_fetched_in_order() {
    init_test_tracing();

    let mut table = MockTable::new(users(), TableInfo::new(2, 8192, 100));
    for page in 0..5 {
        table = table.with_page(page, id_records(page as i32 * 10, 3));
    }
    let source = MockSource::new().with_table(table);
    let processor = MemoryRowProcessor::new();

    let config = SnapshotConfig {
        batch_bytes: 8192,
        ..SnapshotConfig::default()
    };
    let request = SnapshotRequest::new().with_tables("public", ["users"]);
    generator(&source, &processor, config)
        .create_snapshot(&request)
        .await
        .unwrap();

    assert_eq!(processor.rows().await.len(), 15);
    assert_eq!(
        source.fetched_ranges(&users()),
        (0..5)
            .map(|page| PageRange::new(page, page + 1))
            .collect::<Vec<_>>()
    );
    assert_eq!(
        source.counted_ranges(&users()),
        (2..6)
            .map(|page| PageRange::new(page, page + 1))
            .collect::<Vec<_>>()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn accurate_statistics_need_a_single_tail_count() {
    init_test_tracing();

    let mut table = MockTable::new(users(), TableInfo::new(20, 8192, 100));
    for page in 0..20 {
        table = table.with_page(page, id_records(page as i32, 1));
    }
    let source = MockSource::new().with_table(table);
    let processor = MemoryRowProcessor::new();

    let config = SnapshotConfig {
        batch_bytes: 2 * 8192,
        max_range_workers: 3,
        ..SnapshotConfig::default()
    };
    let request = SnapshotRequest::new().with_tables("public", ["users"]);
    generator(&source, &processor, config)
        .create_snapshot(&request)
        .await
        .unwrap();

    let mut ids: Vec<_> = processor
        .rows()
        .await
        .into_iter()
        .map(|row| match row.columns[0].value {
            Cell::I32(id) => id,
            ref other => panic!("unexpected cell {other:?}"),
        })
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..20).collect::<Vec<_>>());

    assert_eq!(
        source.fetched_ranges(&users()),
        (0..10)
            .map(|index| PageRange::new(index * 2, index * 2 + 2))
            .collect::<Vec<_>>()
    );
    assert_eq!(source.counted_ranges(&users()), [PageRange::new(20, 21)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unsupported_columns_are_dropped() {
    init_test_tracing();

    let source = MockSource::new().with_table(
        MockTable::new(users(), TableInfo::new(1, 8192, 64)).with_page(
            0,
            vec![
                record(vec![int4_field("id", 1), point_field("location", 1.0, 2.0)]),
                record(vec![point_field("location", 3.0, 4.0)]),
                record(vec![int4_field("id", 3), null_field("nickname", &Type::TEXT)]),
            ],
        ),
    );
    let processor = MemoryRowProcessor::new();

    let request = SnapshotRequest::new().with_tables("public", ["users"]);
    generator(&source, &processor, SnapshotConfig::default())
        .create_snapshot(&request)
        .await
        .unwrap();

    let rows = processor.rows().await;
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].columns.len(), 1);
    assert_eq!(rows[0].column("id").map(|column| &column.value), Some(&Cell::I32(1)));
    assert!(rows[0].column("location").is_none());

    // Rows without any supported column are still emitted.
    assert!(rows[1].columns.is_empty());

    assert_eq!(
        rows[2].column("nickname").map(|column| &column.value),
        Some(&Cell::Null)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn wildcard_selects_every_table_of_the_schema() {
    init_test_tracing();

    let events = TableName::new("audit", "events");
    let logins = TableName::new("audit", "logins");
    let source = MockSource::new()
        .with_table(
            MockTable::new(events.clone(), TableInfo::new(1, 8192, 64))
                .with_page(0, id_records(0, 2)),
        )
        .with_table(
            MockTable::new(logins.clone(), TableInfo::new(1, 8192, 64))
                .with_page(0, id_records(0, 3)),
        )
        .with_table(
            MockTable::new(users(), TableInfo::new(1, 8192, 64)).with_page(0, id_records(0, 4)),
        );
    let processor = MemoryRowProcessor::new();

    let request = SnapshotRequest::from_selectors(["audit.*"]).unwrap();
    generator(&source, &processor, SnapshotConfig::default())
        .create_snapshot(&request)
        .await
        .unwrap();

    assert_eq!(processor.table_rows(&events).await.len(), 2);
    assert_eq!(processor.table_rows(&logins).await.len(), 3);
    assert!(processor.table_rows(&users()).await.is_empty());
    assert!(source.fetched_ranges(&users()).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn progress_advances_by_average_row_size() {
    init_test_tracing();

    let source = MockSource::new().with_table(
        MockTable::new(users(), TableInfo::new(1, 8192, 100))
            .with_total_bytes(4096)
            .with_page(0, id_records(0, 3)),
    );
    let processor = MemoryRowProcessor::new();
    let progress = RecordingProgressBarBuilder::new();

    let config = SnapshotConfig {
        progress_tracking: true,
        ..SnapshotConfig::default()
    };
    let request = SnapshotRequest::new().with_tables("public", ["users"]);
    generator(&source, &processor, config)
        .with_progress_bar_builder(Arc::new(progress.clone()))
        .create_snapshot(&request)
        .await
        .unwrap();

    let bar = progress.bar("public").unwrap();
    assert_eq!(bar.total_bytes, 4096);
    assert_eq!(bar.updates(), 3);
    assert_eq!(bar.added_bytes(), 300);
}

#[tokio::test(flavor = "multi_thread")]
async fn progress_is_not_tracked_by_default() {
    init_test_tracing();

    let source = MockSource::new().with_table(
        MockTable::new(users(), TableInfo::new(1, 8192, 100)).with_page(0, id_records(0, 3)),
    );
    let processor = MemoryRowProcessor::new();
    let progress = RecordingProgressBarBuilder::new();

    let request = SnapshotRequest::new().with_tables("public", ["users"]);
    generator(&source, &processor, SnapshotConfig::default())
        .with_progress_bar_builder(Arc::new(progress.clone()))
        .create_snapshot(&request)
        .await
        .unwrap();

    assert!(progress.bars().is_empty());
    // Without wildcard and progress, only the table readers are opened.
    assert_eq!(source.readers_opened(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_request_does_not_export_a_snapshot() {
    init_test_tracing();

    let source = MockSource::new();
    let processor = MemoryRowProcessor::new();

    generator(&source, &processor, SnapshotConfig::default())
        .create_snapshot(&SnapshotRequest::new())
        .await
        .unwrap();

    assert_eq!(source.exports(), 0);
    assert!(processor.rows().await.is_empty());
}
