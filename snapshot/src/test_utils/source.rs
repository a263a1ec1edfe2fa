use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{StreamExt, stream};
use tokio::sync::Notify;

use crate::error::{ErrorKind, SnapshotResult};
use crate::snapshot_error;
use crate::source::{
    RawRecord, RecordStream, SnapshotExporter, SnapshotId, SnapshotReader, SnapshotSource,
};
use crate::types::{PageRange, TableInfo, TableName};

/// Identifier of the snapshot exported by [`MockSource`].
pub const MOCK_SNAPSHOT_ID: &str = "00000003-0000001B-1";

/// Content and statistics of a table served by [`MockSource`].
///
/// The statistics are independent of the pages, so they can be made stale on purpose.
#[derive(Debug, Clone)]
pub struct MockTable {
    pub name: TableName,
    pub info: TableInfo,
    pub total_bytes: u64,
    pub pages: BTreeMap<u64, Vec<RawRecord>>,
}

impl MockTable {
    pub fn new(name: TableName, info: TableInfo) -> Self {
        Self {
            name,
            info,
            total_bytes: 0,
            pages: BTreeMap::new(),
        }
    }

    pub fn with_page(mut self, page: u64, records: Vec<RawRecord>) -> Self {
        self.pages.entry(page).or_default().extend(records);
        self
    }

    pub fn with_total_bytes(mut self, total_bytes: u64) -> Self {
        self.total_bytes = total_bytes;
        self
    }

    fn records_in(&self, range: PageRange) -> Vec<RawRecord> {
        self.pages
            .range(range.start..range.end)
            .flat_map(|(_, records)| records.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Default)]
struct Failures {
    export: bool,
    import: bool,
    stats: HashSet<TableName>,
    fetch: HashSet<TableName>,
    fetch_after: HashMap<TableName, usize>,
    total_bytes: HashSet<String>,
    list_tables: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Mutex<BTreeMap<TableName, MockTable>>,
    failures: Mutex<Failures>,
    fetch_delay: Mutex<Option<Duration>>,
    hang_fetches: AtomicBool,
    fetch_started: Arc<Notify>,

    exports: AtomicUsize,
    exporter_released: AtomicBool,
    readers_opened: AtomicUsize,
    open_readers: AtomicUsize,
    max_open_readers: AtomicUsize,
    reads_after_release: AtomicUsize,
    yielded_records: AtomicUsize,
    fetched_ranges: Mutex<Vec<(TableName, PageRange)>>,
    counted_ranges: Mutex<Vec<(TableName, PageRange)>>,
}

/// In-memory [`SnapshotSource`] for tests.
///
/// Keeps track of the readers it opened so tests can check the connection bounds and that no
/// reader outlived the exported snapshot.
#[derive(Debug, Clone, Default)]
pub struct MockSource {
    inner: Arc<Inner>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: MockTable) -> Self {
        self.inner
            .tables
            .lock()
            .unwrap()
            .insert(table.name.clone(), table);
        self
    }

    pub fn fail_export(self) -> Self {
        self.inner.failures.lock().unwrap().export = true;
        self
    }

    pub fn fail_import(self) -> Self {
        self.inner.failures.lock().unwrap().import = true;
        self
    }

    pub fn fail_stats(self, table_name: TableName) -> Self {
        self.inner.failures.lock().unwrap().stats.insert(table_name);
        self
    }

    pub fn fail_fetch(self, table_name: TableName) -> Self {
        self.inner.failures.lock().unwrap().fetch.insert(table_name);
        self
    }

    /// Makes every page range stream of `table_name` fail after yielding `records` records.
    pub fn fail_fetch_after(self, table_name: TableName, records: usize) -> Self {
        self.inner
            .failures
            .lock()
            .unwrap()
            .fetch_after
            .insert(table_name, records);
        self
    }

    pub fn fail_total_bytes(self, schema: &str) -> Self {
        self.inner
            .failures
            .lock()
            .unwrap()
            .total_bytes
            .insert(schema.to_string());
        self
    }

    pub fn fail_list_tables(self, schema: &str) -> Self {
        self.inner
            .failures
            .lock()
            .unwrap()
            .list_tables
            .insert(schema.to_string());
        self
    }

    /// Delays every fetch, so that concurrent readers overlap.
    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        *self.inner.fetch_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Makes every fetch wait forever.
    pub fn hang_fetches(self) -> Self {
        self.inner.hang_fetches.store(true, Ordering::SeqCst);
        self
    }

    /// Notified every time a fetch starts.
    pub fn fetch_started(&self) -> Arc<Notify> {
        self.inner.fetch_started.clone()
    }

    pub fn exports(&self) -> usize {
        self.inner.exports.load(Ordering::SeqCst)
    }

    pub fn exporter_released(&self) -> bool {
        self.inner.exporter_released.load(Ordering::SeqCst)
    }

    pub fn readers_opened(&self) -> usize {
        self.inner.readers_opened.load(Ordering::SeqCst)
    }

    pub fn open_readers(&self) -> usize {
        self.inner.open_readers.load(Ordering::SeqCst)
    }

    pub fn max_open_readers(&self) -> usize {
        self.inner.max_open_readers.load(Ordering::SeqCst)
    }

    /// Number of reads issued after the exported snapshot was released.
    pub fn reads_after_release(&self) -> usize {
        self.inner.reads_after_release.load(Ordering::SeqCst)
    }

    /// Number of records pulled from page range streams, across all tables.
    pub fn yielded_records(&self) -> usize {
        self.inner.yielded_records.load(Ordering::SeqCst)
    }

    /// Returns the ranges fetched for `table_name`, sorted by start page.
    pub fn fetched_ranges(&self, table_name: &TableName) -> Vec<PageRange> {
        let mut ranges: Vec<_> = self
            .inner
            .fetched_ranges
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == table_name)
            .map(|(_, range)| *range)
            .collect();
        ranges.sort();

        ranges
    }

    /// Returns the ranges counted for `table_name`, in the order they were counted.
    pub fn counted_ranges(&self, table_name: &TableName) -> Vec<PageRange> {
        self.inner
            .counted_ranges
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == table_name)
            .map(|(_, range)| *range)
            .collect()
    }
}

impl SnapshotSource for MockSource {
    type Exporter = MockExporter;
    type Reader = MockReader;

    async fn export_snapshot(&self) -> SnapshotResult<Self::Exporter> {
        if self.inner.failures.lock().unwrap().export {
            return Err(snapshot_error!(
                ErrorKind::SourceQueryFailed,
                "pg_export_snapshot failed"
            ));
        }

        self.inner.exports.fetch_add(1, Ordering::SeqCst);

        Ok(MockExporter {
            inner: self.inner.clone(),
            snapshot_id: SnapshotId::new(MOCK_SNAPSHOT_ID),
        })
    }

    async fn open_reader(&self, snapshot_id: &SnapshotId) -> SnapshotResult<Self::Reader> {
        if self.inner.failures.lock().unwrap().import {
            return Err(snapshot_error!(
                ErrorKind::SourceQueryFailed,
                "invalid snapshot identifier",
                snapshot_id.to_string()
            ));
        }

        if self.inner.exporter_released.load(Ordering::SeqCst) {
            self.inner.reads_after_release.fetch_add(1, Ordering::SeqCst);
        }

        self.inner.readers_opened.fetch_add(1, Ordering::SeqCst);
        let open_readers = self.inner.open_readers.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .max_open_readers
            .fetch_max(open_readers, Ordering::SeqCst);

        Ok(MockReader {
            inner: self.inner.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MockExporter {
    inner: Arc<Inner>,
    snapshot_id: SnapshotId,
}

impl SnapshotExporter for MockExporter {
    fn snapshot_id(&self) -> &SnapshotId {
        &self.snapshot_id
    }

    async fn release(self) -> SnapshotResult<()> {
        self.inner.exporter_released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Reader of a [`MockSource`]. Dropping it closes it.
#[derive(Debug)]
pub struct MockReader {
    inner: Arc<Inner>,
}

impl MockReader {
    fn table(&self, table_name: &TableName) -> SnapshotResult<MockTable> {
        self.check_snapshot();

        self.inner
            .tables
            .lock()
            .unwrap()
            .get(table_name)
            .cloned()
            .ok_or_else(|| {
                snapshot_error!(
                    ErrorKind::TableNotFound,
                    "Table not found in source database",
                    table_name.to_string()
                )
            })
    }

    fn check_snapshot(&self) {
        if self.inner.exporter_released.load(Ordering::SeqCst) {
            self.inner.reads_after_release.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockReader {
    fn drop(&mut self) {
        self.inner.open_readers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SnapshotReader for MockReader {
    async fn table_info(&self, table_name: &TableName) -> SnapshotResult<TableInfo> {
        if self.inner.failures.lock().unwrap().stats.contains(table_name) {
            return Err(snapshot_error!(
                ErrorKind::SourceQueryFailed,
                "relation statistics unavailable",
                table_name.to_string()
            ));
        }

        Ok(self.table(table_name)?.info)
    }

    async fn schema_total_bytes(&self, schema: &str, tables: &[String]) -> SnapshotResult<u64> {
        self.check_snapshot();

        if self
            .inner
            .failures
            .lock()
            .unwrap()
            .total_bytes
            .contains(schema)
        {
            return Err(snapshot_error!(
                ErrorKind::SourceQueryFailed,
                "pg_table_size failed",
                schema
            ));
        }

        let total_bytes = self
            .inner
            .tables
            .lock()
            .unwrap()
            .values()
            .filter(|table| table.name.schema == schema && tables.contains(&table.name.name))
            .map(|table| table.total_bytes)
            .sum();

        Ok(total_bytes)
    }

    async fn list_tables(&self, schema: &str) -> SnapshotResult<Vec<String>> {
        self.check_snapshot();

        if self
            .inner
            .failures
            .lock()
            .unwrap()
            .list_tables
            .contains(schema)
        {
            return Err(snapshot_error!(
                ErrorKind::SourceQueryFailed,
                "pg_class lookup failed",
                schema
            ));
        }

        // Tables are keyed by schema then name, so they come out sorted.
        Ok(self
            .inner
            .tables
            .lock()
            .unwrap()
            .keys()
            .filter(|name| name.schema == schema)
            .map(|name| name.name.clone())
            .collect())
    }

    async fn fetch_page_range(
        &self,
        table_name: &TableName,
        range: PageRange,
    ) -> SnapshotResult<RecordStream> {
        self.inner
            .fetched_ranges
            .lock()
            .unwrap()
            .push((table_name.clone(), range));
        self.inner.fetch_started.notify_one();

        if self.inner.hang_fetches.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let fetch_delay = *self.inner.fetch_delay.lock().unwrap();
        if let Some(delay) = fetch_delay {
            tokio::time::sleep(delay).await;
        }

        if self.inner.failures.lock().unwrap().fetch.contains(table_name) {
            return Err(snapshot_error!(
                ErrorKind::SourceQueryFailed,
                "page range query failed",
                format!("{table_name} {range}")
            ));
        }

        let records = self.table(table_name)?.records_in(range);
        let fail_after = self
            .inner
            .failures
            .lock()
            .unwrap()
            .fetch_after
            .get(table_name)
            .copied();

        let mut items: Vec<SnapshotResult<RawRecord>> = records.into_iter().map(Ok).collect();
        if let Some(fail_after) = fail_after {
            items.truncate(fail_after);
            items.push(Err(snapshot_error!(
                ErrorKind::SourceQueryFailed,
                "connection lost while reading rows",
                format!("{table_name} {range}")
            )));
        }

        // Records are counted when pulled, not when the range is fetched.
        let inner = self.inner.clone();
        let records = stream::iter(items).map(move |item| {
            inner.yielded_records.fetch_add(1, Ordering::SeqCst);
            item
        });

        Ok(records.boxed())
    }

    async fn count_page_range(
        &self,
        table_name: &TableName,
        range: PageRange,
    ) -> SnapshotResult<u64> {
        self.inner
            .counted_ranges
            .lock()
            .unwrap()
            .push((table_name.clone(), range));

        Ok(self.table(table_name)?.records_in(range).len() as u64)
    }

    async fn release(self) -> SnapshotResult<()> {
        self.check_snapshot();
        Ok(())
    }
}
