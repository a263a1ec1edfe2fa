//! Access to the snapshotted database.
//!
//! A [`SnapshotSource`] exports a snapshot once per run through a [`SnapshotExporter`] and opens
//! any number of [`SnapshotReader`]s that see exactly the data visible to that snapshot.

pub mod postgres;

use std::fmt;
use std::future::Future;

use ::postgres::schema::TableName;
use ::postgres::types::Oid;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::SnapshotResult;
use crate::types::{PageRange, TableInfo};

/// Identifier of an exported snapshot, as returned by `pg_export_snapshot()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A column value as read from the wire, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub name: String,
    pub type_oid: Oid,
    /// Binary representation of the value, [`None`] for SQL `NULL`.
    pub value: Option<Bytes>,
}

impl RawField {
    pub fn new(name: impl Into<String>, type_oid: Oid, value: Option<Bytes>) -> Self {
        Self {
            name: name.into(),
            type_oid,
            value,
        }
    }
}

/// A table row as read from the wire, with fields in table column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub fields: Vec<RawField>,
}

impl RawRecord {
    pub fn new(fields: Vec<RawField>) -> Self {
        Self { fields }
    }
}

/// Records of a page range, yielded as the database sends them.
///
/// Nothing is read ahead: the next record is only requested once the previous one was taken.
pub type RecordStream = BoxStream<'static, SnapshotResult<RawRecord>>;

/// Entry point to a database that can export and import snapshots.
pub trait SnapshotSource: Clone + Send + Sync + 'static {
    type Exporter: SnapshotExporter;
    type Reader: SnapshotReader;

    /// Opens a transaction and exports its snapshot.
    ///
    /// The transaction stays open, and the snapshot importable, until
    /// [`SnapshotExporter::release`] is called or the exporter is dropped.
    fn export_snapshot(&self) -> impl Future<Output = SnapshotResult<Self::Exporter>> + Send;

    /// Opens a read-only transaction pinned to the snapshot `snapshot_id`.
    fn open_reader(
        &self,
        snapshot_id: &SnapshotId,
    ) -> impl Future<Output = SnapshotResult<Self::Reader>> + Send;
}

/// Holder of the transaction whose snapshot was exported.
pub trait SnapshotExporter: Send + Sync + 'static {
    fn snapshot_id(&self) -> &SnapshotId;

    /// Ends the exporting transaction. Readers that already imported the snapshot keep it.
    fn release(self) -> impl Future<Output = SnapshotResult<()>> + Send;
}

/// A transaction reading data as of an imported snapshot.
pub trait SnapshotReader: Send + Sync + 'static {
    /// Returns the page count and average page and row sizes of `table_name`.
    fn table_info(
        &self,
        table_name: &TableName,
    ) -> impl Future<Output = SnapshotResult<TableInfo>> + Send;

    /// Returns the sum of the on-disk sizes of `tables` in `schema`.
    fn schema_total_bytes(
        &self,
        schema: &str,
        tables: &[String],
    ) -> impl Future<Output = SnapshotResult<u64>> + Send;

    /// Returns the names of the ordinary tables of `schema`, sorted by name.
    fn list_tables(&self, schema: &str) -> impl Future<Output = SnapshotResult<Vec<String>>> + Send;

    /// Starts reading the rows stored in the pages of `range`.
    ///
    /// The returned future completes once the query was accepted. Rows are then pulled one by one
    /// from the stream, which fails if a row cannot be read.
    fn fetch_page_range(
        &self,
        table_name: &TableName,
        range: PageRange,
    ) -> impl Future<Output = SnapshotResult<RecordStream>> + Send;

    /// Returns the number of rows stored in the pages of `range`.
    fn count_page_range(
        &self,
        table_name: &TableName,
        range: PageRange,
    ) -> impl Future<Output = SnapshotResult<u64>> + Send;

    /// Ends the reading transaction.
    fn release(self) -> impl Future<Output = SnapshotResult<()>> + Send;
}
