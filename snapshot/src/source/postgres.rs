use std::error;
use std::io::BufReader;
use std::sync::Arc;

use ::postgres::schema::{TableName, quote_string_literal};
use bytes::Bytes;
use config::shared::{IntoConnectOptions, PgConnectionConfig};
use futures::{StreamExt, TryStreamExt};
use rustls::ClientConfig;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, Config, Connection, NoTls, Row, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error, info};

use crate::bail;
use crate::error::{ErrorKind, SnapshotError, SnapshotResult};
use crate::source::{
    RawField, RawRecord, RecordStream, SnapshotExporter, SnapshotId, SnapshotReader,
    SnapshotSource,
};
use crate::types::{PageRange, TableInfo};

/// Starts the transaction of both the exporting and the importing connections.
const BEGIN_SNAPSHOT_TRANSACTION: &str = "begin read only isolation level repeatable read;";

const EXPORT_SNAPSHOT_QUERY: &str = "select pg_export_snapshot();";

/// Page count and average page and row sizes of a table. `reltuples` is -1 for tables that were
/// never vacuumed or analyzed.
const TABLE_INFO_QUERY: &str = r#"
    select c.relpages,
        coalesce(pg_relation_size(c.oid) / nullif(c.relpages, 0), 0)::int8 as avg_page_bytes,
        coalesce(pg_relation_size(c.oid) / nullif(greatest(c.reltuples, 0), 0), 0)::int8 as avg_row_bytes
    from pg_class c
    join pg_namespace n on n.oid = c.relnamespace
    where c.relname = $1 and n.nspname = $2
"#;

const SCHEMA_TOTAL_BYTES_QUERY: &str = r#"
    select coalesce(sum(pg_table_size(c.oid)), 0)::int8
    from pg_class c
    join pg_namespace n on n.oid = c.relnamespace
    where n.nspname = $1 and c.relname = any($2)
"#;

const LIST_TABLES_QUERY: &str = r#"
    select c.relname::text
    from pg_class c
    join pg_namespace n on n.oid = c.relnamespace
    where n.nspname = $1 and c.relkind = 'r'
    order by c.relname
"#;

/// Spawns a task driving `connection`, which ends when the owning [`Client`] is dropped.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        if let Err(err) = connection.await {
            error!("an error occurred during the postgres connection: {}", err);
        }
    }
    .instrument(span);

    tokio::spawn(task);
}

/// Builds the `select` reading the pages of `range`.
///
/// Offsets within a page start at 1, so `(page, 0)` sorts before every tuple of `page`.
fn page_range_query(table_name: &TableName, range: PageRange) -> String {
    format!(
        "select * from {} where ctid >= '({},0)'::tid and ctid < '({},0)'::tid",
        table_name.as_quoted_identifier(),
        range.start,
        range.end
    )
}

fn page_range_count_query(table_name: &TableName, range: PageRange) -> String {
    format!(
        "select count(*) from {} where ctid >= '({},0)'::tid and ctid < '({},0)'::tid",
        table_name.as_quoted_identifier(),
        range.start,
        range.end
    )
}

/// Binary value of any column type, kept undecoded.
struct WireValue(Option<Bytes>);

impl<'a> FromSql<'a> for WireValue {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn error::Error + Sync + Send>> {
        Ok(WireValue(Some(Bytes::copy_from_slice(raw))))
    }

    fn from_sql_null(_: &Type) -> Result<Self, Box<dyn error::Error + Sync + Send>> {
        Ok(WireValue(None))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// Copies the name, type oid and binary value of every column of `row`.
fn raw_record(row: &Row) -> SnapshotResult<RawRecord> {
    let mut fields = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let WireValue(value) = row.try_get(index)?;
        fields.push(RawField::new(column.name(), column.type_().oid(), value));
    }

    Ok(RawRecord::new(fields))
}

/// [`SnapshotSource`] backed by a Postgres database, opening one connection per transaction.
#[derive(Debug, Clone)]
pub struct PgSnapshotSource {
    config: Arc<PgConnectionConfig>,
}

impl PgSnapshotSource {
    pub fn new(config: PgConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn connect(&self) -> SnapshotResult<Client> {
        if self.config.tls.enabled {
            self.connect_tls().await
        } else {
            self.connect_no_tls().await
        }
    }

    async fn connect_no_tls(&self) -> SnapshotResult<Client> {
        let config: Config = self.config.with_db();
        let (client, connection) = config.connect(NoTls).await?;
        spawn_postgres_connection::<NoTls>(connection);

        debug!("connected to postgres without tls");

        Ok(client)
    }

    async fn connect_tls(&self) -> SnapshotResult<Client> {
        let config: Config = self.config.with_db();

        let mut root_store = rustls::RootCertStore::empty();
        let mut root_certs_reader = BufReader::new(self.config.tls.trusted_root_certs.as_bytes());
        for cert in rustls_pemfile::certs(&mut root_certs_reader) {
            root_store.add(cert?)?;
        }

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let (client, connection) = config.connect(MakeRustlsConnect::new(tls_config)).await?;
        spawn_postgres_connection::<MakeRustlsConnect>(connection);

        debug!("connected to postgres with tls");

        Ok(client)
    }
}

impl SnapshotSource for PgSnapshotSource {
    type Exporter = PgSnapshotExporter;
    type Reader = PgSnapshotReader;

    async fn export_snapshot(&self) -> SnapshotResult<Self::Exporter> {
        let client = self.connect().await?;
        client.simple_query(BEGIN_SNAPSHOT_TRANSACTION).await?;

        let row = client.query_one(EXPORT_SNAPSHOT_QUERY, &[]).await?;
        let snapshot_id = SnapshotId::new(row.try_get::<_, String>(0)?);

        info!(%snapshot_id, "exported snapshot");

        Ok(PgSnapshotExporter {
            client,
            snapshot_id,
        })
    }

    async fn open_reader(&self, snapshot_id: &SnapshotId) -> SnapshotResult<Self::Reader> {
        let client = self.connect().await?;
        client.simple_query(BEGIN_SNAPSHOT_TRANSACTION).await?;

        // Must be the first statement of the transaction.
        let set_snapshot = format!(
            "set transaction snapshot {};",
            quote_string_literal(snapshot_id.as_str())
        );
        client.simple_query(&set_snapshot).await?;

        Ok(PgSnapshotReader { client })
    }
}

/// Connection holding the transaction whose snapshot was exported.
pub struct PgSnapshotExporter {
    client: Client,
    snapshot_id: SnapshotId,
}

impl SnapshotExporter for PgSnapshotExporter {
    fn snapshot_id(&self) -> &SnapshotId {
        &self.snapshot_id
    }

    async fn release(self) -> SnapshotResult<()> {
        self.client.simple_query("commit;").await?;

        Ok(())
    }
}

/// Connection whose transaction imported an exported snapshot.
pub struct PgSnapshotReader {
    client: Client,
}

impl SnapshotReader for PgSnapshotReader {
    async fn table_info(&self, table_name: &TableName) -> SnapshotResult<TableInfo> {
        let Some(row) = self
            .client
            .query_opt(TABLE_INFO_QUERY, &[&table_name.name, &table_name.schema])
            .await?
        else {
            bail!(
                ErrorKind::TableNotFound,
                "Table not found in source database",
                table_name.to_string()
            );
        };

        let page_count: i32 = row.try_get(0)?;
        let avg_page_bytes: i64 = row.try_get(1)?;
        let avg_row_bytes: i64 = row.try_get(2)?;

        Ok(TableInfo::new(
            page_count.max(0) as u64,
            avg_page_bytes.max(0) as u64,
            avg_row_bytes.max(0) as u64,
        ))
    }

    async fn schema_total_bytes(&self, schema: &str, tables: &[String]) -> SnapshotResult<u64> {
        let row = self
            .client
            .query_one(SCHEMA_TOTAL_BYTES_QUERY, &[&schema, &tables])
            .await?;
        let total_bytes: i64 = row.try_get(0)?;

        Ok(total_bytes.max(0) as u64)
    }

    async fn list_tables(&self, schema: &str) -> SnapshotResult<Vec<String>> {
        let rows = self.client.query(LIST_TABLES_QUERY, &[&schema]).await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            tables.push(row.try_get::<_, String>(0)?);
        }

        Ok(tables)
    }

    async fn fetch_page_range(
        &self,
        table_name: &TableName,
        range: PageRange,
    ) -> SnapshotResult<RecordStream> {
        let query = page_range_query(table_name, range);
        let rows = self
            .client
            .query_raw(query.as_str(), std::iter::empty::<&dyn ToSql>())
            .await?;

        let records = rows
            .map_err(SnapshotError::from)
            .and_then(|row| async move { raw_record(&row) });

        Ok(records.boxed())
    }

    async fn count_page_range(
        &self,
        table_name: &TableName,
        range: PageRange,
    ) -> SnapshotResult<u64> {
        let query = page_range_count_query(table_name, range);
        let row = self.client.query_one(query.as_str(), &[]).await?;
        let count: i64 = row.try_get(0)?;

        Ok(count.max(0) as u64)
    }

    async fn release(self) -> SnapshotResult<()> {
        self.client.simple_query("commit;").await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_range_queries_use_half_open_tid_bounds() {
        let table_name = TableName::new("test-schema", "test-table-1");

        assert_eq!(
            page_range_query(&table_name, PageRange::new(0, 4)),
            r#"select * from "test-schema"."test-table-1" where ctid >= '(0,0)'::tid and ctid < '(4,0)'::tid"#
        );
        assert_eq!(
            page_range_count_query(&table_name, PageRange::new(1, 2)),
            r#"select count(*) from "test-schema"."test-table-1" where ctid >= '(1,0)'::tid and ctid < '(2,0)'::tid"#
        );
    }

    #[test]
    fn wire_values_accept_any_type() {
        assert!(WireValue::accepts(&Type::POINT));

        let WireValue(value) = WireValue::from_sql(&Type::TEXT, b"alice").unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"alice")));

        let WireValue(value) = WireValue::from_sql_null(&Type::TEXT).unwrap();
        assert_eq!(value, None);
    }
}
