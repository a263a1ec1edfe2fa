use postgres::schema::TableName;
use tracing::debug;

use crate::error::{ErrorKind, SnapshotResult};
use crate::partition::calculate_batch_page_size;
use crate::snapshot_error;
use crate::source::SnapshotReader;
use crate::types::TableInfo;

/// Reads the statistics of `table_name` and computes its batch page size for `batch_bytes`.
pub async fn resolve_table_info<R: SnapshotReader>(
    reader: &R,
    table_name: &TableName,
    batch_bytes: u64,
) -> SnapshotResult<TableInfo> {
    let mut table_info = reader.table_info(table_name).await.map_err(|err| {
        snapshot_error!(
            ErrorKind::TableStatsFailed,
            "Error getting page information for table",
            table_name.to_string(),
            source: err
        )
    })?;

    table_info.batch_page_size = calculate_batch_page_size(&table_info, batch_bytes);

    debug!(
        table_name = %table_name,
        page_count = table_info.page_count,
        avg_page_bytes = table_info.avg_page_bytes,
        avg_row_bytes = table_info.avg_row_bytes,
        batch_page_size = table_info.batch_page_size,
        "resolved table statistics"
    );

    Ok(table_info)
}
