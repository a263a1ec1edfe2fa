//! Splitting of a table into page ranges read by a single query each.

use postgres::schema::TableName;
use tracing::debug;

use crate::error::SnapshotResult;
use crate::source::SnapshotReader;
use crate::types::{PageRange, TableInfo};

/// Returns how many pages a single range query should read to fetch about `batch_bytes`.
///
/// Tables without page size information are read in one batch. The result is always between 1
/// and [`TableInfo::total_pages`].
pub fn calculate_batch_page_size(table_info: &TableInfo, batch_bytes: u64) -> u64 {
    let total_pages = table_info.total_pages();
    if table_info.avg_page_bytes == 0 {
        return total_pages;
    }

    (batch_bytes / table_info.avg_page_bytes).clamp(1, total_pages)
}

/// Returns the ranges tiling `[0, total_pages)` of `table_info`.
pub fn partition(table_info: &TableInfo) -> PageRanges {
    PageRanges::new(table_info.total_pages(), table_info.batch_page_size)
}

/// Iterator over consecutive page ranges of equal size, the last one possibly shorter.
#[derive(Debug, Clone)]
pub struct PageRanges {
    next_start: u64,
    total_pages: u64,
    page_size: u64,
}

impl PageRanges {
    /// A `page_size` of zero is treated as one.
    pub fn new(total_pages: u64, page_size: u64) -> Self {
        Self {
            next_start: 0,
            total_pages,
            page_size: page_size.max(1),
        }
    }

    /// First page not covered by the ranges.
    pub fn end(&self) -> u64 {
        self.total_pages
    }
}

impl Iterator for PageRanges {
    type Item = PageRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_start >= self.total_pages {
            return None;
        }

        let start = self.next_start;
        let end = start.saturating_add(self.page_size).min(self.total_pages);
        self.next_start = end;

        Some(PageRange::new(start, end))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total_pages.saturating_sub(self.next_start);
        let count = remaining.div_ceil(self.page_size) as usize;
        (count, Some(count))
    }
}

/// Detects pages appended after the table statistics were collected.
///
/// Each call to [`TailScan::next_range`] counts the rows of the single page at the boundary.
/// A non-empty page is returned and the boundary moves past it, an empty one ends the scan.
#[derive(Debug, Clone)]
pub struct TailScan {
    boundary: u64,
    exhausted: bool,
}

impl TailScan {
    pub fn new(boundary: u64) -> Self {
        Self {
            boundary,
            exhausted: false,
        }
    }

    /// Returns the next non-empty page past the boundary, or [`None`] once an empty page was
    /// found.
    pub async fn next_range<R: SnapshotReader>(
        &mut self,
        reader: &R,
        table_name: &TableName,
    ) -> SnapshotResult<Option<PageRange>> {
        if self.exhausted {
            return Ok(None);
        }

        let range = PageRange::new(self.boundary, self.boundary + 1);
        let count = reader.count_page_range(table_name, range).await?;
        if count == 0 {
            self.exhausted = true;
            return Ok(None);
        }

        debug!(
            table_name = %table_name,
            %range,
            count,
            "found rows past the estimated table size"
        );

        self.boundary += 1;

        Ok(Some(range))
    }
}
