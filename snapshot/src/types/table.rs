use std::fmt;

/// Physical statistics of a table, read inside the snapshot.
///
/// Statistics come from the catalog and can be stale: the table may hold pages past
/// [`TableInfo::page_count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableInfo {
    /// Number of pages according to the catalog, zero for tables never vacuumed or analyzed.
    pub page_count: u64,
    /// Average size of a page in bytes, zero if unknown.
    pub avg_page_bytes: u64,
    /// Average size of a row in bytes, zero if unknown.
    pub avg_row_bytes: u64,
    /// Number of pages read by a single range query, zero until computed.
    pub batch_page_size: u64,
}

impl TableInfo {
    pub fn new(page_count: u64, avg_page_bytes: u64, avg_row_bytes: u64) -> Self {
        Self {
            page_count,
            avg_page_bytes,
            avg_row_bytes,
            batch_page_size: 0,
        }
    }

    /// Number of pages to partition. At least one, so empty statistics still produce a read.
    pub fn total_pages(&self) -> u64 {
        self.page_count.max(1)
    }
}

/// Half open range of page numbers `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageRange {
    pub start: u64,
    pub end: u64,
}

impl PageRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
