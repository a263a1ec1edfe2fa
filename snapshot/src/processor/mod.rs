//! Consumers of the rows captured by a snapshot run.
//!
//! A [`RowProcessor`] receives every row exactly once. Rows of different tables, and of different
//! page ranges of the same table, arrive concurrently and in no particular order.

mod base;
pub mod channel;
pub mod memory;

pub use base::RowProcessor;
