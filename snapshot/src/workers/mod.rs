//! Workers reading tables from the exported snapshot.
//!
//! A [`table::TableWorker`] snapshots one table by running up to `max_range_workers`
//! [`range::RangeWorker`]s, each on its own reader, that pull page ranges from a shared queue.

pub mod range;
pub mod table;
