//! Consistent parallel snapshots of Postgres tables.
//!
//! A run exports one transaction snapshot and reads every requested table from it through any
//! number of connections, so all rows reflect the same point in time. Tables are split into page
//! ranges read concurrently, and pages appended after the table statistics were collected are
//! picked up at the end of each table.
//!
//! The entry point is [`generator::SnapshotGenerator`].

mod macros;

pub mod concurrency;
pub mod conversions;
pub mod coordinator;
pub mod error;
pub mod generator;
pub mod partition;
pub mod processor;
pub mod progress;
pub mod report;
pub mod source;
pub mod stats;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
