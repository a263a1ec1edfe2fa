//! Tracing setup shared by the snapshot binaries and tests.

pub mod tracing;
