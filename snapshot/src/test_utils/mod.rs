//! Utilities for testing snapshot runs without a database.
//!
//! - [`source`] provides [`source::MockSource`], an in-memory [`crate::source::SnapshotSource`]
//!   with injectable failures and bookkeeping of the readers it opened.
//! - [`record`] builds raw records with binary encoded values.
//! - [`processor`] wraps processors to reject rows.
//! - [`progress`] records progress updates.
//! - [`notify`] waits for notifications with a timeout.

pub mod notify;
pub mod processor;
pub mod progress;
pub mod record;
pub mod source;
