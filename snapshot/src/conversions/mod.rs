//! Decoding of Postgres binary wire values into [`crate::types::Cell`]s.

pub mod numeric;
pub mod registry;
