//! Postgres building blocks shared by the snapshot engine: qualified table names, identifier
//! quoting and type oid lookups.

pub mod schema;
pub mod types;
