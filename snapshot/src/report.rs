//! Outcome of a snapshot run.
//!
//! A run does not stop at the first failure: failures are collected per schema and per table and
//! returned together once every table finished. Only an export failure and cancellation end a
//! run early.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::SnapshotError;

/// Failures of a single schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaErrors {
    pub schema: String,
    /// Failures of single tables, keyed by table name. Each table has at most one entry.
    pub table_errors: BTreeMap<String, SnapshotError>,
    /// Failures affecting the schema as a whole, in the order they happened.
    pub global_errors: Vec<SnapshotError>,
}

impl SchemaErrors {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table_errors: BTreeMap::new(),
            global_errors: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table_errors.is_empty() && self.global_errors.is_empty()
    }
}

/// Failures of a snapshot run that completed, grouped by schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureErrors {
    schemas: BTreeMap<String, SchemaErrors>,
}

impl CaptureErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.values().all(SchemaErrors::is_empty)
    }

    /// Records the failure of `table` of `schema`.
    ///
    /// A second failure of the same table is aggregated with the first one.
    pub fn add_table_error(
        &mut self,
        schema: impl Into<String>,
        table: impl Into<String>,
        error: SnapshotError,
    ) {
        let schema_errors = self.schema_entry(schema.into());
        let table = table.into();
        let error = match schema_errors.table_errors.remove(&table) {
            Some(previous) => SnapshotError::from(vec![previous, error]),
            None => error,
        };

        schema_errors.table_errors.insert(table, error);
    }

    /// Records a failure affecting the whole `schema`.
    pub fn add_global_error(&mut self, schema: impl Into<String>, error: SnapshotError) {
        self.schema_entry(schema.into()).global_errors.push(error);
    }

    /// Returns the failures of `schema`, if any was recorded.
    pub fn schema(&self, schema: &str) -> Option<&SchemaErrors> {
        self.schemas.get(schema)
    }

    /// Returns the failures of `table` of `schema`, if any was recorded.
    pub fn table_error(&self, schema: &str, table: &str) -> Option<&SnapshotError> {
        self.schemas.get(schema)?.table_errors.get(table)
    }

    /// Iterates over the schemas with failures, sorted by schema name.
    pub fn schemas(&self) -> impl Iterator<Item = &SchemaErrors> {
        self.schemas.values()
    }

    /// Returns the number of failed tables across all schemas.
    pub fn table_error_count(&self) -> usize {
        self.schemas
            .values()
            .map(|schema_errors| schema_errors.table_errors.len())
            .sum()
    }

    /// Turns the collected failures into the result of the run.
    pub fn into_result(self) -> Result<(), CaptureError> {
        if self.is_empty() {
            return Ok(());
        }

        Err(CaptureError::Partial(self))
    }

    fn schema_entry(&mut self, schema: String) -> &mut SchemaErrors {
        self.schemas
            .entry(schema.clone())
            .or_insert_with(|| SchemaErrors::new(schema))
    }
}

impl fmt::Display for CaptureErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for schema_errors in self.schemas() {
            for error in &schema_errors.global_errors {
                if !first {
                    f.write_str("; ")?;
                }
                first = false;
                write!(f, "schema `{}`: {}", schema_errors.schema, error.summary())?;
            }

            for (table, error) in &schema_errors.table_errors {
                if !first {
                    f.write_str("; ")?;
                }
                first = false;
                write!(
                    f,
                    "table `{}.{}`: {}",
                    schema_errors.schema,
                    table,
                    error.summary()
                )?;
            }
        }

        Ok(())
    }
}

/// Failed outcome of [`crate::generator::SnapshotGenerator::create_snapshot`].
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The run was stopped before completing. No partial failures are reported.
    #[error("snapshot aborted: {}", .0.summary())]
    Aborted(SnapshotError),

    /// The run completed, but some schemas or tables failed.
    #[error("snapshot completed with errors: {0}")]
    Partial(CaptureErrors),
}

impl CaptureError {
    /// Returns the collected failures of a completed run.
    pub fn partial(&self) -> Option<&CaptureErrors> {
        match self {
            CaptureError::Partial(errors) => Some(errors),
            CaptureError::Aborted(_) => None,
        }
    }
}
