use postgres::schema::DEFAULT_SCHEMA;

use crate::bail;
use crate::error::{ErrorKind, SnapshotResult};

/// Table selector matching every table of a schema.
pub const WILDCARD_TABLE: &str = "*";

/// Tables requested for one schema, in request order and without duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaTables {
    pub schema: String,
    pub tables: Vec<String>,
}

impl SchemaTables {
    /// Returns `true` if the tables of the schema are resolved from the catalog.
    pub fn is_wildcard(&self) -> bool {
        self.tables.iter().any(|table| table == WILDCARD_TABLE)
    }
}

/// Set of tables to snapshot, grouped by schema.
///
/// Schemas and tables keep the order in which they were first added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRequest {
    schemas: Vec<SchemaTables>,
}

impl SnapshotRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `tables` of `schema` to the request, skipping tables already present.
    pub fn with_tables<I, S>(mut self, schema: impl Into<String>, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let schema = schema.into();
        let index = match self.schemas.iter().position(|entry| entry.schema == schema) {
            Some(index) => index,
            None => {
                self.schemas.push(SchemaTables {
                    schema,
                    tables: Vec::new(),
                });
                self.schemas.len() - 1
            }
        };

        let entry = &mut self.schemas[index];
        for table in tables {
            let table = table.into();
            if !entry.tables.contains(&table) {
                entry.tables.push(table);
            }
        }

        self
    }

    /// Builds a request from `table`, `schema.table` or `schema.*` selectors.
    ///
    /// Unqualified tables belong to the `public` schema.
    pub fn from_selectors<I, S>(selectors: I) -> SnapshotResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut request = SnapshotRequest::new();
        for selector in selectors {
            let selector = selector.as_ref().trim();
            let (schema, table) = match selector.split_once('.') {
                Some((schema, table)) => (schema, table),
                None => (DEFAULT_SCHEMA, selector),
            };

            if schema.is_empty() || table.is_empty() || table.contains('.') {
                bail!(
                    ErrorKind::ConfigError,
                    "Invalid table selector",
                    format!("`{selector}` is not of the form `table`, `schema.table` or `schema.*`")
                );
            }

            request = request.with_tables(schema, [table]);
        }

        Ok(request)
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.iter().all(|entry| entry.tables.is_empty())
    }

    /// Returns the requested schemas in request order.
    pub fn schemas(&self) -> &[SchemaTables] {
        &self.schemas
    }

    /// Returns the names of the requested schemas in request order.
    pub fn schema_names(&self) -> impl Iterator<Item = &str> {
        self.schemas.iter().map(|entry| entry.schema.as_str())
    }
}
