use std::fmt;

use pg_escape::{quote_identifier, quote_literal};
use serde::Serialize;

/// Schema a table name resolves to when none is given.
pub const DEFAULT_SCHEMA: &str = "public";

/// Fully qualified Postgres table name.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
pub struct TableName {
    /// The schema containing the table.
    pub schema: String,
    /// The name of the table within the schema.
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Returns `"schema"."name"` with both parts escaped according to Postgres identifier rules.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Quotes `value` as a Postgres string literal.
///
/// Used for statements that do not accept bind parameters, such as `SET TRANSACTION SNAPSHOT`.
pub fn quote_string_literal(value: &str) -> String {
    quote_literal(value)
}
