use std::sync::Arc;

use postgres::schema::TableName;
use serde_json::{Value, json};
use tokio_postgres::types::Type;

use crate::types::Cell;

/// A decoded column of a [`Row`].
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    /// Postgres type of the column, whose name serves as the logical type tag.
    pub typ: Type,
    pub value: Cell,
}

impl Column {
    pub fn new(name: impl Into<String>, typ: Type, value: Cell) -> Self {
        Self {
            name: name.into(),
            typ,
            value,
        }
    }

    /// Returns the logical type tag of the column, e.g. `uuid` or `text`.
    pub fn type_name(&self) -> &str {
        self.typ.name()
    }
}

/// A row read from the snapshot, with the columns of supported types in table order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub table_name: Arc<TableName>,
    pub columns: Vec<Column>,
}

impl Row {
    pub fn new(table_name: Arc<TableName>, columns: Vec<Column>) -> Self {
        Self {
            table_name,
            columns,
        }
    }

    pub fn schema(&self) -> &str {
        &self.table_name.schema
    }

    pub fn table(&self) -> &str {
        &self.table_name.name
    }

    /// Returns the column named `name`, if it was emitted.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Converts the row into a JSON object with `schema`, `table` and `columns` keys.
    pub fn to_json(&self) -> Value {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                json!({
                    "name": column.name,
                    "type": column.type_name(),
                    "value": column.value.to_json(),
                })
            })
            .collect::<Vec<_>>();

        json!({
            "schema": self.schema(),
            "table": self.table(),
            "columns": columns,
        })
    }
}
