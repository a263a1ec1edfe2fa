use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::conversions::numeric::PgNumeric;

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    String(String),
    I16(i16),
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    Numeric(PgNumeric),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(Value),
    Bytes(Vec<u8>),
    Array(ArrayCell),
}

/// A decoded one-dimensional array value. Elements may be null.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayCell {
    Bool(Vec<Option<bool>>),
    String(Vec<Option<String>>),
    I16(Vec<Option<i16>>),
    I32(Vec<Option<i32>>),
    I64(Vec<Option<i64>>),
    F32(Vec<Option<f32>>),
    F64(Vec<Option<f64>>),
    Numeric(Vec<Option<PgNumeric>>),
    Date(Vec<Option<NaiveDate>>),
    Timestamp(Vec<Option<NaiveDateTime>>),
    TimestampTz(Vec<Option<DateTime<Utc>>>),
    Uuid(Vec<Option<Uuid>>),
    Json(Vec<Option<Value>>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Converts the value to JSON.
    ///
    /// Numerics are rendered as strings to keep their precision, and `NaN` or infinities that
    /// JSON numbers cannot express become `null` for floats.
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(value) => json!(value),
            Cell::String(value) => json!(value),
            Cell::I16(value) => json!(value),
            Cell::I32(value) => json!(value),
            Cell::U32(value) => json!(value),
            Cell::I64(value) => json!(value),
            Cell::F32(value) => json!(value),
            Cell::F64(value) => json!(value),
            Cell::Numeric(value) => json!(value.to_string()),
            Cell::Date(value) => json!(value.to_string()),
            Cell::Time(value) => json!(value.to_string()),
            Cell::Timestamp(value) => json!(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Cell::TimestampTz(value) => json!(value.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Cell::Uuid(value) => json!(value.to_string()),
            Cell::Json(value) => value.clone(),
            Cell::Bytes(value) => json!(value),
            Cell::Array(array) => array.to_json(),
        }
    }
}

impl ArrayCell {
    /// Converts the array to a JSON array, mapping null elements to `null`.
    pub fn to_json(&self) -> Value {
        fn elements<T>(items: &[Option<T>], f: impl Fn(&T) -> Value) -> Value {
            Value::Array(
                items
                    .iter()
                    .map(|item| item.as_ref().map(&f).unwrap_or(Value::Null))
                    .collect(),
            )
        }

        match self {
            ArrayCell::Bool(items) => elements(items, |v| json!(v)),
            ArrayCell::String(items) => elements(items, |v| json!(v)),
            ArrayCell::I16(items) => elements(items, |v| json!(v)),
            ArrayCell::I32(items) => elements(items, |v| json!(v)),
            ArrayCell::I64(items) => elements(items, |v| json!(v)),
            ArrayCell::F32(items) => elements(items, |v| json!(v)),
            ArrayCell::F64(items) => elements(items, |v| json!(v)),
            ArrayCell::Numeric(items) => elements(items, |v| json!(v.to_string())),
            ArrayCell::Date(items) => elements(items, |v| json!(v.to_string())),
            ArrayCell::Timestamp(items) => {
                elements(items, |v| json!(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            }
            ArrayCell::TimestampTz(items) => {
                elements(items, |v| json!(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            }
            ArrayCell::Uuid(items) => elements(items, |v| json!(v.to_string())),
            ArrayCell::Json(items) => elements(items, Value::clone),
        }
    }
}
