use std::collections::HashMap;
use std::error;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::schema::TableName;
use postgres::types::{Oid, convert_type_oid_to_type};
use tokio_postgres::types::{FromSql, Type};
use tracing::trace;
use uuid::Uuid;

use crate::conversions::numeric::PgNumeric;
use crate::error::{ErrorKind, SnapshotResult};
use crate::snapshot_error;
use crate::source::{RawField, RawRecord};
use crate::types::{ArrayCell, Cell, Column, Row};

/// Error returned by a [`CellDecoder`].
pub type DecodeError = Box<dyn error::Error + Sync + Send>;

/// Decodes the binary wire representation of a non-null value.
pub type CellDecoder = fn(&Type, &[u8]) -> Result<Cell, DecodeError>;

/// Maps Postgres type oids to decoders and turns raw records into [`Row`]s.
///
/// Fields whose type has no registered decoder are left out of the produced rows.
#[derive(Clone)]
pub struct TypeRegistry {
    decoders: HashMap<Oid, CellDecoder>,
}

impl TypeRegistry {
    /// Creates a registry without any decoder.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers `decoder` for `type_oid`, replacing any previous decoder.
    pub fn register(&mut self, type_oid: Oid, decoder: CellDecoder) -> &mut Self {
        self.decoders.insert(type_oid, decoder);
        self
    }

    pub fn is_supported(&self, type_oid: Oid) -> bool {
        self.decoders.contains_key(&type_oid)
    }

    /// Decodes a single field, returning [`None`] if its type is not supported.
    pub fn decode_field(&self, field: &RawField) -> SnapshotResult<Option<Column>> {
        let Some(decoder) = self.decoders.get(&field.type_oid) else {
            trace!(
                column = %field.name,
                type_oid = field.type_oid,
                "skipping column of unsupported type"
            );

            return Ok(None);
        };

        let typ = convert_type_oid_to_type(field.type_oid);
        let value = match &field.value {
            None => Cell::Null,
            Some(raw) => decoder(&typ, raw).map_err(|err| {
                snapshot_error!(
                    ErrorKind::ConversionError,
                    "Column value could not be decoded",
                    format!(
                        "column `{}` of type `{}`: {err}",
                        field.name,
                        typ.name()
                    )
                )
            })?,
        };

        Ok(Some(Column {
            name: field.name.clone(),
            typ,
            value,
        }))
    }

    /// Converts a raw record of `table_name` into a [`Row`].
    pub fn map_record(
        &self,
        table_name: &Arc<TableName>,
        record: &RawRecord,
    ) -> SnapshotResult<Row> {
        let mut columns = Vec::with_capacity(record.fields.len());
        for field in &record.fields {
            if let Some(column) = self.decode_field(field)? {
                columns.push(column);
            }
        }

        Ok(Row::new(table_name.clone(), columns))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut oids = self.decoders.keys().copied().collect::<Vec<_>>();
        oids.sort_unstable();

        f.debug_struct("TypeRegistry")
            .field("supported_oids", &oids)
            .finish()
    }
}

impl Default for TypeRegistry {
    /// Creates a registry decoding the built-in scalar types and their one-dimensional arrays.
    fn default() -> Self {
        let mut registry = TypeRegistry::empty();

        registry
            .register(Type::BOOL.oid(), |typ, raw| {
                Ok(Cell::Bool(bool::from_sql(typ, raw)?))
            })
            .register(Type::INT2.oid(), |typ, raw| {
                Ok(Cell::I16(i16::from_sql(typ, raw)?))
            })
            .register(Type::INT4.oid(), |typ, raw| {
                Ok(Cell::I32(i32::from_sql(typ, raw)?))
            })
            .register(Type::INT8.oid(), |typ, raw| {
                Ok(Cell::I64(i64::from_sql(typ, raw)?))
            })
            .register(Type::OID.oid(), |typ, raw| {
                Ok(Cell::U32(u32::from_sql(typ, raw)?))
            })
            .register(Type::FLOAT4.oid(), |typ, raw| {
                Ok(Cell::F32(f32::from_sql(typ, raw)?))
            })
            .register(Type::FLOAT8.oid(), |typ, raw| {
                Ok(Cell::F64(f64::from_sql(typ, raw)?))
            })
            .register(Type::NUMERIC.oid(), |typ, raw| {
                Ok(Cell::Numeric(PgNumeric::from_sql(typ, raw)?))
            })
            .register(Type::DATE.oid(), |typ, raw| {
                Ok(Cell::Date(NaiveDate::from_sql(typ, raw)?))
            })
            .register(Type::TIME.oid(), |typ, raw| {
                Ok(Cell::Time(NaiveTime::from_sql(typ, raw)?))
            })
            .register(Type::TIMESTAMP.oid(), |typ, raw| {
                Ok(Cell::Timestamp(NaiveDateTime::from_sql(typ, raw)?))
            })
            .register(Type::TIMESTAMPTZ.oid(), |typ, raw| {
                Ok(Cell::TimestampTz(DateTime::<Utc>::from_sql(typ, raw)?))
            })
            .register(Type::UUID.oid(), |typ, raw| {
                Ok(Cell::Uuid(Uuid::from_sql(typ, raw)?))
            })
            .register(Type::JSON.oid(), decode_json)
            .register(Type::JSONB.oid(), decode_json)
            .register(Type::BYTEA.oid(), |typ, raw| {
                Ok(Cell::Bytes(Vec::<u8>::from_sql(typ, raw)?))
            });

        for text_type in [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME] {
            registry.register(text_type.oid(), decode_string);
        }

        registry
            .register(Type::BOOL_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::Bool(FromSql::from_sql(typ, raw)?)))
            })
            .register(Type::INT2_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::I16(FromSql::from_sql(typ, raw)?)))
            })
            .register(Type::INT4_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::I32(FromSql::from_sql(typ, raw)?)))
            })
            .register(Type::INT8_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::I64(FromSql::from_sql(typ, raw)?)))
            })
            .register(Type::FLOAT4_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::F32(FromSql::from_sql(typ, raw)?)))
            })
            .register(Type::FLOAT8_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::F64(FromSql::from_sql(typ, raw)?)))
            })
            .register(Type::NUMERIC_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::Numeric(FromSql::from_sql(typ, raw)?)))
            })
            .register(Type::DATE_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::Date(FromSql::from_sql(typ, raw)?)))
            })
            .register(Type::TIMESTAMP_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::Timestamp(FromSql::from_sql(typ, raw)?)))
            })
            .register(Type::TIMESTAMPTZ_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::TimestampTz(FromSql::from_sql(
                    typ, raw,
                )?)))
            })
            .register(Type::UUID_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::Uuid(FromSql::from_sql(typ, raw)?)))
            })
            .register(Type::JSONB_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::Json(FromSql::from_sql(typ, raw)?)))
            })
            .register(Type::JSON_ARRAY.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::Json(FromSql::from_sql(typ, raw)?)))
            });

        for array_type in [
            Type::TEXT_ARRAY,
            Type::VARCHAR_ARRAY,
            Type::BPCHAR_ARRAY,
            Type::NAME_ARRAY,
        ] {
            registry.register(array_type.oid(), |typ, raw| {
                Ok(Cell::Array(ArrayCell::String(FromSql::from_sql(typ, raw)?)))
            });
        }

        registry
    }
}

/// Decodes any textual type. The driver's `String` conversion only validates UTF-8, so it works
/// for every text-like type regardless of its declared name.
fn decode_string(typ: &Type, raw: &[u8]) -> Result<Cell, DecodeError> {
    Ok(Cell::String(String::from_sql(typ, raw)?))
}

/// Decodes `json` and `jsonb`, the latter carrying a leading version byte.
fn decode_json(typ: &Type, raw: &[u8]) -> Result<Cell, DecodeError> {
    Ok(Cell::Json(serde_json::Value::from_sql(typ, raw)?))
}
