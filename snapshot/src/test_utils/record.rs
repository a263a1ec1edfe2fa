use bytes::Bytes;
use tokio_postgres::types::Type;
use uuid::Uuid;

use crate::source::{RawField, RawRecord};

/// Oid of a type the default registry does not decode.
pub const UNSUPPORTED_TYPE_OID: u32 = 600;

pub fn record(fields: Vec<RawField>) -> RawRecord {
    RawRecord::new(fields)
}

pub fn uuid_field(name: &str, value: Uuid) -> RawField {
    RawField::new(
        name,
        Type::UUID.oid(),
        Some(Bytes::copy_from_slice(value.as_bytes())),
    )
}

pub fn text_field(name: &str, value: &str) -> RawField {
    RawField::new(
        name,
        Type::TEXT.oid(),
        Some(Bytes::copy_from_slice(value.as_bytes())),
    )
}

pub fn int4_field(name: &str, value: i32) -> RawField {
    RawField::new(
        name,
        Type::INT4.oid(),
        Some(Bytes::copy_from_slice(&value.to_be_bytes())),
    )
}

pub fn null_field(name: &str, typ: &Type) -> RawField {
    RawField::new(name, typ.oid(), None)
}

/// A `point` column, which is not decoded by default.
pub fn point_field(name: &str, x: f64, y: f64) -> RawField {
    let mut raw = Vec::with_capacity(16);
    raw.extend_from_slice(&x.to_be_bytes());
    raw.extend_from_slice(&y.to_be_bytes());

    RawField::new(name, UNSUPPORTED_TYPE_OID, Some(Bytes::from(raw)))
}

/// A field whose bytes are not a valid `int4`.
pub fn corrupt_int4_field(name: &str) -> RawField {
    RawField::new(name, Type::INT4.oid(), Some(Bytes::from_static(&[0xff])))
}

/// Returns `count` records with an `id` column numbered from `first_id`.
pub fn id_records(first_id: i32, count: i32) -> Vec<RawRecord> {
    (first_id..first_id + count)
        .map(|id| record(vec![int4_field("id", id)]))
        .collect()
}
