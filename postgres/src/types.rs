use tokio_postgres::types::{Kind, Type};

pub use tokio_postgres::types::Oid;

/// Converts a type oid to a [`Type`], falling back to an unnamed simple type for oids the driver
/// does not know about, like extension or user defined types.
pub fn convert_type_oid_to_type(type_oid: Oid) -> Type {
    Type::from_oid(type_oid).unwrap_or(Type::new(
        format!("unnamed_type({type_oid})"),
        type_oid,
        Kind::Simple,
        "pg_catalog".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_oids_resolve_to_builtin_types() {
        assert_eq!(convert_type_oid_to_type(Type::UUID.oid()), Type::UUID);
        assert_eq!(
            convert_type_oid_to_type(Type::INT4_ARRAY.oid()),
            Type::INT4_ARRAY
        );
    }

    #[test]
    fn unknown_oids_resolve_to_unnamed_types() {
        let typ = convert_type_oid_to_type(999_999);

        assert_eq!(typ.oid(), 999_999);
        assert_eq!(typ.name(), "unnamed_type(999999)");
        assert_eq!(typ.kind(), &Kind::Simple);
    }
}
