mod cell;
mod request;
mod row;
mod table;

pub use cell::*;
pub use postgres::schema::TableName;
pub use request::*;
pub use row::*;
pub use table::*;
pub use tokio_postgres::types::Type;

pub use crate::conversions::numeric::PgNumeric;
