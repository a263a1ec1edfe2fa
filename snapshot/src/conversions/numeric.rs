use std::fmt;
use std::io::{self, Cursor};
use std::str::FromStr;

use bigdecimal::num_bigint::{BigInt, BigUint, Sign};
use bigdecimal::{BigDecimal, ParseBigDecimalError};
use byteorder::{BigEndian, ReadBytesExt};
use tokio_postgres::types::{FromSql, Type};

/// Sign word values of the binary `numeric` format.
const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Postgres `numeric`, covering its full value range including the special values.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Clone)]
pub enum PgNumeric {
    NaN,
    PositiveInf,
    NegativeInf,
    Value(BigDecimal),
}

impl FromStr for PgNumeric {
    type Err = ParseBigDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nan" => Ok(PgNumeric::NaN),
            "infinity" => Ok(PgNumeric::PositiveInf),
            "-infinity" => Ok(PgNumeric::NegativeInf),
            _ => BigDecimal::from_str(s).map(PgNumeric::Value),
        }
    }
}

impl<'a> FromSql<'a> for PgNumeric {
    /// Decodes the binary format: digit count, weight, sign and display scale followed by
    /// base 10000 digits, most significant first.
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + 'static + Sync + Send>> {
        let mut rdr = Cursor::new(raw);

        let n_digits = rdr.read_u16::<BigEndian>()?;
        let weight = rdr.read_i16::<BigEndian>()?;
        let sign = match rdr.read_u16::<BigEndian>()? {
            NUMERIC_POS => Sign::Plus,
            NUMERIC_NEG => Sign::Minus,
            NUMERIC_NAN => return Ok(PgNumeric::NaN),
            NUMERIC_PINF => return Ok(PgNumeric::PositiveInf),
            NUMERIC_NINF => return Ok(PgNumeric::NegativeInf),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid numeric sign {other:#06x}"),
                )
                .into());
            }
        };
        let scale = rdr.read_u16::<BigEndian>()?;

        let mut magnitude = BigUint::from(0u32);
        for _ in 0..n_digits {
            let digit = rdr.read_u16::<BigEndian>()?;
            magnitude = magnitude * 10_000u32 + digit;
        }

        // The last digit read has a factor of 10000^(weight - n_digits + 1).
        let exponent = 4 * (i64::from(weight) - i64::from(n_digits) + 1);
        let value = BigDecimal::new(BigInt::from_biguint(sign, magnitude), -exponent)
            .with_scale(i64::from(scale));

        Ok(PgNumeric::Value(value))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(*ty, Type::NUMERIC)
    }
}

impl fmt::Display for PgNumeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgNumeric::NaN => write!(f, "NaN"),
            PgNumeric::PositiveInf => write!(f, "Infinity"),
            PgNumeric::NegativeInf => write!(f, "-Infinity"),
            PgNumeric::Value(n) => write!(f, "{n}"),
        }
    }
}
