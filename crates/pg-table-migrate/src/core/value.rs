//! Column values and row batches.
//!
//! Rows are decoded from the source in binary format. Common scalar types get
//! typed variants so they can be inspected and logged; anything else is kept
//! as the server's raw binary representation and written back verbatim.
//!
//! On insert a value goes out in binary when its type matches the column or
//! widens losslessly into it (`int2` into `int4`, `real` into `double
//! precision`). Other scalars are sent in PostgreSQL's text input form and
//! the server converts them, so `timestamp` fits `timestamptz` and `text`
//! fits `uuid`. The server still rejects values its input function cannot
//! read. `bytea` and raw passthrough values have no text form and only bind
//! to a column of their own type. Any bind failure fails the chunk.

use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio_postgres::types::{to_sql_checked, Format, FromSql, IsNull, ToSql, Type};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    Bool(bool),

    /// smallint
    I16(i16),

    /// integer
    I32(i32),

    /// bigint
    I64(i64),

    /// real
    F32(f32),

    /// double precision
    F64(f64),

    /// text, varchar, char, name
    Text(String),

    /// bytea
    Bytes(Vec<u8>),

    Uuid(Uuid),

    /// timestamp without time zone
    DateTime(NaiveDateTime),

    /// timestamp with time zone
    DateTimeTz(DateTime<Utc>),

    Date(NaiveDate),

    /// time without time zone
    Time(NaiveTime),

    /// Any other type, kept in its binary wire format.
    Raw { type_name: String, bytes: Vec<u8> },
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Whether this value goes to a `ty` column in binary, as-is or widened.
    fn binds_binary(&self, ty: &Type) -> bool {
        match self {
            SqlValue::Null => true,
            SqlValue::Bool(_) => <bool as ToSql>::accepts(ty),
            SqlValue::I16(_) => matches!(*ty, Type::INT2 | Type::INT4 | Type::INT8),
            SqlValue::I32(_) => matches!(*ty, Type::INT4 | Type::INT8 | Type::FLOAT8),
            SqlValue::I64(_) => *ty == Type::INT8,
            SqlValue::F32(_) => matches!(*ty, Type::FLOAT4 | Type::FLOAT8),
            SqlValue::F64(_) => *ty == Type::FLOAT8,
            SqlValue::Text(_) => <String as ToSql>::accepts(ty),
            SqlValue::Bytes(_) => <Vec<u8> as ToSql>::accepts(ty),
            SqlValue::Uuid(_) => <Uuid as ToSql>::accepts(ty),
            SqlValue::DateTime(_) => <NaiveDateTime as ToSql>::accepts(ty),
            SqlValue::DateTimeTz(_) => <DateTime<Utc> as ToSql>::accepts(ty),
            SqlValue::Date(_) => <NaiveDate as ToSql>::accepts(ty),
            SqlValue::Time(_) => <NaiveTime as ToSql>::accepts(ty),
            SqlValue::Raw { type_name, .. } => type_name == ty.name(),
        }
    }

    /// PostgreSQL text input form of this value.
    fn text_form(&self) -> Option<String> {
        let text = match self {
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F32(v) => float_text(f64::from(*v)),
            SqlValue::F64(v) => float_text(*v),
            SqlValue::Text(v) => v.clone(),
            SqlValue::Uuid(v) => v.hyphenated().to_string(),
            SqlValue::DateTime(v) => v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            SqlValue::DateTimeTz(v) => v.format("%Y-%m-%d %H:%M:%S%.f+00").to_string(),
            SqlValue::Date(v) => v.format("%Y-%m-%d").to_string(),
            SqlValue::Time(v) => v.format("%H:%M:%S%.f").to_string(),
            SqlValue::Null | SqlValue::Bytes(_) | SqlValue::Raw { .. } => return None,
        };
        Some(text)
    }
}

fn float_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        v.to_string()
    }
}

/// One row, positionally aligned to the run's [`ColumnOrder`](super::schema::ColumnOrder).
pub type Row = Vec<SqlValue>;

impl<'a> FromSql<'a> for SqlValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let value = match *ty {
            Type::BOOL => SqlValue::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => SqlValue::I16(i16::from_sql(ty, raw)?),
            Type::INT4 => SqlValue::I32(i32::from_sql(ty, raw)?),
            Type::INT8 => SqlValue::I64(i64::from_sql(ty, raw)?),
            Type::FLOAT4 => SqlValue::F32(f32::from_sql(ty, raw)?),
            Type::FLOAT8 => SqlValue::F64(f64::from_sql(ty, raw)?),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                SqlValue::Text(String::from_sql(ty, raw)?)
            }
            Type::BYTEA => SqlValue::Bytes(Vec::<u8>::from_sql(ty, raw)?),
            Type::UUID => SqlValue::Uuid(Uuid::from_sql(ty, raw)?),
            Type::TIMESTAMP => SqlValue::DateTime(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => SqlValue::DateTimeTz(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::DATE => SqlValue::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIME => SqlValue::Time(NaiveTime::from_sql(ty, raw)?),
            _ => SqlValue::Raw {
                type_name: ty.name().to_string(),
                bytes: raw.to_vec(),
            },
        };
        Ok(value)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(SqlValue::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if !self.binds_binary(ty) {
            let Some(text) = self.text_form() else {
                let source_type = match self {
                    SqlValue::Raw { type_name, .. } => type_name.as_str(),
                    _ => "bytea",
                };
                return Err(format!(
                    "cannot bind {} value to column of type {}",
                    source_type, ty
                )
                .into());
            };
            out.extend_from_slice(text.as_bytes());
            return Ok(IsNull::No);
        }

        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql(ty, out),
            SqlValue::I16(v) => match *ty {
                Type::INT2 => v.to_sql(ty, out),
                Type::INT4 => i32::from(*v).to_sql(ty, out),
                _ => i64::from(*v).to_sql(ty, out),
            },
            SqlValue::I32(v) => match *ty {
                Type::INT4 => v.to_sql(ty, out),
                Type::INT8 => i64::from(*v).to_sql(ty, out),
                _ => f64::from(*v).to_sql(ty, out),
            },
            SqlValue::I64(v) => v.to_sql(ty, out),
            SqlValue::F32(v) => match *ty {
                Type::FLOAT4 => v.to_sql(ty, out),
                _ => f64::from(*v).to_sql(ty, out),
            },
            SqlValue::F64(v) => v.to_sql(ty, out),
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::Bytes(v) => v.to_sql(ty, out),
            SqlValue::Uuid(v) => v.to_sql(ty, out),
            SqlValue::DateTime(v) => v.to_sql(ty, out),
            SqlValue::DateTimeTz(v) => v.to_sql(ty, out),
            SqlValue::Date(v) => v.to_sql(ty, out),
            SqlValue::Time(v) => v.to_sql(ty, out),
            SqlValue::Raw { bytes, .. } => {
                out.extend_from_slice(bytes);
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, ty: &Type) -> Format {
        if !self.binds_binary(ty) && self.text_form().is_some() {
            Format::Text
        } else {
            Format::Binary
        }
    }

    to_sql_checked!();
}

/// A bounded group of rows read together and committed together.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    /// 1-based chunk number within the run.
    pub index: u64,

    /// Rows in source cursor order.
    pub rows: Vec<Row>,
}

impl RowBatch {
    pub fn new(index: u64, rows: Vec<Row>) -> Self {
        Self { index, rows }
    }

    /// Get the number of rows in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
