//! PostgreSQL wire conversions for [`SqlValue`] and result rows.
//!
//! Arguments are bound against the parameter type the server inferred for
//! each placeholder, so a single dynamic value can feed an `int4`, `int8`,
//! `numeric` or `timestamptz` column alike.

use super::types::{Record, SqlValue};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use may_postgres::types::{IsNull, ToSql, Type};
use may_postgres::Row;
use postgres_types::to_sql_checked;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::Value;
use std::error::Error;

type BoxError = Box<dyn Error + Sync + Send>;

fn is_json(ty: &Type) -> bool {
    *ty == Type::JSON || *ty == Type::JSONB
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, BoxError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| format!("timestamp out of range: {millis}").into())
}

fn int_to_sql(value: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::INT2 {
        i16::try_from(value)?.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(value)?.to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (value as f32).to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (value as f64).to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        Decimal::from(value).to_sql(ty, out)
    } else if *ty == Type::TIMESTAMPTZ {
        millis_to_datetime(value)?.to_sql(ty, out)
    } else if *ty == Type::TIMESTAMP {
        millis_to_datetime(value)?.naive_utc().to_sql(ty, out)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
        value.to_string().to_sql(ty, out)
    } else if is_json(ty) {
        Value::from(value).to_sql(ty, out)
    } else {
        value.to_sql(ty, out)
    }
}

fn float_to_sql(value: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::FLOAT4 {
        (value as f32).to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        Decimal::from_f64(value)
            .ok_or_else(|| BoxError::from(format!("cannot bind {value} as numeric")))?
            .to_sql(ty, out)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
        value.to_string().to_sql(ty, out)
    } else {
        value.to_sql(ty, out)
    }
}

fn text_to_sql(value: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if is_json(ty) {
        serde_json::from_str::<Value>(value)?.to_sql(ty, out)
    } else if *ty == Type::UUID {
        uuid::Uuid::parse_str(value)?.to_sql(ty, out)
    } else {
        value.to_sql(ty, out)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => b.to_sql(ty, out),
            SqlValue::Int(i) => int_to_sql(*i, ty, out),
            SqlValue::Float(f) => float_to_sql(*f, ty, out),
            SqlValue::Text(s) => text_to_sql(s, ty, out),
            SqlValue::Json(v) if is_json(ty) => v.to_sql(ty, out),
            SqlValue::Json(v) => v.to_string().to_sql(ty, out),
            SqlValue::Array(items) => items.to_sql(ty, out),
            SqlValue::PendingTimestamp => Err("pending timestamp was not resolved before binding".into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn opt<T, F>(value: Option<T>, f: F) -> Value
where
    F: FnOnce(T) -> Value,
{
    value.map(f).unwrap_or(Value::Null)
}

fn decode_column(row: &Row, idx: usize, ty: &Type) -> Result<Value, may_postgres::Error> {
    let value = if *ty == Type::BOOL {
        opt(row.try_get::<_, Option<bool>>(idx)?, Value::Bool)
    } else if *ty == Type::INT2 {
        opt(row.try_get::<_, Option<i16>>(idx)?, Value::from)
    } else if *ty == Type::INT4 {
        opt(row.try_get::<_, Option<i32>>(idx)?, Value::from)
    } else if *ty == Type::INT8 {
        opt(row.try_get::<_, Option<i64>>(idx)?, Value::from)
    } else if *ty == Type::FLOAT4 {
        opt(row.try_get::<_, Option<f32>>(idx)?, |v| Value::from(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        opt(row.try_get::<_, Option<f64>>(idx)?, Value::from)
    } else if *ty == Type::NUMERIC {
        opt(row.try_get::<_, Option<Decimal>>(idx)?, |d| {
            match d.to_i64().filter(|_| d.fract().is_zero()) {
                Some(i) => Value::from(i),
                None => d.to_f64().map(Value::from).unwrap_or(Value::Null),
            }
        })
    } else if is_json(ty) {
        row.try_get::<_, Option<Value>>(idx)?.unwrap_or(Value::Null)
    } else if *ty == Type::UUID {
        opt(row.try_get::<_, Option<uuid::Uuid>>(idx)?, |u| Value::String(u.to_string()))
    } else if *ty == Type::TIMESTAMPTZ {
        opt(row.try_get::<_, Option<DateTime<Utc>>>(idx)?, |t| {
            Value::from(t.timestamp_millis())
        })
    } else if *ty == Type::TIMESTAMP {
        opt(row.try_get::<_, Option<NaiveDateTime>>(idx)?, |t| {
            Value::from(t.and_utc().timestamp_millis())
        })
    } else if *ty == Type::DATE {
        opt(row.try_get::<_, Option<NaiveDate>>(idx)?, |d| Value::String(d.to_string()))
    } else if *ty == Type::INT4_ARRAY {
        opt(row.try_get::<_, Option<Vec<i32>>>(idx)?, Value::from)
    } else if *ty == Type::INT8_ARRAY {
        opt(row.try_get::<_, Option<Vec<i64>>>(idx)?, Value::from)
    } else if *ty == Type::TEXT_ARRAY || *ty == Type::VARCHAR_ARRAY {
        opt(row.try_get::<_, Option<Vec<String>>>(idx)?, Value::from)
    } else {
        opt(row.try_get::<_, Option<String>>(idx)?, Value::String)
    };
    Ok(value)
}

/// Decode a `may_postgres` row into a JSON record keyed by column name.
pub fn decode_row(row: &Row) -> Result<Record, may_postgres::Error> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_())?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}
