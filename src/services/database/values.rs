//! Conversions between native column values and JSON cells.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Return the first successful `try_get::<T>` mapped through its converter.
///
/// sqlx checks type compatibility before decoding, so the order of the list
/// only matters where several Rust types accept the same column type.
macro_rules! decode_first {
    ($row:expr, $index:expr, $($ty:ty => $map:expr),+ $(,)?) => {
        $(
            if let Ok(v) = $row.try_get::<$ty, _>($index) {
                return $map(v);
            }
        )+
    };
}

pub(crate) use decode_first;

pub(crate) fn bytes_to_value(bytes: Vec<u8>) -> Value {
    Value::String(String::from_utf8_lossy(&bytes).into_owned())
}

pub(crate) fn float_to_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(f.to_string()))
}

pub(crate) fn decimal_to_value(d: Decimal) -> Value {
    Value::String(d.to_string())
}

pub(crate) fn datetime_to_value(dt: NaiveDateTime) -> Value {
    Value::String(dt.format(DATETIME_FORMAT).to_string())
}

pub(crate) fn utc_to_value(dt: DateTime<Utc>) -> Value {
    Value::String(dt.to_rfc3339())
}

pub(crate) fn date_to_value(d: NaiveDate) -> Value {
    Value::String(d.to_string())
}

pub(crate) fn time_to_value(t: NaiveTime) -> Value {
    Value::String(t.to_string())
}

/// Bind-ready form of a JSON parameter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Param {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl From<&Value> for Param {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Param::Null,
            Value::Bool(b) => Param::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Param::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Param::UInt(u)
                } else {
                    Param::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => Param::Text(s.clone()),
            // arrays and objects go over the wire as JSON text
            other => Param::Text(other.to_string()),
        }
    }
}
