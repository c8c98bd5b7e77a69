//! Dynamically typed SQL values.
//!
//! `Value` is what flows across every boundary: accessor getters/setters, bound
//! parameters, and cells read from a row stream.

use serde::Serialize;

use crate::error::ConversionError;
use crate::types::SqlType;

/// A single SQL value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Double(f64),
    /// Exact numeric kept as text to avoid rounding.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    /// ISO-8601 date (`YYYY-MM-DD`).
    Date(String),
    /// ISO-8601 timestamp.
    Timestamp(String),
    Uuid(String),
    Json(serde_json::Value),
}

impl Value {
    /// Whether this is SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The SQL type this value binds as.
    #[must_use]
    pub fn sql_type(&self) -> SqlType {
        SqlType::infer(self)
    }

    /// Short variant name, used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::BigInt(_) => "BigInt",
            Value::Double(_) => "Double",
            Value::Decimal(_) => "Decimal",
            Value::Text(_) => "Text",
            Value::Bytes(_) => "Bytes",
            Value::Date(_) => "Date",
            Value::Timestamp(_) => "Timestamp",
            Value::Uuid(_) => "Uuid",
            Value::Json(_) => "Json",
        }
    }

    /// Widen any integer variant to `i64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Read any numeric variant as `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Borrow textual variants as `&str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s)
            | Value::Decimal(s)
            | Value::Date(s)
            | Value::Timestamp(s)
            | Value::Uuid(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into a typed Rust value.
    pub fn into_typed<T: FromValue>(self) -> Result<T, ConversionError> {
        T::from_value(self)
    }

    fn mismatch(self, expected: &'static str) -> ConversionError {
        ConversionError {
            expected,
            found: format!("{:?}", self),
        }
    }
}

/// Conversion out of a [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, ConversionError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(v) => Ok(v != 0),
            Value::BigInt(v) => Ok(v != 0),
            other => Err(other.mismatch("bool")),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Int(v) => Ok(v),
            Value::BigInt(v) => i32::try_from(v).map_err(|_| ConversionError {
                expected: "i32",
                found: format!("BigInt({}) out of range", v),
            }),
            other => Err(other.mismatch("i32")),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Int(v) => Ok(i64::from(v)),
            Value::BigInt(v) => Ok(v),
            other => Err(other.mismatch("i64")),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value.as_f64() {
            Some(v) => Ok(v),
            None => Err(value.mismatch("f64")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Text(s)
            | Value::Decimal(s)
            | Value::Date(s)
            | Value::Timestamp(s)
            | Value::Uuid(s) => Ok(s),
            other => Err(other.mismatch("String")),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(other.mismatch("Vec<u8>")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
