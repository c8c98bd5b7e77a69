//! Per-column value converters.
//!
//! A converter sits between the entity's field representation and the storage
//! representation. `to_storage` runs before parameter binding, `from_storage`
//! after a cell is read from the row stream.

use std::fmt;

use crate::error::{ConversionError, Result};
use crate::types::SqlType;
use crate::value::Value;

/// Two-way conversion between field values and storage values.
pub trait ValueConverter: Send + Sync + fmt::Debug {
    /// Field value → storage value.
    fn to_storage(&self, value: Value) -> Result<Value>;

    /// Storage value → field value.
    fn from_storage(&self, value: Value) -> Result<Value>;

    /// Storage type, if the converter fixes one.
    fn storage_type(&self) -> Option<SqlType> {
        None
    }
}

/// Stores booleans as `0`/`1` integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanIntConverter;

impl ValueConverter for BooleanIntConverter {
    fn to_storage(&self, value: Value) -> Result<Value> {
        match value {
            Value::Bool(b) => Ok(Value::Int(i32::from(b))),
            Value::Null => Ok(Value::Null),
            other => Err(ConversionError {
                expected: "Bool",
                found: format!("{:?}", other),
            }
            .into()),
        }
    }

    fn from_storage(&self, value: Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Bool(b) => Ok(Value::Bool(b)),
            other => match other.as_i64() {
                Some(n) => Ok(Value::Bool(n != 0)),
                None => Err(ConversionError {
                    expected: "integer flag",
                    found: format!("{:?}", other),
                }
                .into()),
            },
        }
    }

    fn storage_type(&self) -> Option<SqlType> {
        Some(SqlType::Integer)
    }
}

/// Stores booleans as `"Y"`/`"N"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanYesNoConverter;

impl ValueConverter for BooleanYesNoConverter {
    fn to_storage(&self, value: Value) -> Result<Value> {
        match value {
            Value::Bool(true) => Ok(Value::Text("Y".to_string())),
            Value::Bool(false) => Ok(Value::Text("N".to_string())),
            Value::Null => Ok(Value::Null),
            other => Err(ConversionError {
                expected: "Bool",
                found: format!("{:?}", other),
            }
            .into()),
        }
    }

    fn from_storage(&self, value: Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(s) => match s.as_str() {
                "Y" | "y" => Ok(Value::Bool(true)),
                "N" | "n" => Ok(Value::Bool(false)),
                _ => Err(ConversionError {
                    expected: "\"Y\" or \"N\"",
                    found: format!("Text({:?})", s),
                }
                .into()),
            },
            other => Err(ConversionError {
                expected: "Text",
                found: format!("{:?}", other),
            }
            .into()),
        }
    }

    fn storage_type(&self) -> Option<SqlType> {
        Some(SqlType::VarChar(1))
    }
}

/// Casts values read from storage to the field's declared type.
///
/// Useful when a provider returns wider types than the entity declares
/// (e.g. `BIGINT` counts read into `i32` fields).
#[derive(Debug, Clone, Copy)]
pub struct CastConverter {
    target: SqlType,
}

impl CastConverter {
    pub const fn new(target: SqlType) -> Self {
        Self { target }
    }
}

impl ValueConverter for CastConverter {
    fn to_storage(&self, value: Value) -> Result<Value> {
        Ok(value)
    }

    fn from_storage(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let cast = match self.target {
            SqlType::Integer => value
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(Value::Int),
            SqlType::BigInt => value.as_i64().map(Value::BigInt),
            SqlType::Double => value.as_f64().map(Value::Double),
            SqlType::Boolean => value.as_i64().map(|n| Value::Bool(n != 0)),
            SqlType::Text | SqlType::VarChar(_) => Some(Value::Text(match &value {
                Value::Int(n) => n.to_string(),
                Value::BigInt(n) => n.to_string(),
                Value::Double(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.as_str().unwrap_or_default().to_string(),
            })),
            _ => Some(value.clone()),
        };
        cast.ok_or_else(|| {
            ConversionError {
                expected: "castable value",
                found: format!("{:?} -> {}", value, self.target.sql_name()),
            }
            .into()
        })
    }

    fn storage_type(&self) -> Option<SqlType> {
        Some(self.target)
    }
}
