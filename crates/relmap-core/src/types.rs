//! SQL type descriptors.

use serde::Serialize;

use crate::value::Value;

/// The declared or inferred SQL type of a column or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum SqlType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Decimal { precision: u8, scale: u8 },
    #[default]
    Text,
    VarChar(u32),
    Blob,
    Date,
    Timestamp,
    Uuid,
    Json,
}

impl SqlType {
    /// Infer the binding type from a value. `NULL` binds as text.
    #[must_use]
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null | Value::Text(_) => SqlType::Text,
            Value::Bool(_) => SqlType::Boolean,
            Value::Int(_) => SqlType::Integer,
            Value::BigInt(_) => SqlType::BigInt,
            Value::Double(_) => SqlType::Double,
            Value::Decimal(_) => SqlType::Decimal {
                precision: 18,
                scale: 4,
            },
            Value::Bytes(_) => SqlType::Blob,
            Value::Date(_) => SqlType::Date,
            Value::Timestamp(_) => SqlType::Timestamp,
            Value::Uuid(_) => SqlType::Uuid,
            Value::Json(_) => SqlType::Json,
        }
    }

    /// Generic SQL spelling of the type.
    #[must_use]
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            SqlType::Text => "TEXT".to_string(),
            SqlType::VarChar(n) => format!("VARCHAR({})", n),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Uuid => "UUID".to_string(),
            SqlType::Json => "JSON".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_from_right_hand_values() {
        assert_eq!(SqlType::infer(&Value::Int(16)), SqlType::Integer);
        assert_eq!(SqlType::infer(&Value::Text("J".into())), SqlType::Text);
        assert_eq!(SqlType::infer(&Value::Double(5.5)), SqlType::Double);
    }

    #[test]
    fn test_decimal_sql_name() {
        let ty = SqlType::Decimal {
            precision: 10,
            scale: 2,
        };
        assert_eq!(ty.sql_name(), "DECIMAL(10, 2)");
    }
}
