//! Entity identity keys.
//!
//! Graph materialization deduplicates entities by type plus key values. Keys
//! compare integers across widths (`Int(1) == BigInt(1)`) and floats by bit
//! pattern, so they can be used as hash-map keys.

use std::any::TypeId;
use std::hash::{Hash, Hasher};

use crate::value::Value;

/// Identity of one entity instance within a result set.
#[derive(Debug, Clone)]
pub struct EntityKey {
    type_id: TypeId,
    values: Vec<Value>,
}

impl EntityKey {
    /// Key for an entity of type `type_id` with key column values `values`.
    #[must_use]
    pub fn new(type_id: TypeId, values: Vec<Value>) -> Self {
        Self { type_id, values }
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Whether every key value is NULL (an unmatched outer-join row).
    #[must_use]
    pub fn is_all_null(&self) -> bool {
        self.values.iter().all(Value::is_null)
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| key_value_eq(a, b))
    }
}

impl Eq for EntityKey {}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        for v in &self.values {
            hash_value(v, state);
        }
    }
}

fn key_value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::BigInt(_), Value::Int(_) | Value::BigInt(_)) => a.as_i64() == b.as_i64(),
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Int(i) => {
            2u8.hash(hasher);
            i64::from(*i).hash(hasher);
        }
        Value::BigInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            3u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Decimal(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Text(s) => {
            5u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            6u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Date(s) => {
            7u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Timestamp(s) => {
            8u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Uuid(s) => {
            9u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Json(j) => {
            10u8.hash(hasher);
            j.to_string().hash(hasher);
        }
    }
}
