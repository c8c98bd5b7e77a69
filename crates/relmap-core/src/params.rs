//! Parameter binding.
//!
//! Builders and the expression translator register bind values on a caller-supplied
//! [`ParameterSink`] in left-to-right order. The sink is the documented side channel
//! of otherwise pure SQL generation.

use serde::Serialize;

use crate::types::SqlType;
use crate::value::Value;

/// One bound parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    /// Name without the dialect marker (e.g. `P0`, `OrderName`).
    pub name: String,
    /// Storage value (after any column converter ran).
    pub value: Value,
    /// Binding type, inferred from the value unless the column declares one.
    pub sql_type: SqlType,
}

impl Parameter {
    /// Create a parameter whose type is inferred from `value`.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        let sql_type = value.sql_type();
        Self {
            name: name.into(),
            value,
            sql_type,
        }
    }

    /// Override the binding type.
    #[must_use]
    pub fn with_type(mut self, sql_type: SqlType) -> Self {
        self.sql_type = sql_type;
        self
    }
}

/// Handle returned when a parameter is registered: its position in the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterHandle(pub usize);

/// Receives bind values in order.
pub trait ParameterSink {
    /// Register a parameter and return its handle.
    fn add_parameter(&mut self, parameter: Parameter) -> ParameterHandle;

    /// Number of parameters registered so far.
    fn count(&self) -> usize;
}

/// The default ordered parameter collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Parameters {
    items: Vec<Parameter>,
}

impl Parameters {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for registering a named value.
    pub fn add(&mut self, name: impl Into<String>, value: Value) -> ParameterHandle {
        self.add_parameter(Parameter::new(name, value))
    }

    /// Registered parameters in binding order.
    pub fn as_slice(&self) -> &[Parameter] {
        &self.items
    }

    /// Bind values only, in order.
    pub fn values(&self) -> Vec<Value> {
        self.items.iter().map(|p| p.value.clone()).collect()
    }

    /// Look a parameter up by name.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.items.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Parameter> {
        self.items
    }
}

impl ParameterSink for Parameters {
    fn add_parameter(&mut self, parameter: Parameter) -> ParameterHandle {
        self.items.push(parameter);
        ParameterHandle(self.items.len() - 1)
    }

    fn count(&self) -> usize {
        self.items.len()
    }
}

impl<'a> IntoIterator for &'a Parameters {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
