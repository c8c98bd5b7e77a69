//! Column mappings.

use std::fmt;
use std::sync::Arc;

use crate::convert::ValueConverter;
use crate::error::Result;
use crate::types::SqlType;
use crate::value::Value;

/// Which name a column is addressed by in generated SQL and result sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnNaming {
    /// The physical column name.
    #[default]
    Name,
    /// The alternate name if one is mapped, else the physical name.
    ///
    /// Used by joined/graph queries where several tables contribute columns to
    /// one result set.
    Alternate,
}

/// Mapping of one scalar entity field to one table column.
#[derive(Clone)]
pub struct ColumnMap {
    /// Field name on the entity (resolved through the accessor layer).
    pub field: &'static str,
    /// Physical column name.
    pub name: &'static str,
    /// Alternate name, used to disambiguate joined result sets.
    pub alt_name: Option<&'static str>,
    /// Whether this column is (part of) the primary key.
    pub primary_key: bool,
    /// Whether the database assigns this column; excluded from INSERT/UPDATE lists.
    pub auto_increment: bool,
    /// Whether the database generates the value and it must be read back after INSERT.
    pub return_value: bool,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// Declared size (e.g. `VARCHAR(n)`).
    pub size: Option<u32>,
    /// Precision for DECIMAL/NUMERIC.
    pub precision: Option<u8>,
    /// Scale for DECIMAL/NUMERIC.
    pub scale: Option<u8>,
    /// Declared field type.
    pub sql_type: SqlType,
    /// Optional converter between field values and storage values.
    pub converter: Option<Arc<dyn ValueConverter>>,
}

impl ColumnMap {
    /// Map `field` to a column of the same name.
    pub fn new(field: &'static str, sql_type: SqlType) -> Self {
        Self {
            field,
            name: field,
            alt_name: None,
            primary_key: false,
            auto_increment: false,
            return_value: false,
            nullable: false,
            size: None,
            precision: None,
            scale: None,
            sql_type,
            converter: None,
        }
    }

    /// Set the physical column name.
    pub fn column(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Set the alternate name used in joined result sets.
    pub fn alt_name(mut self, name: &'static str) -> Self {
        self.alt_name = Some(name);
        self
    }

    /// Set primary key flag.
    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Set auto-increment flag.
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    /// Set the return-value flag (read the generated value back after INSERT).
    pub fn return_value(mut self, value: bool) -> Self {
        self.return_value = value;
        self
    }

    /// Shorthand for an auto-increment primary key whose value is read back.
    pub fn identity(self) -> Self {
        self.primary_key(true).auto_increment(true).return_value(true)
    }

    /// Set nullable flag.
    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set the declared size.
    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Set both precision and scale for DECIMAL/NUMERIC types.
    pub fn decimal_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Attach a value converter.
    pub fn converter(mut self, converter: impl ValueConverter + 'static) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    /// Attach a shared value converter.
    pub fn shared_converter(mut self, converter: Arc<dyn ValueConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Name this column is addressed by under `naming`.
    #[must_use]
    pub fn result_name(&self, naming: ColumnNaming) -> &'static str {
        match naming {
            ColumnNaming::Name => self.name,
            ColumnNaming::Alternate => self.alt_name.unwrap_or(self.name),
        }
    }

    /// Effective binding type: the converter's storage type wins over the declared type.
    #[must_use]
    pub fn storage_type(&self) -> SqlType {
        self.converter
            .as_ref()
            .and_then(|c| c.storage_type())
            .unwrap_or(match (self.sql_type, self.size, self.precision, self.scale) {
                (SqlType::Text | SqlType::VarChar(_), Some(n), _, _) => SqlType::VarChar(n),
                (SqlType::Decimal { .. }, _, Some(precision), Some(scale)) => {
                    SqlType::Decimal { precision, scale }
                }
                (ty, ..) => ty,
            })
    }

    /// Field value → storage value, through the converter if one is mapped.
    pub fn to_storage(&self, value: Value) -> Result<Value> {
        match &self.converter {
            Some(c) => c.to_storage(value),
            None => Ok(value),
        }
    }

    /// Storage value → field value, through the converter if one is mapped.
    pub fn from_storage(&self, value: Value) -> Result<Value> {
        match &self.converter {
            Some(c) => c.from_storage(value),
            None => Ok(value),
        }
    }
}

impl fmt::Debug for ColumnMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnMap")
            .field("field", &self.field)
            .field("name", &self.name)
            .field("alt_name", &self.alt_name)
            .field("primary_key", &self.primary_key)
            .field("auto_increment", &self.auto_increment)
            .field("return_value", &self.return_value)
            .field("sql_type", &self.sql_type)
            .field("converter", &self.converter)
            .finish_non_exhaustive()
    }
}
