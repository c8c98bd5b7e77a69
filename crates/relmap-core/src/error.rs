//! Error taxonomy for mapping, translation, materialization and guarded DML.
//!
//! Every error is raised synchronously at the point of detection and carries the
//! entity, field or expression it concerns. Nothing here is retried internally.

use std::error::Error as StdError;
use std::fmt;

/// Result alias used throughout relmap.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug)]
pub enum Error {
    /// The mapping model is inconsistent.
    Mapping(MappingError),
    /// A filter/sort expression uses an operator or method the translator does not support.
    UnsupportedExpression(UnsupportedExpression),
    /// A mapped field could not be populated from the row stream.
    Materialization(MaterializationError),
    /// UPDATE/DELETE requested without a WHERE fragment and without an explicit opt-in.
    GuardViolation(GuardViolation),
    /// A value could not be converted to the requested type.
    Conversion(ConversionError),
    /// The external execution boundary failed to produce rows.
    Execution(String),
    /// Anything else.
    Custom(String),
}

impl Error {
    /// Shorthand for a mapping error about `entity`.
    pub fn mapping(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError {
            entity: entity.into(),
            message: message.into(),
        })
    }

    /// Shorthand for an unsupported expression node.
    pub fn unsupported(node: impl Into<String>, message: impl Into<String>) -> Self {
        Error::UnsupportedExpression(UnsupportedExpression {
            node: node.into(),
            message: message.into(),
        })
    }

    /// Whether this is a [`GuardViolation`].
    #[must_use]
    pub fn is_guard_violation(&self) -> bool {
        matches!(self, Error::GuardViolation(_))
    }

    /// Whether this is an [`UnsupportedExpression`].
    #[must_use]
    pub fn is_unsupported_expression(&self) -> bool {
        matches!(self, Error::UnsupportedExpression(_))
    }

    /// Whether this is a [`MappingError`].
    #[must_use]
    pub fn is_mapping(&self) -> bool {
        matches!(self, Error::Mapping(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mapping(e) => write!(f, "mapping error: {}", e),
            Error::UnsupportedExpression(e) => write!(f, "unsupported expression: {}", e),
            Error::Materialization(e) => write!(f, "materialization error: {}", e),
            Error::GuardViolation(e) => write!(f, "guard violation: {}", e),
            Error::Conversion(e) => write!(f, "conversion error: {}", e),
            Error::Execution(msg) => write!(f, "execution error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Materialization(e) => e.source.as_deref().map(|s| s as &(dyn StdError + 'static)),
            _ => None,
        }
    }
}

/// The mapping model is inconsistent. Fatal, raised at configuration or planning time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingError {
    /// Entity (type or table) the problem was found on.
    pub entity: String,
    /// What is wrong.
    pub message: String,
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}

/// An expression node the translator cannot express in SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedExpression {
    /// Description of the offending node (e.g. `binary operator Add`).
    pub node: String,
    /// Additional detail.
    pub message: String,
}

impl fmt::Display for UnsupportedExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.message)
    }
}

/// A field could not be populated while materializing a row.
#[derive(Debug)]
pub struct MaterializationError {
    /// Entity being materialized.
    pub entity: String,
    /// Field that failed.
    pub field: String,
    /// What went wrong.
    pub message: String,
    /// Underlying cause, if any.
    pub source: Option<Box<Error>>,
}

impl MaterializationError {
    /// Wrap `cause` with the entity and field it happened on.
    pub fn wrap(entity: impl Into<String>, field: impl Into<String>, cause: Error) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }
}

impl fmt::Display for MaterializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.entity, self.field, self.message)
    }
}

/// The kind of statement a [`GuardViolation`] was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedStatement {
    Update,
    Delete,
}

impl fmt::Display for GuardedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardedStatement::Update => write!(f, "UPDATE"),
            GuardedStatement::Delete => write!(f, "DELETE"),
        }
    }
}

/// UPDATE or DELETE without a WHERE fragment and without `unconditional()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardViolation {
    /// Statement kind.
    pub statement: GuardedStatement,
    /// Target table.
    pub table: String,
}

impl fmt::Display for GuardViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} has no WHERE clause; call unconditional() to affect every row",
            self.statement, self.table
        )
    }
}

/// A value had the wrong shape for its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionError {
    /// Expected type name.
    pub expected: &'static str,
    /// Description of what was found.
    pub found: String,
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.found)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<UnsupportedExpression> for Error {
    fn from(err: UnsupportedExpression) -> Self {
        Error::UnsupportedExpression(err)
    }
}

impl From<MaterializationError> for Error {
    fn from(err: MaterializationError) -> Self {
        Error::Materialization(err)
    }
}

impl From<GuardViolation> for Error {
    fn from(err: GuardViolation) -> Self {
        Error::GuardViolation(err)
    }
}

impl From<ConversionError> for Error {
    fn from(err: ConversionError) -> Self {
        Error::Conversion(err)
    }
}
