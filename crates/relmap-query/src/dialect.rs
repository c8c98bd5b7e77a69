//! SQL dialect capability and the built-in providers.
//!
//! Builders never branch on the provider; everything that differs between
//! databases goes through [`Dialect`]. A new provider is a new implementation.

use std::fmt;
use std::sync::Arc;

use relmap_core::{Error, Result};

/// Provider-specific pieces of SQL syntax.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Provider name, as accepted by [`by_name`].
    fn name(&self) -> &'static str;

    /// Opening and closing identifier quote characters.
    fn quote_chars(&self) -> (char, char) {
        ('[', ']')
    }

    /// Quote an identifier, wrapping each dot-separated segment independently.
    fn quote_identifier(&self, ident: &str) -> String {
        let (open, close) = self.quote_chars();
        let escaped_close = format!("{}{}", close, close);
        ident
            .split('.')
            .map(|segment| {
                format!(
                    "{}{}{}",
                    open,
                    segment.replace(close, &escaped_close),
                    close
                )
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Prefix of named parameters in SQL text.
    fn parameter_marker(&self) -> &'static str {
        "@"
    }

    /// Placeholder for the parameter called `name`.
    fn parameter(&self, name: &str) -> String {
        format!("{}{}", self.parameter_marker(), name)
    }

    /// String concatenation of already-rendered SQL operands.
    fn concat(&self, parts: &[&str]) -> String {
        parts.join(" + ")
    }

    /// Clause appended to an INSERT so that it yields the generated values of
    /// `return_columns` (unquoted column names, never empty).
    fn identity_clause(&self, return_columns: &[&str]) -> String;

    /// Whether OFFSET/FETCH style paging needs an ORDER BY to be valid.
    fn paging_requires_order(&self) -> bool {
        false
    }

    /// Paging clause appended after ORDER BY. Empty when both are `None`.
    fn paging(&self, skip: Option<u64>, take: Option<u64>) -> String;
}

/// Microsoft SQL Server. The default provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn identity_clause(&self, _return_columns: &[&str]) -> String {
        "; SELECT SCOPE_IDENTITY()".to_string()
    }

    fn paging_requires_order(&self) -> bool {
        true
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>) -> String {
        match (skip, take) {
            (None, None) => String::new(),
            (skip, None) => format!("OFFSET {} ROWS", skip.unwrap_or(0)),
            (skip, Some(take)) => format!(
                "OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                skip.unwrap_or(0),
                take
            ),
        }
    }
}

/// SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn concat(&self, parts: &[&str]) -> String {
        parts.join(" || ")
    }

    fn identity_clause(&self, _return_columns: &[&str]) -> String {
        "; SELECT last_insert_rowid()".to_string()
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>) -> String {
        limit_offset(skip, take, "-1")
    }
}

/// PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_chars(&self) -> (char, char) {
        ('"', '"')
    }

    fn parameter_marker(&self) -> &'static str {
        ":"
    }

    fn concat(&self, parts: &[&str]) -> String {
        parts.join(" || ")
    }

    fn identity_clause(&self, return_columns: &[&str]) -> String {
        let cols: Vec<String> = return_columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        format!(" RETURNING {}", cols.join(", "))
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>) -> String {
        match (skip, take) {
            (None, None) => String::new(),
            (Some(skip), None) => format!("OFFSET {}", skip),
            (skip, Some(take)) => limit_offset(skip, Some(take), "ALL"),
        }
    }
}

/// MySQL / MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_chars(&self) -> (char, char) {
        ('`', '`')
    }

    fn concat(&self, parts: &[&str]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }

    fn identity_clause(&self, _return_columns: &[&str]) -> String {
        "; SELECT LAST_INSERT_ID()".to_string()
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>) -> String {
        limit_offset(skip, take, "18446744073709551615")
    }
}

fn limit_offset(skip: Option<u64>, take: Option<u64>, unbounded: &str) -> String {
    match (skip, take) {
        (None, None) => String::new(),
        (None, Some(take)) => format!("LIMIT {}", take),
        (Some(skip), Some(take)) => format!("LIMIT {} OFFSET {}", take, skip),
        (Some(skip), None) => format!("LIMIT {} OFFSET {}", unbounded, skip),
    }
}

/// The default provider.
#[must_use]
pub fn default_dialect() -> Arc<dyn Dialect> {
    Arc::new(SqlServerDialect)
}

/// Resolve a provider by name (case-insensitive).
pub fn by_name(name: &str) -> Result<Arc<dyn Dialect>> {
    match name.to_ascii_lowercase().as_str() {
        "sqlserver" | "mssql" => Ok(Arc::new(SqlServerDialect)),
        "sqlite" => Ok(Arc::new(SqliteDialect)),
        "postgres" | "postgresql" => Ok(Arc::new(PostgresDialect)),
        "mysql" | "mariadb" => Ok(Arc::new(MySqlDialect)),
        other => Err(Error::Custom(format!("unknown SQL dialect: {}", other))),
    }
}
