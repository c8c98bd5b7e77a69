//! Forward-only row streams.
//!
//! The materializer pulls rows through [`RowReader`]; database drivers implement it
//! over their native result sets. [`MemoryRows`] is the in-process implementation.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// A pull-based, forward-only, single-pass cursor over a result set.
pub trait RowReader {
    /// Advance to the next row. Returns `false` once the stream is exhausted.
    fn read(&mut self) -> Result<bool>;

    /// Value at `ordinal` in the current row.
    fn value(&self, ordinal: usize) -> Result<Value>;

    /// Ordinal of the column called `name`, if present.
    fn ordinal(&self, name: &str) -> Option<usize>;

    /// Number of columns in every row.
    fn field_count(&self) -> usize;
}

/// An in-memory result set.
///
/// ```
/// use relmap_core::row::{MemoryRows, RowReader};
/// use relmap_core::Value;
///
/// let mut rows = MemoryRows::new(["ID", "Name"])
///     .row([Value::Int(1), Value::from("Jane")]);
/// assert!(rows.read().unwrap());
/// assert_eq!(rows.value(rows.ordinal("Name").unwrap()).unwrap(), Value::from("Jane"));
/// assert!(!rows.read().unwrap());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRows {
    columns: Vec<String>,
    lookup: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
    cursor: Option<usize>,
}

impl MemoryRows {
    /// Create an empty result set with the given column names.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut lookup = HashMap::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            lookup.entry(name.to_ascii_lowercase()).or_insert(idx);
        }
        Self {
            columns,
            lookup,
            rows: Vec::new(),
            cursor: None,
        }
    }

    /// Append a row. Missing trailing cells are padded with `NULL`.
    #[must_use]
    pub fn row<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.push(values);
        self
    }

    /// Append a row in place.
    pub fn push<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let mut row: Vec<Value> = values.into_iter().collect();
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Column names in ordinal order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows held.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows are held.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowReader for MemoryRows {
    fn read(&mut self) -> Result<bool> {
        let next = self.cursor.map_or(0, |c| c + 1);
        self.cursor = Some(next.min(self.rows.len()));
        Ok(next < self.rows.len())
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        let row = self
            .cursor
            .and_then(|c| self.rows.get(c))
            .ok_or_else(|| Error::Custom("no current row; call read() first".to_string()))?;
        row.get(ordinal).cloned().ok_or_else(|| {
            Error::Custom(format!(
                "ordinal {} out of range for {} columns",
                ordinal,
                self.columns.len()
            ))
        })
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.lookup.get(&name.to_ascii_lowercase()).copied()
    }

    fn field_count(&self) -> usize {
        self.columns.len()
    }
}
