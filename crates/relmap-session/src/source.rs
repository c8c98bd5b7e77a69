//! The execution boundary.
//!
//! relmap never talks to a database itself. A [`RowSource`] receives finished
//! statements and hands back forward-only row streams; connection handling,
//! retries and transactions belong to whoever implements it.

use relmap_core::{MemoryRows, Result, RowReader};
use relmap_query::Statement;

/// Executes statements on behalf of a session.
pub trait RowSource: Send + Sync {
    /// Run `statement` and return its result set.
    fn query(&self, statement: &Statement) -> Result<Box<dyn RowReader + '_>>;

    /// Run a statement that produces no rows and report the affected row count.
    ///
    /// The default drains the result of [`RowSource::query`] and counts its rows;
    /// driver-backed sources report the server's count instead.
    fn execute(&self, statement: &Statement) -> Result<u64> {
        let mut rows = self.query(statement)?;
        let mut count = 0;
        while rows.read()? {
            count += 1;
        }
        Ok(count)
    }
}

impl<F> RowSource for F
where
    F: Fn(&Statement) -> Result<MemoryRows> + Send + Sync,
{
    fn query(&self, statement: &Statement) -> Result<Box<dyn RowReader + '_>> {
        Ok(Box::new(self(statement)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::{Parameters, Value};

    #[test]
    fn test_closure_source() {
        let source = |stmt: &Statement| -> Result<MemoryRows> {
            assert_eq!(stmt.sql, "SELECT 1");
            Ok(MemoryRows::new(["N"]).row([Value::Int(1)]).row([Value::Int(2)]))
        };
        let stmt = Statement::new("SELECT 1", Parameters::new());
        let mut rows = source.query(&stmt).unwrap();
        assert!(rows.read().unwrap());
        assert_eq!(rows.value(0).unwrap(), Value::Int(1));
        assert_eq!(source.execute(&stmt).unwrap(), 2);
    }
}
