//! Generated SQL plus its bind values.

use std::fmt;

use relmap_core::{Parameter, Parameters};
use serde::Serialize;

/// One SQL statement ready for the execution boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub parameters: Parameters,
}

impl Statement {
    pub fn new(sql: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }

    /// Look a bound parameter up by name (without marker).
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::{SqlType, Value};

    #[test]
    fn test_statement_serializes_with_parameters() {
        let mut parameters = Parameters::new();
        parameters.add("P0", Value::Int(16));
        let stmt = Statement::new("SELECT [ID] FROM [Person] WHERE ([Age] > @P0)", parameters);

        let json = serde_json::to_value(&stmt).unwrap();
        assert_eq!(json["sql"], "SELECT [ID] FROM [Person] WHERE ([Age] > @P0)");
        assert_eq!(json["parameters"][0]["name"], "P0");
        assert_eq!(json["parameters"][0]["value"]["type"], "Int");
        assert_eq!(json["parameters"][0]["value"]["value"], 16);
        assert_eq!(stmt.parameter("P0").unwrap().sql_type, SqlType::Integer);
        assert_eq!(stmt.to_string(), stmt.sql);
    }
}
