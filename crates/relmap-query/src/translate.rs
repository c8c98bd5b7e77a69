//! Expression translator: filter/sort expressions to SQL fragments.
//!
//! Comparisons render as `[Column] op @Pn`; every binary node that combines two
//! sub-expressions is parenthesized, and the WHERE fragment as a whole is
//! wrapped once more. Parameters are named `P0`, `P1`, ... in left-to-right
//! order, continuing from whatever the sink already holds.
//!
//! Nothing is registered on the sink unless the whole expression translates.

use relmap_core::{
    ColumnMap, ColumnNaming, EntityMap, Error, Parameter, ParameterSink, Result, Value,
};

use crate::dialect::Dialect;
use crate::expr::{BinaryOp, Expr, Operand, SortExpr};

/// Translates expressions over one entity.
#[derive(Debug, Clone, Copy)]
pub struct Translator<'a> {
    map: &'a EntityMap,
    dialect: &'a dyn Dialect,
    naming: ColumnNaming,
}

impl<'a> Translator<'a> {
    pub fn new(map: &'a EntityMap, dialect: &'a dyn Dialect) -> Self {
        Self {
            map,
            dialect,
            naming: ColumnNaming::Name,
        }
    }

    /// Address columns by `naming` (alternate names for graph queries).
    #[must_use]
    pub fn naming(mut self, naming: ColumnNaming) -> Self {
        self.naming = naming;
        self
    }

    /// `WHERE (<fragment>)`, or an empty string when there is no filter.
    pub fn where_clause(&self, filter: Option<&Expr>, params: &mut dyn ParameterSink) -> Result<String> {
        match filter {
            Some(expr) => Ok(format!("WHERE ({})", self.translate(expr, params)?)),
            None => Ok(String::new()),
        }
    }

    /// Boolean SQL fragment for `expr`.
    pub fn translate(&self, expr: &Expr, params: &mut dyn ParameterSink) -> Result<String> {
        let mut pending = Pending {
            base: params.count(),
            items: Vec::new(),
        };
        let sql = self.node(expr, &mut pending)?;
        for p in pending.items {
            params.add_parameter(p);
        }
        tracing::trace!(entity = self.map.name(), sql = %sql, "Translated filter");
        Ok(sql)
    }

    /// One `[column] ASC|DESC` token per sort expression.
    pub fn sort_tokens(&self, sorts: &[SortExpr]) -> Result<Vec<String>> {
        sorts
            .iter()
            .map(|s| match &s.expr {
                Expr::Member(field) => {
                    let column = self.column(field)?;
                    Ok(format!("{} {}", self.quoted(column), s.direction.as_sql()))
                }
                other => Err(Error::unsupported(
                    other.describe(),
                    "sort expressions must reference a mapped member",
                )),
            })
            .collect()
    }

    /// `ORDER BY a ASC, b DESC`, or an empty string when there are no sorts.
    pub fn order_by(&self, sorts: &[SortExpr]) -> Result<String> {
        let tokens = self.sort_tokens(sorts)?;
        if tokens.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!("ORDER BY {}", tokens.join(", ")))
        }
    }

    fn column(&self, field: &str) -> Result<&'a ColumnMap> {
        self.map.column_by_field(field).ok_or_else(|| {
            Error::mapping(self.map.name(), format!("no column is mapped for field {}", field))
        })
    }

    fn quoted(&self, column: &ColumnMap) -> String {
        self.dialect.quote_identifier(column.result_name(self.naming))
    }

    fn node(&self, expr: &Expr, pending: &mut Pending) -> Result<String> {
        match expr {
            Expr::Binary { op, left, right } => self.binary(expr, *op, left, right, pending),
            Expr::Call {
                method,
                target,
                args,
            } => self.call(method, target, args, pending),
            Expr::Member(_) | Expr::Operand(_) => Err(Error::unsupported(
                expr.describe(),
                "expected a comparison, a logical operator or a string method",
            )),
        }
    }

    fn binary(
        &self,
        node: &Expr,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        pending: &mut Pending,
    ) -> Result<String> {
        let sql_op = op
            .sql()
            .ok_or_else(|| Error::unsupported(node.describe(), "operator is not supported"))?;

        if op.is_logical() || matches!(left, Expr::Binary { .. } | Expr::Call { .. }) {
            let l = self.node(left, pending)?;
            let r = self.node(right, pending)?;
            return Ok(format!("({} {} {})", l, sql_op, r));
        }

        let Expr::Member(field) = left else {
            return Err(Error::unsupported(
                left.describe(),
                "the left side of a comparison must be a mapped member",
            ));
        };
        let Expr::Operand(operand) = right else {
            return Err(Error::unsupported(
                right.describe(),
                "the right side of a comparison must be a value",
            ));
        };

        let column = self.column(field)?;
        let quoted = self.quoted(column);
        let value = if operand.is_null_literal() {
            Value::Null
        } else {
            column.to_storage(operand.resolve()?)?
        };

        if value.is_null() {
            return match op {
                BinaryOp::Equal => Ok(format!("{} IS NULL", quoted)),
                BinaryOp::NotEqual => Ok(format!("{} IS NOT NULL", quoted)),
                _ => Err(Error::unsupported(
                    node.describe(),
                    "NULL can only be compared with == or !=",
                )),
            };
        }

        let placeholder = pending.push(self.dialect, value);
        Ok(format!("{} {} {}", quoted, sql_op, placeholder))
    }

    fn call(&self, method: &str, target: &Expr, args: &[Operand], pending: &mut Pending) -> Result<String> {
        let node = || format!("method call {}", method);
        if !matches!(method, "Contains" | "StartsWith" | "EndsWith") {
            return Err(Error::unsupported(
                node(),
                "only Contains, StartsWith and EndsWith are supported",
            ));
        }
        let Expr::Member(field) = target else {
            return Err(Error::unsupported(node(), "string methods must be called on a mapped member"));
        };
        let [arg] = args else {
            return Err(Error::unsupported(node(), "expected exactly one argument"));
        };

        let column = self.column(field)?;
        let quoted = self.quoted(column);
        let value = column.to_storage(arg.resolve()?)?;
        let p = pending.push(self.dialect, value);
        let pattern = match method {
            "Contains" => self.dialect.concat(&["'%'", p.as_str(), "'%'"]),
            "StartsWith" => self.dialect.concat(&[p.as_str(), "'%'"]),
            _ => self.dialect.concat(&["'%'", p.as_str()]),
        };
        Ok(format!("{} LIKE {}", quoted, pattern))
    }
}

struct Pending {
    base: usize,
    items: Vec<Parameter>,
}

impl Pending {
    fn push(&mut self, dialect: &dyn Dialect, value: Value) -> String {
        let name = format!("P{}", self.base + self.items.len());
        let placeholder = dialect.parameter(&name);
        self.items.push(Parameter::new(name, value));
        placeholder
    }
}
