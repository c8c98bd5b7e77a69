//! Filter and sort expressions.
//!
//! A filter is a small tree: member references to the queried entity on the
//! left, operands on the right, combined with boolean operators. Operands are
//! resolved when the filter is translated, not when it is built:
//!
//! - [`Operand::Literal`]: a constant.
//! - [`Operand::Captured`]: a closure over an outer variable.
//! - [`Operand::Field`]: a field read off a captured entity.
//! - [`Operand::NestedField`]: a field read off the entity a captured entity
//!   points at (its back-reference parent or a one-to-one child).
//!
//! ```
//! use relmap_query::expr::col;
//!
//! let filter = col("Age").gt(16).and(col("Name").starts_with("J"));
//! let order = [col("Name").asc(), col("Age").desc()];
//! # let _ = (filter, order);
//! ```

use std::fmt;
use std::sync::Arc;

use relmap_core::accessor::accessor_of;
use relmap_core::{Entity, EntityArc, Error, Result, Value};

/// Operator of a [`Expr::Binary`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    AndAlso,
    OrElse,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Coalesce,
}

impl BinaryOp {
    /// SQL spelling of the operator, if it is supported.
    #[must_use]
    pub const fn sql(self) -> Option<&'static str> {
        match self {
            BinaryOp::AndAlso => Some("AND"),
            BinaryOp::OrElse => Some("OR"),
            BinaryOp::Equal => Some("="),
            BinaryOp::NotEqual => Some("<>"),
            BinaryOp::GreaterThan => Some(">"),
            BinaryOp::GreaterThanOrEqual => Some(">="),
            BinaryOp::LessThan => Some("<"),
            BinaryOp::LessThanOrEqual => Some("<="),
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::Modulo
            | BinaryOp::Coalesce => None,
        }
    }

    /// Whether this combines two boolean sub-expressions.
    #[must_use]
    pub const fn is_logical(self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }
}

/// Right-hand value of a comparison.
#[derive(Clone)]
pub enum Operand {
    Literal(Value),
    Captured(Arc<dyn Fn() -> Value + Send + Sync>),
    Field {
        owner: EntityArc,
        field: &'static str,
    },
    NestedField {
        owner: EntityArc,
        via: &'static str,
        field: &'static str,
    },
}

impl Operand {
    /// Value produced by `f` at translation time.
    pub fn captured<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Operand::Captured(Arc::new(f))
    }

    /// `owner.field`, read when the filter is translated.
    pub fn field<E: Entity>(owner: &Arc<E>, field: &'static str) -> Self {
        Operand::Field {
            owner: Arc::clone(owner) as EntityArc,
            field,
        }
    }

    /// `owner.via.field`, where `via` is a back-reference or one-to-one navigation.
    pub fn nested_field<E: Entity>(owner: &Arc<E>, via: &'static str, field: &'static str) -> Self {
        Operand::NestedField {
            owner: Arc::clone(owner) as EntityArc,
            via,
            field,
        }
    }

    /// Resolve the operand to a value.
    pub fn resolve(&self) -> Result<Value> {
        match self {
            Operand::Literal(v) => Ok(v.clone()),
            Operand::Captured(f) => Ok(f()),
            Operand::Field { owner, field } => accessor_of(owner.as_ref(), field)?.get(owner.as_ref()),
            Operand::NestedField { owner, via, field } => {
                let via_accessor = accessor_of(owner.as_ref(), via)?;
                let related = via_accessor.related(owner.as_ref())?.ok_or_else(|| {
                    Error::mapping(
                        via_accessor.entity().name,
                        format!("{} is not populated; cannot read {}.{}", via, via, field),
                    )
                })?;
                accessor_of(related.as_ref(), field)?.get(related.as_ref())
            }
        }
    }

    /// Whether the operand is a literal NULL (translated to `IS [NOT] NULL`).
    #[must_use]
    pub fn is_null_literal(&self) -> bool {
        matches!(self, Operand::Literal(Value::Null))
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Operand::Captured(_) => f.write_str("Captured(..)"),
            Operand::Field { field, .. } => f.debug_struct("Field").field("field", field).finish_non_exhaustive(),
            Operand::NestedField { via, field, .. } => f
                .debug_struct("NestedField")
                .field("via", via)
                .field("field", field)
                .finish_non_exhaustive(),
        }
    }
}

macro_rules! operand_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand::Literal(Value::from(v))
                }
            }
        )*
    };
}

operand_from!(bool, i32, i64, f64, String, &str, &String);

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Literal(v)
    }
}

/// A filter expression over one entity type.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A field of the queried entity, by field name.
    Member(String),
    /// A value.
    Operand(Operand),
    /// `left op right`.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// A method call on a member, e.g. `Name.StartsWith("J")`.
    Call {
        method: String,
        target: Box<Expr>,
        args: Vec<Operand>,
    },
}

/// Reference to field `field` of the queried entity.
pub fn col(field: impl Into<String>) -> Expr {
    Expr::Member(field.into())
}

/// A value operand.
pub fn val(operand: impl Into<Operand>) -> Expr {
    Expr::Operand(operand.into())
}

impl Expr {
    /// Build a binary node.
    #[must_use]
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn compare(self, op: BinaryOp, rhs: impl Into<Operand>) -> Self {
        Self::binary(op, self, Expr::Operand(rhs.into()))
    }

    #[must_use]
    pub fn eq(self, rhs: impl Into<Operand>) -> Self {
        self.compare(BinaryOp::Equal, rhs)
    }

    #[must_use]
    pub fn ne(self, rhs: impl Into<Operand>) -> Self {
        self.compare(BinaryOp::NotEqual, rhs)
    }

    #[must_use]
    pub fn gt(self, rhs: impl Into<Operand>) -> Self {
        self.compare(BinaryOp::GreaterThan, rhs)
    }

    #[must_use]
    pub fn ge(self, rhs: impl Into<Operand>) -> Self {
        self.compare(BinaryOp::GreaterThanOrEqual, rhs)
    }

    #[must_use]
    pub fn lt(self, rhs: impl Into<Operand>) -> Self {
        self.compare(BinaryOp::LessThan, rhs)
    }

    #[must_use]
    pub fn le(self, rhs: impl Into<Operand>) -> Self {
        self.compare(BinaryOp::LessThanOrEqual, rhs)
    }

    #[must_use]
    pub fn is_null(self) -> Self {
        self.compare(BinaryOp::Equal, Value::Null)
    }

    #[must_use]
    pub fn is_not_null(self) -> Self {
        self.compare(BinaryOp::NotEqual, Value::Null)
    }

    #[must_use]
    pub fn and(self, other: Expr) -> Self {
        Self::binary(BinaryOp::AndAlso, self, other)
    }

    #[must_use]
    pub fn or(self, other: Expr) -> Self {
        Self::binary(BinaryOp::OrElse, self, other)
    }

    /// `terms[0] OR terms[1] OR ...` as a balanced tree, so nesting grows with
    /// the logarithm of the term count. `None` when `terms` is empty.
    #[must_use]
    pub fn any_of(terms: Vec<Expr>) -> Option<Self> {
        let mut level = terms;
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut pairs = level.into_iter();
            while let Some(left) = pairs.next() {
                next.push(match pairs.next() {
                    Some(right) => left.or(right),
                    None => left,
                });
            }
            level = next;
        }
        level.pop()
    }

    /// Method call on this expression.
    #[must_use]
    pub fn call(self, method: impl Into<String>, args: Vec<Operand>) -> Self {
        Expr::Call {
            method: method.into(),
            target: Box::new(self),
            args,
        }
    }

    #[must_use]
    pub fn contains(self, needle: impl Into<Operand>) -> Self {
        self.call("Contains", vec![needle.into()])
    }

    #[must_use]
    pub fn starts_with(self, prefix: impl Into<Operand>) -> Self {
        self.call("StartsWith", vec![prefix.into()])
    }

    #[must_use]
    pub fn ends_with(self, suffix: impl Into<Operand>) -> Self {
        self.call("EndsWith", vec![suffix.into()])
    }

    /// Ascending sort on this member.
    #[must_use]
    pub fn asc(self) -> SortExpr {
        SortExpr {
            expr: self,
            direction: SortDirection::Asc,
        }
    }

    /// Descending sort on this member.
    #[must_use]
    pub fn desc(self) -> SortExpr {
        SortExpr {
            expr: self,
            direction: SortDirection::Desc,
        }
    }

    /// Short description of the node, used in error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Expr::Member(name) => format!("member {}", name),
            Expr::Operand(op) => format!("operand {:?}", op),
            Expr::Binary { op, .. } => format!("binary operator {:?}", op),
            Expr::Call { method, .. } => format!("method call {}", method),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One ORDER BY item.
#[derive(Debug, Clone)]
pub struct SortExpr {
    pub expr: Expr,
    pub direction: SortDirection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_shapes_tree() {
        let e = col("Age").gt(16).and(col("Name").starts_with("J"));
        match e {
            Expr::Binary { op, left, right } => {
                assert_eq!(op, BinaryOp::AndAlso);
                assert!(matches!(*left, Expr::Binary { op: BinaryOp::GreaterThan, .. }));
                assert!(matches!(*right, Expr::Call { ref method, .. } if method == "StartsWith"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    fn depth(e: &Expr) -> usize {
        match e {
            Expr::Binary { left, right, .. } => 1 + depth(left).max(depth(right)),
            _ => 0,
        }
    }

    #[test]
    fn test_any_of_is_balanced() {
        assert!(Expr::any_of(Vec::new()).is_none());
        assert!(matches!(Expr::any_of(vec![col("ID").eq(1)]), Some(Expr::Binary { op: BinaryOp::Equal, .. })));

        let terms: Vec<Expr> = (0..4096).map(|i| col("ID").eq(i)).collect();
        let tree = Expr::any_of(terms).unwrap();
        // 12 levels of OR above the comparisons.
        assert_eq!(depth(&tree), 13);
    }

    #[test]
    fn test_operator_table() {
        assert_eq!(BinaryOp::NotEqual.sql(), Some("<>"));
        assert_eq!(BinaryOp::AndAlso.sql(), Some("AND"));
        assert_eq!(BinaryOp::Add.sql(), None);
        assert!(BinaryOp::OrElse.is_logical());
    }

    #[test]
    fn test_captured_operand_is_evaluated_late() {
        use std::sync::atomic::{AtomicI32, Ordering};
        let cell = Arc::new(AtomicI32::new(1));
        let inner = Arc::clone(&cell);
        let op = Operand::captured(move || Value::Int(inner.load(Ordering::SeqCst)));
        cell.store(5, Ordering::SeqCst);
        assert_eq!(op.resolve().unwrap(), Value::Int(5));
    }

    #[test]
    fn test_null_literal_detection() {
        assert!(Operand::from(Value::Null).is_null_literal());
        assert!(!Operand::from(0).is_null_literal());
    }

    #[test]
    fn test_sort_direction() {
        let s = col("Name").desc();
        assert_eq!(s.direction.as_sql(), "DESC");
    }
}
