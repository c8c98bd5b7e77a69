//! SQL generation for relmap.
//!
//! `relmap-query` turns the mapping model from `relmap-core` into SQL text plus
//! ordered bind parameters. Nothing here touches a database.
//!
//! # Role In The Architecture
//!
//! - **Expressions**: [`expr`] builds filter and sort trees; [`Translator`] renders
//!   them into WHERE/ORDER BY fragments, registering bind values on a sink.
//! - **Builders**: [`SelectBuilder`], [`GraphSelectBuilder`], [`InsertBuilder`],
//!   [`UpdateBuilder`] and [`DeleteBuilder`] assemble complete statements.
//! - **Dialects**: every provider-specific bit of syntax sits behind [`Dialect`].
//! - **Planning**: [`GraphPlanner`] expands a [`GraphDirective`] into a
//!   [`QueryPlan`] of joined statements and deferred per-parent loads.

pub mod builder;
pub mod dialect;
pub mod expr;
pub mod graph;
pub mod select;
pub mod statement;
pub mod translate;

pub use builder::{DeleteBuilder, InsertBuilder, UpdateBuilder};
pub use dialect::{
    Dialect, MySqlDialect, PostgresDialect, SqlServerDialect, SqliteDialect, by_name,
    default_dialect,
};
pub use expr::{BinaryOp, Expr, Operand, SortDirection, SortExpr, col, val};
pub use graph::{
    DeferredLoad, GraphDirective, GraphPlanner, JoinLevel, QueryPlan, QueryQueueItem,
    QueryRequest, child_path,
};
pub use select::{GraphSelectBuilder, SelectBuilder};
pub use statement::Statement;
pub use translate::Translator;
