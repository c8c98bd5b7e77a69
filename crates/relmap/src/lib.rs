//! relmap: SQL generation and entity-graph materialization over mapped types.
//!
//! Map plain Rust structs onto tables with [`EntityMap`], validate the model into
//! a [`MappingContext`] and query it through a [`Session`]. Filters are
//! translated into parameterized SQL, joined result sets are folded back into
//! deduplicated object graphs, and relationships load by join, by separate
//! query or on first access.
//!
//! relmap does not connect to databases. Statements go out through a
//! [`RowSource`] the application implements; rows come back as a [`RowReader`].
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//!
//! let context = Arc::new(
//!     MappingContext::builder()
//!         .register::<Order>(
//!             EntityMap::new::<Order>("Order")
//!                 .column(ColumnMap::new("ID", SqlType::Integer).identity())
//!                 .column(ColumnMap::new("OrderName", SqlType::Text))
//!                 .relationship(RelationshipMap::one_to_many::<OrderItem>(
//!                     "OrderItems",
//!                     JoinPredicate::on("ID", "OrderID"),
//!                 )),
//!         )
//!         .register::<OrderItem>(order_item_map())
//!         .build()?,
//! );
//!
//! let session = Session::new(context, my_source);
//! let orders = session.query::<Order>().graph_all().to_list()?;
//! ```

pub mod session;

pub use relmap_core::{
    BackRef, BooleanIntConverter, BooleanYesNoConverter, CastConverter, ColumnMap, ColumnNaming,
    Entity, EntityArc, EntityMap, EntityRef, Error, HasMany, HasOne, JoinPredicate, LoadState,
    LoadingStrategy, MappingContext, Members, MemoryRows, Navigation, Parameter, Parameters,
    RelationshipMap, Result, RowReader, SqlType, Value, ValueConverter,
};
pub use relmap_query::{
    BinaryOp, DeleteBuilder, Dialect, Expr, GraphDirective, InsertBuilder, MySqlDialect, Operand,
    PostgresDialect, QueryPlan, QueryQueueItem, SelectBuilder, SortExpr, SqlServerDialect,
    SqliteDialect, Statement, Translator, UpdateBuilder, col, val,
};
pub use session::{LoadKind, MAX_BATCH_PARAMETERS, Query, RowSource, Session, SessionConfig};

/// Everything most applications need.
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::{
        BackRef, ColumnMap, Entity, EntityMap, Error, GraphDirective, HasMany, HasOne,
        JoinPredicate, LoadingStrategy, MappingContext, Members, MemoryRows, Operand, Query,
        RelationshipMap, Result, RowReader, RowSource, Session, SessionConfig, SqlType, Statement,
        Value, col, val,
    };
}
