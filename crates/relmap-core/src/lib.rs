//! Core types and traits for relmap.
//!
//! `relmap-core` is the **foundation layer**. It defines the mapping model and the
//! data types every other crate builds on.
//!
//! # Role In The Architecture
//!
//! - **Mapping model**: [`EntityMap`], [`ColumnMap`], [`RelationshipMap`] and the
//!   validated [`MappingContext`] describe how entity types map onto tables.
//! - **Accessor layer**: [`Entity`] implementations declare their members once;
//!   [`accessor`] turns them into cached, name-addressed getters and setters.
//! - **Navigation cells**: [`Navigation`] and [`BackRef`] hold relationship values
//!   with an explicit unloaded/loading/loaded state.
//! - **Data model**: [`Value`], [`SqlType`], [`Parameter`] and [`RowReader`] are what
//!   flows across the execution boundary.
//!
//! # Who Uses This Crate
//!
//! - `relmap-query` consumes entity maps and values to build SQL.
//! - `relmap-session` reads rows through [`RowReader`] and materializes entity graphs.
//!
//! Most applications should use the `relmap` facade.

pub mod accessor;
pub mod column;
pub mod context;
pub mod convert;
pub mod entity;
pub mod error;
pub mod key;
pub mod navigation;
pub mod params;
pub mod relationship;
pub mod row;
pub mod types;
pub mod value;

pub use accessor::{Accessor, AccessorTable, AnyEntity, MemberKind, Members};
pub use column::{ColumnMap, ColumnNaming};
pub use context::{MappingContext, MappingContextBuilder};
pub use convert::{BooleanIntConverter, BooleanYesNoConverter, CastConverter, ValueConverter};
pub use entity::{Entity, EntityMap, EntityRef};
pub use error::{
    ConversionError, Error, GuardViolation, GuardedStatement, MappingError, MaterializationError,
    Result, UnsupportedExpression,
};
pub use key::EntityKey;
pub use navigation::{
    BackRef, BackReferenceSlot, CallSite, EntityArc, HasMany, HasOne, LazyLoader, LoadState, Navigation,
    NavigationSlot, NavigationValue,
};
pub use params::{Parameter, ParameterHandle, ParameterSink, Parameters};
pub use relationship::{Cardinality, JoinPredicate, LoadingStrategy, RelationshipMap};
pub use row::{MemoryRows, RowReader};
pub use types::SqlType;
pub use value::{FromValue, Value};
