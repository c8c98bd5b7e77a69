//! Session re-exports.
//!
//! `relmap::Session` plans queries, executes them through a [`RowSource`] and
//! materializes entity graphs. The implementation lives in the separate
//! `relmap-session` crate; this module lets applications reach it through the
//! facade without depending on sub-crates directly.

pub use relmap_session::{
    EntityGraph, LoadKind, LoadSite, LoadStats, LoadTracker, MAX_BATCH_PARAMETERS, Materializer,
    OnAccessLoader, Query, RelationshipLoader, RowSource, SeparateQueryLoader, Session,
    SessionConfig,
};
