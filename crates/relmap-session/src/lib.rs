//! Query execution and entity-graph materialization for relmap.
//!
//! A [`Session`] ties a validated [`MappingContext`] to an external
//! [`RowSource`]. It plans queries, hands statements to the source, turns the
//! returned rows into entity graphs and wires up relationship loading.
//!
//! # Design Philosophy
//!
//! - **No database code**: the session only ever sees [`Statement`]s going out
//!   and [`RowReader`]s coming back.
//! - **Explicit loading**: navigations stay unloaded unless a graph directive,
//!   a separate-query relationship or a lazy loader fills them.
//! - **Shared handle**: `Session` is a cheap clone over shared state, so lazy
//!   loaders can keep it alive after the query that installed them returns.
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(context, source);
//!
//! let orders = session
//!     .query::<Order>()
//!     .filter(col("OrderName").starts_with("J"))
//!     .order_by(col("OrderName").asc())
//!     .graph(["OrderItems.ItemReceipt"])
//!     .to_list()?;
//! ```

pub mod lazy_tracker;
pub mod loading;
pub mod materialize;
pub mod source;

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::Arc;

use relmap_core::accessor::{accessor, table_for};
use relmap_core::{
    CallSite, Entity, EntityArc, Error, MappingContext, MaterializationError, RelationshipMap,
    Result, RowReader,
};
use relmap_query::{
    DeleteBuilder, Dialect, Expr, GraphDirective, GraphPlanner, InsertBuilder, QueryPlan,
    QueryRequest, SortExpr, Statement, UpdateBuilder, default_dialect,
};

pub use lazy_tracker::{LoadKind, LoadSite, LoadStats, LoadTracker};
pub use loading::{
    MAX_BATCH_PARAMETERS, OnAccessLoader, RelationshipLoader, SeparateQueryLoader, correlated_filter,
};
pub use materialize::{EntityGraph, Materializer};
pub use source::RowSource;

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// SQL dialect of the row source.
    pub dialect: Arc<dyn Dialect>,
    /// Whether to count per-parent loads and warn about N+1 patterns.
    pub detect_n1: bool,
    /// Loads per relationship at which the N+1 warning fires.
    pub n1_threshold: usize,
    /// Issue separate-query loads one query per parent instead of one query
    /// for all parents.
    pub separate_query_per_parent: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            detect_n1: true,
            n1_threshold: 3,
            separate_query_per_parent: true,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Use the built-in dialect called `name`.
    pub fn dialect_named(mut self, name: &str) -> Result<Self> {
        self.dialect = relmap_query::by_name(name)?;
        Ok(self)
    }

    #[must_use]
    pub fn detect_n1(mut self, enabled: bool) -> Self {
        self.detect_n1 = enabled;
        self
    }

    #[must_use]
    pub fn n1_threshold(mut self, threshold: usize) -> Self {
        self.n1_threshold = threshold;
        self
    }

    #[must_use]
    pub fn separate_query_per_parent(mut self, per_parent: bool) -> Self {
        self.separate_query_per_parent = per_parent;
        self
    }
}

// ============================================================================
// Session
// ============================================================================

struct SessionInner {
    context: Arc<MappingContext>,
    source: Arc<dyn RowSource>,
    config: SessionConfig,
    tracker: LoadTracker,
}

/// Entry point for queries and data modification.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("entities", &self.inner.context.len())
            .field("dialect", &self.inner.config.dialect.name())
            .field("detect_n1", &self.inner.config.detect_n1)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session with the default configuration.
    pub fn new(context: Arc<MappingContext>, source: impl RowSource + 'static) -> Self {
        Self::with_config(context, source, SessionConfig::default())
    }

    /// Create a session with a custom configuration.
    pub fn with_config(context: Arc<MappingContext>, source: impl RowSource + 'static, config: SessionConfig) -> Self {
        Self::from_shared(context, Arc::new(source), config)
    }

    /// Create a session over a row source that is shared with other code.
    pub fn from_shared(context: Arc<MappingContext>, source: Arc<dyn RowSource>, config: SessionConfig) -> Self {
        let tracker = if config.detect_n1 {
            LoadTracker::new(config.n1_threshold)
        } else {
            LoadTracker::disabled()
        };
        Self {
            inner: Arc::new(SessionInner {
                context,
                source,
                config,
                tracker,
            }),
        }
    }

    #[must_use]
    pub fn context(&self) -> &MappingContext {
        &self.inner.context
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.inner.config.dialect.as_ref()
    }

    /// Per-parent load counters.
    #[must_use]
    pub fn tracker(&self) -> &LoadTracker {
        &self.inner.tracker
    }

    /// Start a query over `T`.
    #[must_use]
    pub fn query<T: Entity>(&self) -> Query<T> {
        Query::new(self.clone())
    }

    /// Run a statement that returns no entities.
    pub fn execute(&self, statement: &Statement) -> Result<u64> {
        tracing::debug!(sql = %statement.sql, params = ?statement.parameters.values(), "Executing statement");
        self.inner.source.execute(statement)
    }

    /// INSERT `entity`, then write database-generated values back into it.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = T::entity_name()))]
    pub fn insert<T: Entity>(&self, entity: &mut T) -> Result<()> {
        let map = self.inner.context.entity_of::<T>()?;
        let statement = InsertBuilder::new(map, self.dialect()).build(&*entity)?;
        let returned: Vec<_> = map.return_value_columns().collect();
        if returned.is_empty() {
            self.execute(&statement)?;
            return Ok(());
        }

        tracing::debug!(sql = %statement.sql, params = ?statement.parameters.values(), "Executing insert");
        let mut rows = self.inner.source.query(&statement)?;
        if !rows.read()? {
            return Err(Error::Execution(format!(
                "INSERT into {} returned no generated values",
                map.table
            )));
        }
        let single = returned.len() == 1;
        for column in returned {
            // Identity read-backs usually come back as one unnamed column.
            let ordinal = rows
                .ordinal(column.name)
                .or_else(|| (single && rows.field_count() > 0).then_some(0))
                .ok_or_else(|| {
                    Error::Execution(format!(
                        "INSERT into {} did not return a value for {}",
                        map.table, column.name
                    ))
                })?;
            let value = column.from_storage(rows.value(ordinal)?)?;
            accessor::<T>(column.field)?
                .set(&mut *entity, value)
                .map_err(|e| MaterializationError::wrap(map.name(), column.field, e))?;
        }
        Ok(())
    }

    /// UPDATE the row whose primary key matches `entity`.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = T::entity_name()))]
    pub fn update<T: Entity>(&self, entity: &T) -> Result<u64> {
        let map = self.inner.context.entity_of::<T>()?;
        let statement = UpdateBuilder::new(map, self.dialect())
            .where_primary_key(entity)?
            .build(entity)?;
        self.execute(&statement)
    }

    /// UPDATE every row matching `filter` with the values of `entity`.
    #[tracing::instrument(level = "debug", skip(self, entity, filter), fields(entity = T::entity_name()))]
    pub fn update_where<T: Entity>(&self, entity: &T, filter: Expr) -> Result<u64> {
        let map = self.inner.context.entity_of::<T>()?;
        let statement = UpdateBuilder::new(map, self.dialect())
            .filter(filter)
            .build(entity)?;
        self.execute(&statement)
    }

    /// DELETE the row whose primary key matches `entity`.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = T::entity_name()))]
    pub fn delete<T: Entity>(&self, entity: &T) -> Result<u64> {
        let map = self.inner.context.entity_of::<T>()?;
        let statement = DeleteBuilder::new(map, self.dialect())
            .where_primary_key(entity)?
            .build()?;
        self.execute(&statement)
    }

    /// DELETE every row of `T` matching `filter`.
    #[tracing::instrument(level = "debug", skip(self, filter), fields(entity = T::entity_name()))]
    pub fn delete_where<T: Entity>(&self, filter: Expr) -> Result<u64> {
        let map = self.inner.context.entity_of::<T>()?;
        let statement = DeleteBuilder::new(map, self.dialect()).filter(filter).build()?;
        self.execute(&statement)
    }

    /// DELETE every row of `T`.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = T::entity_name()))]
    pub fn delete_all<T: Entity>(&self) -> Result<u64> {
        let map = self.inner.context.entity_of::<T>()?;
        let statement = DeleteBuilder::new(map, self.dialect()).unconditional().build()?;
        self.execute(&statement)
    }

    /// Materialize `rows` as the result of a query over `T` with `directive`.
    ///
    /// The rows must have the shape of the planned statement; the directive
    /// must plan to a single joined statement.
    #[track_caller]
    pub fn materialize<T: Entity>(&self, directive: &GraphDirective, rows: &mut dyn RowReader) -> Result<Vec<Arc<T>>> {
        let request = QueryRequest {
            directive: Some(directive),
            ..QueryRequest::default()
        };
        let plan = self.plan(TypeId::of::<T>(), &request)?;
        let [item] = plan.queue.as_slice() else {
            return Err(Error::Custom(format!(
                "directive {:?} plans {} statements; materialize reads exactly one",
                directive,
                plan.queue.len()
            )));
        };
        let site = Location::caller();
        let mut graph = EntityGraph::new();
        Materializer::new(&self.inner.context, &plan).read(item, rows, &mut graph)?;
        self.load_outstanding(&plan, &graph, site)?;
        downcast_all(graph.into_roots())
    }

    fn plan(&self, root: TypeId, request: &QueryRequest<'_>) -> Result<QueryPlan> {
        GraphPlanner::new(&self.inner.context, self.dialect()).plan(root, request)
    }

    /// Plan, execute and materialize a query; roots in result order.
    pub(crate) fn fetch(
        &self,
        root: TypeId,
        filter: Option<&Expr>,
        directive: &GraphDirective,
        site: CallSite,
    ) -> Result<Vec<EntityArc>> {
        let request = QueryRequest {
            filter,
            directive: Some(directive),
            ..QueryRequest::default()
        };
        let plan = self.plan(root, &request)?;
        self.run_plan(&plan, site)
    }

    fn run_plan(&self, plan: &QueryPlan, site: CallSite) -> Result<Vec<EntityArc>> {
        let materializer = Materializer::new(&self.inner.context, plan);
        let mut graph = EntityGraph::new();
        for item in &plan.queue {
            tracing::debug!(
                entity = plan.root.name,
                sql = %item.statement.sql,
                params = ?item.statement.parameters.values(),
                "Executing query"
            );
            let mut rows = self.inner.source.query(&item.statement)?;
            materializer.read(item, &mut *rows, &mut graph)?;
        }
        self.load_outstanding(plan, &graph, site)?;
        Ok(graph.into_roots())
    }

    /// Run deferred separate-query loads and install lazy loaders.
    fn load_outstanding(&self, plan: &QueryPlan, graph: &EntityGraph, site: CallSite) -> Result<()> {
        for deferred in &plan.deferred {
            let loader = SeparateQueryLoader {
                directive: deferred.directive.clone(),
                per_parent: self.inner.config.separate_query_per_parent,
                site,
            };
            loader.load(self, graph.instances_at(&deferred.parent_path), &deferred.relationship)?;
        }
        for (path, relationship) in plan.lazy_relationships() {
            OnAccessLoader.load(self, graph.instances_at(&path), &relationship)?;
        }
        Ok(())
    }

    pub(crate) fn record_load(&self, parent: &EntityArc, relationship: &RelationshipMap, kind: LoadKind, site: CallSite) {
        let entity = table_for(parent.as_ref().type_id()).map_or("?", |t| t.entity().name);
        self.inner.tracker.record(entity, relationship.name, kind, site);
    }
}

fn downcast_all<T: Entity>(items: Vec<EntityArc>) -> Result<Vec<Arc<T>>> {
    items
        .into_iter()
        .map(|item| {
            item.downcast::<T>().map_err(|_| {
                Error::mapping(T::entity_name(), "query produced instances of a different entity type")
            })
        })
        .collect()
}

// ============================================================================
// Query
// ============================================================================

/// A query over entity type `T`.
///
/// Built fluently and executed with [`Query::to_list`]. The same query can be
/// executed more than once; captured operands are re-read every time.
pub struct Query<T: Entity> {
    session: Session,
    filter: Option<Expr>,
    sorts: Vec<SortExpr>,
    directive: GraphDirective,
    skip: Option<u64>,
    take: Option<u64>,
    source: Option<String>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            filter: self.filter.clone(),
            sorts: self.sorts.clone(),
            directive: self.directive.clone(),
            skip: self.skip,
            take: self.take,
            source: self.source.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity", &T::entity_name())
            .field("filter", &self.filter)
            .field("sorts", &self.sorts)
            .field("directive", &self.directive)
            .field("skip", &self.skip)
            .field("take", &self.take)
            .field("source", &self.source)
            .finish()
    }
}

impl<T: Entity> Query<T> {
    fn new(session: Session) -> Self {
        Self {
            session,
            filter: None,
            sorts: Vec::new(),
            directive: GraphDirective::None,
            skip: None,
            take: None,
            source: None,
            _entity: PhantomData,
        }
    }

    /// Add a filter. Repeated calls are combined with AND.
    #[must_use]
    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Append a sort.
    #[must_use]
    pub fn order_by(mut self, sort: SortExpr) -> Self {
        self.sorts.push(sort);
        self
    }

    /// Populate every relationship, transitively.
    #[must_use]
    pub fn graph_all(mut self) -> Self {
        self.directive = GraphDirective::All;
        self
    }

    /// Populate the named dotted relationship paths.
    #[must_use]
    pub fn graph<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directive = GraphDirective::paths(paths);
        self
    }

    /// Skip this many roots.
    #[must_use]
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Return at most this many roots.
    #[must_use]
    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    /// Read from `view` instead of the mapped table.
    #[must_use]
    pub fn from_view(mut self, view: impl Into<String>) -> Self {
        self.source = Some(view.into());
        self
    }

    /// The execution plan, without running anything.
    pub fn plan(&self) -> Result<QueryPlan> {
        let request = QueryRequest {
            filter: self.filter.as_ref(),
            sorts: &self.sorts,
            directive: Some(&self.directive),
            skip: self.skip,
            take: self.take,
            source: self.source.as_deref(),
        };
        self.session.plan(TypeId::of::<T>(), &request)
    }

    /// Statements the root query would issue, in order.
    pub fn to_sql(&self) -> Result<Vec<Statement>> {
        Ok(self.plan()?.queue.into_iter().map(|item| item.statement).collect())
    }

    /// The plan as pretty-printed JSON.
    pub fn explain(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.plan()?)
            .map_err(|e| Error::Custom(format!("query plan could not be serialized: {}", e)))
    }

    /// Execute and materialize.
    ///
    /// Loads issued for this query, and lazy loaders it installs, report their
    /// call sites to the session's [`LoadTracker`].
    #[track_caller]
    pub fn to_list(&self) -> Result<Vec<Arc<T>>> {
        self.run(Location::caller())
    }

    #[tracing::instrument(level = "debug", skip(self, site), fields(entity = T::entity_name()))]
    fn run(&self, site: CallSite) -> Result<Vec<Arc<T>>> {
        let plan = self.plan()?;
        downcast_all(self.session.run_plan(&plan, site)?)
    }

    /// The first root, if any.
    #[track_caller]
    pub fn first(&self) -> Result<Option<Arc<T>>> {
        Ok(self.clone().take(1).to_list()?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use relmap_core::{ColumnMap, EntityMap, Members, MemoryRows, SqlType, Value};
    use relmap_query::col;

    #[derive(Default, Debug)]
    struct Person {
        id: i32,
        name: String,
    }

    impl Entity for Person {
        fn members(m: &mut Members<Self>) {
            m.field("ID", |p| p.id.into(), |p, v| {
                p.id = v.into_typed()?;
                Ok(())
            })
            .field("Name", |p| p.name.clone().into(), |p, v| {
                p.name = v.into_typed()?;
                Ok(())
            });
        }
    }

    fn context() -> Arc<MappingContext> {
        Arc::new(
            MappingContext::builder()
                .register::<Person>(
                    EntityMap::new::<Person>("Person")
                        .column(ColumnMap::new("ID", SqlType::Integer).identity())
                        .column(ColumnMap::new("Name", SqlType::Text)),
                )
                .build()
                .unwrap(),
        )
    }

    fn recording(rows: MemoryRows) -> (Arc<Mutex<Vec<Statement>>>, impl RowSource + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let source = move |stmt: &Statement| -> Result<MemoryRows> {
            sink.lock().unwrap().push(stmt.clone());
            Ok(rows.clone())
        };
        (log, source)
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::default()
            .dialect_named("sqlite")
            .unwrap()
            .detect_n1(false)
            .n1_threshold(7)
            .separate_query_per_parent(false);
        assert_eq!(config.dialect.name(), "sqlite");
        assert!(!config.detect_n1);
        assert_eq!(config.n1_threshold, 7);
        assert!(SessionConfig::default().dialect_named("oracle").is_err());
    }

    #[test]
    fn test_query_runs_planned_sql() {
        let rows = MemoryRows::new(["ID", "Name"])
            .row([Value::Int(1), Value::from("Jane")])
            .row([Value::Int(2), Value::from("John")]);
        let (log, source) = recording(rows);
        let session = Session::new(context(), source);

        let people = session
            .query::<Person>()
            .filter(col("Name").starts_with("J"))
            .order_by(col("Name").asc())
            .to_list()
            .unwrap();

        assert_eq!(people.len(), 2);
        assert_eq!(people[1].name, "John");
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log[0].sql,
            "SELECT [ID], [Name] FROM [Person] WHERE ([Name] LIKE @P0 + '%') ORDER BY [Name] ASC"
        );
    }

    #[test]
    fn test_insert_reads_back_identity() {
        let (log, source) = recording(MemoryRows::new([""]).row([Value::Int(42)]));
        let session = Session::new(context(), source);
        let mut person = Person {
            id: 0,
            name: "Jane".to_string(),
        };
        session.insert(&mut person).unwrap();
        assert_eq!(person.id, 42);
        assert!(log.lock().unwrap()[0].sql.ends_with("; SELECT SCOPE_IDENTITY()"));
    }

    #[test]
    fn test_delete_all_is_explicit() {
        let (log, source) = recording(MemoryRows::new(["N"]));
        let session = Session::new(context(), source);
        session.delete_all::<Person>().unwrap();
        assert!(session.delete_where::<Person>(col("ID").eq(1)).is_ok());
        let log = log.lock().unwrap();
        assert_eq!(log[0].sql, "DELETE FROM [Person]");
        assert_eq!(log[1].sql, "DELETE FROM [Person] WHERE ([ID] = @P0)");
    }

    #[test]
    fn test_view_override() {
        let (_, source) = recording(MemoryRows::new(["ID", "Name"]));
        let session = Session::new(context(), source);
        let sql = session.query::<Person>().from_view("ActivePeople").to_sql().unwrap();
        assert_eq!(sql[0].sql, "SELECT [ID], [Name] FROM [ActivePeople]");
    }

    #[test]
    fn test_first_pages_to_one() {
        let (log, source) = recording(MemoryRows::new(["ID", "Name"]).row([Value::Int(1), Value::from("Jane")]));
        let session = Session::new(context(), source);
        let first = session.query::<Person>().order_by(col("ID").asc()).first().unwrap();
        assert_eq!(first.unwrap().id, 1);
        assert!(log.lock().unwrap()[0].sql.ends_with("OFFSET 0 ROWS FETCH NEXT 1 ROWS ONLY"));
    }
}
