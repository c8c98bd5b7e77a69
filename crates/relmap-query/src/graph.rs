//! Graph-loading directives and query planning.
//!
//! A [`GraphDirective`] says which relationship paths a query should populate.
//! The [`GraphPlanner`] expands it against the mapping context into a
//! [`QueryPlan`]: a queue of joined statements ([`QueryQueueItem`]) plus the
//! relationships that must be loaded with follow-up queries per parent
//! ([`DeferredLoad`]).

use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use relmap_core::{
    ColumnNaming, EntityMap, EntityRef, Error, LoadingStrategy, MappingContext, Parameters,
    RelationshipMap, Result,
};

use crate::dialect::Dialect;
use crate::expr::{Expr, SortExpr};
use crate::select::{GraphSelectBuilder, SelectBuilder};
use crate::statement::Statement;
use crate::translate::Translator;

/// Which relationship paths a query populates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum GraphDirective {
    /// Scalars of the root only; every navigation stays unloaded.
    #[default]
    None,
    /// Every mapped relationship, transitively.
    All,
    /// The named dotted paths (and every prefix of each).
    Paths(Vec<String>),
}

impl GraphDirective {
    /// Named paths. An empty list means [`GraphDirective::All`].
    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        if paths.is_empty() {
            GraphDirective::All
        } else {
            GraphDirective::Paths(paths)
        }
    }

    /// Whether any graph loading was requested.
    #[must_use]
    pub fn is_graph(&self) -> bool {
        !matches!(self, GraphDirective::None)
    }

    fn merge(&mut self, other: GraphDirective) {
        *self = match (std::mem::take(self), other) {
            (GraphDirective::All, _) | (_, GraphDirective::All) => GraphDirective::All,
            (GraphDirective::None, d) | (d, GraphDirective::None) => d,
            (GraphDirective::Paths(mut a), GraphDirective::Paths(b)) => {
                for p in b {
                    if !a.contains(&p) {
                        a.push(p);
                    }
                }
                GraphDirective::Paths(a)
            }
        };
    }
}

/// Join `parent` and `name` into a relationship path.
#[must_use]
pub fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

/// One table of a joined statement.
#[derive(Debug, Clone)]
pub struct JoinLevel {
    /// Relationship path from the root; empty for the root.
    pub path: String,
    pub entity: Arc<EntityMap>,
    /// Index of the parent level within the same statement.
    pub parent: Option<usize>,
    /// Relationship from the parent level to this one.
    pub relationship: Option<RelationshipMap>,
    /// Table alias in the joined statement.
    pub alias: String,
}

impl JoinLevel {
    /// The root level.
    #[must_use]
    pub fn root(entity: Arc<EntityMap>) -> Self {
        Self {
            path: String::new(),
            entity,
            parent: None,
            relationship: None,
            alias: "t0".to_string(),
        }
    }

    /// A joined level at position `index` under `parent`.
    #[must_use]
    pub fn child(
        index: usize,
        path: String,
        entity: Arc<EntityMap>,
        parent: usize,
        relationship: RelationshipMap,
    ) -> Self {
        Self {
            path,
            entity,
            parent: Some(parent),
            relationship: Some(relationship),
            alias: format!("t{}", index),
        }
    }

    /// Fields identifying one instance at this level.
    ///
    /// The primary key when there is one; a one-to-one dependent without a
    /// primary key is grouped by its join columns instead.
    pub fn key_fields(&self) -> Result<Vec<&'static str>> {
        let pk: Vec<&'static str> = self.entity.primary_keys().map(|c| c.field).collect();
        if !pk.is_empty() {
            return Ok(pk);
        }
        match &self.relationship {
            Some(rel) if !rel.is_one_to_many() => Ok(rel.join.child.clone()),
            _ => Err(Error::mapping(
                self.entity.name(),
                format!("level {:?} needs a primary key to deduplicate rows", self.path),
            )),
        }
    }
}

/// One logical SQL statement and the relationship paths it populates.
#[derive(Debug, Clone, Serialize)]
pub struct QueryQueueItem {
    pub statement: Statement,
    /// Relationship paths joined into this statement.
    pub paths: Vec<String>,
    /// Tables of the statement, root first, parents before children.
    #[serde(skip)]
    pub levels: Vec<JoinLevel>,
    /// How result columns are named.
    #[serde(skip)]
    pub naming: ColumnNaming,
}

impl QueryQueueItem {
    /// Whether rows should be deduplicated into an entity graph.
    #[must_use]
    pub fn is_graph(&self) -> bool {
        self.naming == ColumnNaming::Alternate
    }
}

/// A relationship loaded with one correlated query per parent instance.
#[derive(Debug, Clone, Serialize)]
pub struct DeferredLoad {
    /// Path of the parent level.
    pub parent_path: String,
    /// Relationship name.
    pub name: &'static str,
    #[serde(skip)]
    pub relationship: RelationshipMap,
    /// Paths to populate on the loaded children.
    pub directive: GraphDirective,
}

impl DeferredLoad {
    /// Path of the loaded children.
    #[must_use]
    pub fn path(&self) -> String {
        child_path(&self.parent_path, self.name)
    }
}

/// Executable plan for one query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    #[serde(skip)]
    pub root: EntityRef,
    pub queue: Vec<QueryQueueItem>,
    pub deferred: Vec<DeferredLoad>,
}

impl QueryPlan {
    /// Whether `path` is populated by a joined statement or a deferred load.
    #[must_use]
    pub fn populates(&self, path: &str) -> bool {
        self.queue
            .iter()
            .any(|item| item.paths.iter().any(|p| p == path))
            || self.deferred.iter().any(|d| d.path() == path)
    }

    /// `(parent path, relationship)` pairs of every level in the plan whose
    /// relationship is lazy and not populated by the plan itself.
    #[must_use]
    pub fn lazy_relationships(&self) -> Vec<(String, RelationshipMap)> {
        let mut out: Vec<(String, RelationshipMap)> = Vec::new();
        for item in &self.queue {
            for level in &item.levels {
                for rel in &level.entity.relationships {
                    if rel.loading != LoadingStrategy::LazyOnAccess {
                        continue;
                    }
                    let path = child_path(&level.path, rel.name);
                    if self.populates(&path) {
                        continue;
                    }
                    if !out.iter().any(|(p, r)| *p == level.path && r.name == rel.name) {
                        out.push((level.path.clone(), rel.clone()));
                    }
                }
            }
        }
        out
    }
}

/// Everything a SELECT needs besides the entity type.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryRequest<'a> {
    pub filter: Option<&'a Expr>,
    pub sorts: &'a [SortExpr],
    pub directive: Option<&'a GraphDirective>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    /// View to read the root from instead of its table.
    pub source: Option<&'a str>,
}

/// Expands graph directives into query plans.
#[derive(Debug, Clone, Copy)]
pub struct GraphPlanner<'a> {
    context: &'a MappingContext,
    dialect: &'a dyn Dialect,
}

/// A relationship path selected for joining.
struct Branch {
    path: String,
    parent_path: String,
    entity: Arc<EntityMap>,
    relationship: RelationshipMap,
}

#[derive(Default)]
struct Expansion {
    joins: Vec<Branch>,
    deferred: Vec<DeferredLoad>,
}

impl Expansion {
    fn has_join(&self, path: &str) -> bool {
        self.joins.iter().any(|b| b.path == path)
    }

    fn defer(&mut self, parent_path: &str, relationship: &RelationshipMap, directive: GraphDirective) {
        if let Some(existing) = self
            .deferred
            .iter_mut()
            .find(|d| d.parent_path == parent_path && d.name == relationship.name)
        {
            existing.directive.merge(directive);
            return;
        }
        self.deferred.push(DeferredLoad {
            parent_path: parent_path.to_string(),
            name: relationship.name,
            relationship: relationship.clone(),
            directive,
        });
    }
}

impl<'a> GraphPlanner<'a> {
    pub fn new(context: &'a MappingContext, dialect: &'a dyn Dialect) -> Self {
        Self { context, dialect }
    }

    /// Plan a query over entity `root`.
    #[tracing::instrument(level = "debug", skip(self, request))]
    pub fn plan(&self, root: TypeId, request: &QueryRequest<'_>) -> Result<QueryPlan> {
        let root_map = Arc::clone(self.context.entity(root)?);
        let directive = request.directive.cloned().unwrap_or_default();

        if !directive.is_graph() {
            let item = self.flat_item(&root_map, request)?;
            return Ok(QueryPlan {
                root: root_map.entity,
                queue: vec![item],
                deferred: Vec::new(),
            });
        }

        if !root_map.has_primary_key() {
            return Err(Error::mapping(
                root_map.name(),
                "graph queries require a primary key on the root entity",
            ));
        }

        let mut expansion = Expansion::default();
        let groups: Vec<Vec<String>> = match &directive {
            GraphDirective::Paths(paths) if !paths.is_empty() => {
                for path in paths {
                    self.expand_path(&root_map, path, &mut expansion)?;
                }
                // One statement per top-level relationship, in request order.
                let mut tops: Vec<String> = Vec::new();
                for branch in &expansion.joins {
                    let top = branch.path.split('.').next().unwrap_or_default().to_string();
                    if !tops.contains(&top) {
                        tops.push(top);
                    }
                }
                tops.into_iter()
                    .map(|top| {
                        expansion
                            .joins
                            .iter()
                            .filter(|b| b.path == top || b.path.starts_with(&format!("{}.", top)))
                            .map(|b| b.path.clone())
                            .collect()
                    })
                    .collect()
            }
            _ => {
                let mut chain = vec![root_map.entity.type_id];
                self.expand_all(&root_map, "", &mut chain, &mut expansion)?;
                vec![expansion.joins.iter().map(|b| b.path.clone()).collect()]
            }
        };

        let mut queue = Vec::with_capacity(groups.len().max(1));
        for group in &groups {
            queue.push(self.graph_item(&root_map, &expansion, group, request)?);
        }
        if queue.is_empty() {
            queue.push(self.graph_item(&root_map, &expansion, &[], request)?);
        }

        tracing::debug!(
            entity = root_map.name(),
            statements = queue.len(),
            deferred = expansion.deferred.len(),
            "Planned graph query"
        );
        Ok(QueryPlan {
            root: root_map.entity,
            queue,
            deferred: expansion.deferred,
        })
    }

    fn target(&self, rel: &RelationshipMap) -> Result<Arc<EntityMap>> {
        self.context.entity(rel.target.type_id).map(Arc::clone)
    }

    fn expand_all(
        &self,
        entity: &Arc<EntityMap>,
        parent_path: &str,
        chain: &mut Vec<TypeId>,
        expansion: &mut Expansion,
    ) -> Result<()> {
        for rel in &entity.relationships {
            if chain.contains(&rel.target.type_id) {
                continue;
            }
            if rel.loading == LoadingStrategy::EagerBySeparateQuery {
                expansion.defer(parent_path, rel, GraphDirective::All);
                continue;
            }
            let target = self.target(rel)?;
            let path = child_path(parent_path, rel.name);
            expansion.joins.push(Branch {
                path: path.clone(),
                parent_path: parent_path.to_string(),
                entity: Arc::clone(&target),
                relationship: rel.clone(),
            });
            chain.push(rel.target.type_id);
            self.expand_all(&target, &path, chain, expansion)?;
            chain.pop();
        }
        Ok(())
    }

    fn expand_path(&self, root: &Arc<EntityMap>, path: &str, expansion: &mut Expansion) -> Result<()> {
        let segments: Vec<&str> = path.split('.').map(str::trim).collect();
        let mut entity = Arc::clone(root);
        let mut parent_path = String::new();

        for (i, segment) in segments.iter().enumerate() {
            let rel = entity.relationship_by_name(segment).cloned().ok_or_else(|| {
                Error::mapping(
                    entity.name(),
                    format!("no relationship named {} (in graph path {:?})", segment, path),
                )
            })?;
            let target = self.target(&rel)?;

            if rel.loading == LoadingStrategy::EagerBySeparateQuery {
                let rest = &segments[i + 1..];
                let directive = if rest.is_empty() {
                    GraphDirective::None
                } else {
                    GraphDirective::Paths(vec![rest.join(".")])
                };
                expansion.defer(&parent_path, &rel, directive);
                return Ok(());
            }

            let this_path = child_path(&parent_path, rel.name);
            if !expansion.has_join(&this_path) {
                expansion.joins.push(Branch {
                    path: this_path.clone(),
                    parent_path: parent_path.clone(),
                    entity: Arc::clone(&target),
                    relationship: rel,
                });
            }
            parent_path = this_path;
            entity = target;
        }
        Ok(())
    }

    fn flat_item(&self, root: &Arc<EntityMap>, request: &QueryRequest<'_>) -> Result<QueryQueueItem> {
        let translator = Translator::new(root, self.dialect);
        let mut parameters = Parameters::new();
        let where_clause = translator.where_clause(request.filter, &mut parameters)?;
        let sql = SelectBuilder::new(root, self.dialect)
            .from_source(request.source)
            .where_clause(where_clause)
            .order_by(translator.sort_tokens(request.sorts)?)
            .skip(request.skip)
            .take(request.take)
            .build();
        Ok(QueryQueueItem {
            statement: Statement::new(sql, parameters),
            paths: Vec::new(),
            levels: vec![JoinLevel::root(Arc::clone(root))],
            naming: ColumnNaming::Name,
        })
    }

    fn graph_item(
        &self,
        root: &Arc<EntityMap>,
        expansion: &Expansion,
        group: &[String],
        request: &QueryRequest<'_>,
    ) -> Result<QueryQueueItem> {
        let mut levels = vec![JoinLevel::root(Arc::clone(root))];
        let mut index_of: BTreeMap<&str, usize> = BTreeMap::new();
        index_of.insert("", 0);

        for branch in expansion.joins.iter().filter(|b| group.contains(&b.path)) {
            let parent = *index_of.get(branch.parent_path.as_str()).ok_or_else(|| {
                Error::Custom(format!("graph path {} was planned before its parent", branch.path))
            })?;
            let index = levels.len();
            levels.push(JoinLevel::child(
                index,
                branch.path.clone(),
                Arc::clone(&branch.entity),
                parent,
                branch.relationship.clone(),
            ));
            index_of.insert(branch.path.as_str(), index);
        }
        for level in &levels {
            level.key_fields()?;
        }

        let translator = Translator::new(root, self.dialect).naming(ColumnNaming::Alternate);
        let mut parameters = Parameters::new();
        let where_clause = translator.where_clause(request.filter, &mut parameters)?;
        let sql = GraphSelectBuilder::new(&levels, self.dialect)
            .from_source(request.source)
            .where_clause(where_clause)
            .order_by(translator.sort_tokens(request.sorts)?)
            .skip(request.skip)
            .take(request.take)
            .build()?;

        Ok(QueryQueueItem {
            statement: Statement::new(sql, parameters),
            paths: group.to_vec(),
            levels,
            naming: ColumnNaming::Alternate,
        })
    }
}
