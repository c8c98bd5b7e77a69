//! Entity graph materialization.
//!
//! A joined statement returns one row per leaf of the entity tree, so parents
//! repeat on every row of their children:
//!
//! ```text
//! ID | OrderName | OrderItemID | OrderID | ReceiptItemID | AmountPaid
//!  1 | first     | 10          | 1       | 10            | 5.5
//!  1 | first     | 11          | 1       | NULL          | NULL
//!  2 | second    | NULL        | NULL    | NULL          | NULL
//! ```
//!
//! [`Materializer`] walks the rows once, keeps one instance per
//! `(path, key)`, attaches each child to its parent at most once and skips
//! all-NULL children of unmatched outer joins. Every navigation the plan
//! populates is marked loaded (possibly empty) when its owner is created, so
//! "loaded and empty" stays distinguishable from "never loaded".
//!
//! Several queue items of one plan are merged into one [`EntityGraph`]: roots
//! are shared through the root cache and each item fills its own paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use relmap_core::{
    Accessor, AccessorTable, ColumnMap, ColumnNaming, EntityArc, EntityKey, Error,
    MappingContext, MaterializationError, Result, RowReader,
};
use relmap_query::{QueryPlan, QueryQueueItem, child_path};

/// Entities produced by one plan, indexed by relationship path.
#[derive(Debug, Default)]
pub struct EntityGraph {
    roots: Vec<EntityArc>,
    by_path: HashMap<String, Vec<EntityArc>>,
    cache: HashMap<String, HashMap<EntityKey, EntityArc>>,
    attached: HashSet<(String, EntityKey, EntityKey)>,
}

impl EntityGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Root entities in first-appearance order.
    pub fn roots(&self) -> &[EntityArc] {
        &self.roots
    }

    pub fn into_roots(self) -> Vec<EntityArc> {
        self.roots
    }

    /// Distinct instances materialized at `path` (`""` is the root).
    pub fn instances_at(&self, path: &str) -> &[EntityArc] {
        self.by_path.get(path).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    fn remember(&mut self, path: &str, key: Option<EntityKey>, instance: &EntityArc) {
        if path.is_empty() {
            self.roots.push(Arc::clone(instance));
        }
        self.by_path
            .entry(path.to_string())
            .or_default()
            .push(Arc::clone(instance));
        if let Some(key) = key {
            self.cache
                .entry(path.to_string())
                .or_default()
                .insert(key, Arc::clone(instance));
        }
    }

    fn cached(&self, path: &str, key: &EntityKey) -> Option<EntityArc> {
        self.cache.get(path).and_then(|c| c.get(key)).cloned()
    }
}

struct BoundColumn<'a> {
    column: &'a ColumnMap,
    ordinal: usize,
    setter: Arc<Accessor>,
}

/// Per-level state resolved once per statement.
struct LevelReader<'a> {
    path: &'a str,
    entity: &'static str,
    parent: Option<usize>,
    accessors: Arc<AccessorTable>,
    columns: Vec<BoundColumn<'a>>,
    key_ordinals: Vec<usize>,
    key_fields: Vec<&'static str>,
    type_id: std::any::TypeId,
    /// Navigations of this level the plan populates.
    populated: Vec<Arc<Accessor>>,
    /// Navigation on the parent that receives this level's instances.
    parent_navigation: Option<Arc<Accessor>>,
    /// Back-reference on this level pointing at the parent.
    back_reference: Option<Arc<Accessor>>,
}

/// Turns row streams into entity graphs.
#[derive(Debug)]
pub struct Materializer<'a> {
    context: &'a MappingContext,
    populated: HashSet<String>,
}

impl<'a> Materializer<'a> {
    /// Materializer for the statements of `plan`.
    pub fn new(context: &'a MappingContext, plan: &QueryPlan) -> Self {
        let mut populated: HashSet<String> = plan
            .queue
            .iter()
            .flat_map(|item| item.paths.iter().cloned())
            .collect();
        populated.extend(plan.deferred.iter().map(|d| d.path()));
        Self { context, populated }
    }

    /// Read every row of `rows` (the result of `item.statement`) into `graph`.
    /// Returns the number of rows consumed.
    pub fn read(&self, item: &QueryQueueItem, rows: &mut dyn RowReader, graph: &mut EntityGraph) -> Result<usize> {
        let dedupe = item.is_graph();
        let levels = self.bind(item, &*rows, dedupe)?;
        let mut current: Vec<Option<(Option<EntityKey>, EntityArc)>> = vec![None; levels.len()];
        let mut count = 0;

        while rows.read()? {
            count += 1;
            current.fill(None);

            for (index, level) in levels.iter().enumerate() {
                let parent = match level.parent {
                    Some(p) => match &current[p] {
                        Some(found) => Some(found.clone()),
                        None => continue,
                    },
                    None => None,
                };

                let key = if dedupe {
                    let key = read_key(level, &*rows)?;
                    if key.is_all_null() {
                        // Outer joins yield NULL keys for absent children; a root always has one.
                        if level.parent.is_none() {
                            return Err(MaterializationError {
                                entity: level.entity.to_string(),
                                field: level.key_fields.join(", "),
                                message: format!("row {} has a NULL primary key", count),
                                source: None,
                            }
                            .into());
                        }
                        continue;
                    }
                    Some(key)
                } else {
                    None
                };

                let existing = key.as_ref().and_then(|k| graph.cached(level.path, k));
                let instance = match existing {
                    Some(instance) => instance,
                    None => {
                        let instance = self.create(level, &*rows)?;
                        graph.remember(level.path, key.clone(), &instance);
                        tracing::trace!(entity = level.entity, path = level.path, "Materialized instance");
                        instance
                    }
                };

                if let Some((parent_key, parent)) = parent {
                    let first_sighting = match (&parent_key, &key) {
                        (Some(pk), Some(ck)) => graph.attached.insert((level.path.to_string(), pk.clone(), ck.clone())),
                        _ => true,
                    };
                    if first_sighting {
                        attach(level, &parent, &instance)?;
                    }
                }
                current[index] = Some((key, instance));
            }
        }

        tracing::debug!(rows = count, roots = graph.len(), paths = ?item.paths, "Materialized result set");
        Ok(count)
    }

    fn bind<'i>(&self, item: &'i QueryQueueItem, rows: &dyn RowReader, dedupe: bool) -> Result<Vec<LevelReader<'i>>> {
        let mut out = Vec::with_capacity(item.levels.len());
        for level in &item.levels {
            let map = &level.entity;
            let type_id = map.entity.type_id;
            let accessors = Arc::clone(self.context.accessors(type_id)?);

            let mut columns = Vec::with_capacity(map.columns.len());
            for column in &map.columns {
                columns.push(BoundColumn {
                    column,
                    ordinal: ordinal_of(rows, map.name(), column, item.naming)?,
                    setter: Arc::clone(accessors.require(column.field)?),
                });
            }

            let mut key_ordinals = Vec::new();
            let key_fields = if dedupe { level.key_fields()? } else { Vec::new() };
            if dedupe {
                for &field in &key_fields {
                    let column = map.column_by_field(field).ok_or_else(|| {
                        Error::mapping(map.name(), format!("key field {} is not mapped", field))
                    })?;
                    key_ordinals.push(ordinal_of(rows, map.name(), column, item.naming)?);
                }
            }

            let mut populated = Vec::new();
            for rel in &map.relationships {
                if self.populated.contains(&child_path(&level.path, rel.name)) {
                    populated.push(Arc::clone(accessors.require(rel.name)?));
                }
            }

            let (parent_navigation, back_reference) = match (level.parent, &level.relationship) {
                (Some(p), Some(rel)) => {
                    let parent_type = item.levels[p].entity.entity.type_id;
                    let nav = Arc::clone(self.context.accessors(parent_type)?.require(rel.name)?);
                    let back = match rel.back_reference {
                        Some(field) => Some(Arc::clone(accessors.require(field)?)),
                        None => None,
                    };
                    (Some(nav), back)
                }
                _ => (None, None),
            };

            out.push(LevelReader {
                path: &level.path,
                entity: map.name(),
                parent: level.parent,
                accessors,
                columns,
                key_ordinals,
                key_fields,
                type_id,
                populated,
                parent_navigation,
                back_reference,
            });
        }
        Ok(out)
    }

    fn create(&self, level: &LevelReader<'_>, rows: &dyn RowReader) -> Result<EntityArc> {
        let mut instance = level.accessors.create();
        for bound in &level.columns {
            rows.value(bound.ordinal)
                .and_then(|raw| bound.column.from_storage(raw))
                .and_then(|value| bound.setter.set(&mut *instance, value))
                .map_err(|cause| MaterializationError::wrap(level.entity, bound.column.field, cause))?;
        }
        let instance: EntityArc = Arc::from(instance);
        for nav in &level.populated {
            nav.navigation(instance.as_ref())?.mark_loaded_empty();
        }
        Ok(instance)
    }
}

fn ordinal_of(rows: &dyn RowReader, entity: &str, column: &ColumnMap, naming: ColumnNaming) -> Result<usize> {
    let name = column.result_name(naming);
    rows.ordinal(name).ok_or_else(|| {
        MaterializationError::wrap(
            entity,
            column.field,
            Error::Custom(format!("result set has no column named {}", name)),
        )
        .into()
    })
}

fn read_key(level: &LevelReader<'_>, rows: &dyn RowReader) -> Result<EntityKey> {
    let values = level
        .key_ordinals
        .iter()
        .map(|o| rows.value(*o))
        .collect::<Result<Vec<_>>>()?;
    Ok(EntityKey::new(level.type_id, values))
}

fn attach(level: &LevelReader<'_>, parent: &EntityArc, child: &EntityArc) -> Result<()> {
    if let Some(nav) = &level.parent_navigation {
        nav.navigation(parent.as_ref())?.attach(Arc::clone(child))?;
    }
    if let Some(back) = &level.back_reference {
        back.back_reference(child.as_ref())?.set_parent(parent)?;
    }
    Ok(())
}
