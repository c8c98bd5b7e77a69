//! Relationship loading strategies.
//!
//! Joined relationships are filled by the materializer while it reads the root
//! statement. Everything else goes through a [`RelationshipLoader`] once the
//! parents exist:
//!
//! - [`SeparateQueryLoader`] runs a correlated query for the children right away.
//! - [`OnAccessLoader`] installs a deferred query on each parent's navigation;
//!   it runs on the first `load()` of that field.
//!
//! Both correlate children to a parent with an equality filter per join pair
//! whose right side reads the parent's key field when the filter is translated.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use relmap_core::accessor::accessor_of;
use relmap_core::{
    CallSite, EntityArc, EntityKey, Error, LazyLoader, LoadState, RelationshipMap, Result, Value,
};
use relmap_query::{Expr, GraphDirective, Operand, col};

use crate::Session;
use crate::lazy_tracker::LoadKind;

/// Parameters bound by one batched child query. Stays below the 2100
/// parameters SQL Server accepts per statement.
pub const MAX_BATCH_PARAMETERS: usize = 2000;

/// Populates one relationship on already-materialized parents.
pub trait RelationshipLoader {
    fn load(&self, session: &Session, parents: &[EntityArc], relationship: &RelationshipMap) -> Result<()>;
}

/// `child.c1 = parent.p1 AND child.c2 = parent.p2 ...`
pub fn correlated_filter(parent: &EntityArc, relationship: &RelationshipMap) -> Result<Expr> {
    let mut filter: Option<Expr> = None;
    for (parent_field, child_field) in relationship.join.pairs() {
        let term = col(child_field).eq(Operand::Field {
            owner: Arc::clone(parent),
            field: parent_field,
        });
        filter = Some(match filter {
            Some(existing) => existing.and(term),
            None => term,
        });
    }
    filter.ok_or_else(|| {
        Error::mapping(
            relationship.target.name,
            format!("relationship {} has an empty join predicate", relationship.name),
        )
    })
}

/// Values of the parent side of the join, in pair order.
fn parent_join_values(parent: &EntityArc, relationship: &RelationshipMap) -> Result<Vec<Value>> {
    relationship
        .join
        .parent
        .iter()
        .map(|field| accessor_of(parent.as_ref(), field)?.get(parent.as_ref()))
        .collect()
}

fn child_join_values(child: &EntityArc, relationship: &RelationshipMap) -> Result<Vec<Value>> {
    relationship
        .join
        .child
        .iter()
        .map(|field| accessor_of(child.as_ref(), field)?.get(child.as_ref()))
        .collect()
}

/// Point each child's back-reference (if mapped) at `parent`.
pub(crate) fn link_back_references(
    parent: &EntityArc,
    relationship: &RelationshipMap,
    children: &[EntityArc],
) -> Result<()> {
    if let Some(field) = relationship.back_reference {
        for child in children {
            accessor_of(child.as_ref(), field)?
                .back_reference(child.as_ref())?
                .set_parent(parent)?;
        }
    }
    Ok(())
}

/// Publish `children` as the loaded value of `parent.relationship`.
fn publish(parent: &EntityArc, relationship: &RelationshipMap, children: Vec<EntityArc>) -> Result<()> {
    link_back_references(parent, relationship, &children)?;
    accessor_of(parent.as_ref(), relationship.name)?
        .navigation(parent.as_ref())?
        .set_loaded_entities(children)
}

/// Loads children with follow-up queries, eagerly.
#[derive(Debug, Clone)]
pub struct SeparateQueryLoader {
    /// Paths to populate on the loaded children.
    pub directive: GraphDirective,
    /// One query per parent, or one query per batch of parents.
    pub per_parent: bool,
    /// Code that issued the root query, reported with N+1 warnings.
    pub site: CallSite,
}

impl SeparateQueryLoader {
    fn load_each(&self, session: &Session, parents: &[EntityArc], relationship: &RelationshipMap) -> Result<()> {
        for parent in parents {
            if parent_join_values(parent, relationship)?.iter().all(Value::is_null) {
                publish(parent, relationship, Vec::new())?;
                continue;
            }
            session.record_load(parent, relationship, LoadKind::SeparateQuery, self.site);
            let filter = correlated_filter(parent, relationship)?;
            let children = session.fetch(relationship.target.type_id, Some(&filter), &self.directive, self.site)?;
            publish(parent, relationship, children)?;
        }
        Ok(())
    }

    fn load_batched(&self, session: &Session, parents: &[EntityArc], relationship: &RelationshipMap) -> Result<()> {
        let group_of = |values: Vec<Value>| EntityKey::new(relationship.target.type_id, values);

        // One term per distinct join key, so each child is fetched once.
        let mut terms = Vec::with_capacity(parents.len());
        let mut keys = Vec::with_capacity(parents.len());
        let mut seen = HashSet::with_capacity(parents.len());
        for parent in parents {
            let values = parent_join_values(parent, relationship)?;
            let correlated = !values.iter().all(Value::is_null);
            let key = group_of(values);
            if correlated && seen.insert(key.clone()) {
                terms.push(correlated_filter(parent, relationship)?);
            }
            keys.push(key);
        }

        let per_statement = (MAX_BATCH_PARAMETERS / relationship.join.parent.len().max(1)).max(1);
        let mut grouped: HashMap<EntityKey, Vec<EntityArc>> = HashMap::new();
        let mut pending = terms.into_iter().peekable();
        while pending.peek().is_some() {
            let batch: Vec<Expr> = pending.by_ref().take(per_statement).collect();
            let Some(filter) = Expr::any_of(batch) else {
                break;
            };
            let children = session.fetch(relationship.target.type_id, Some(&filter), &self.directive, self.site)?;
            for child in children {
                let key = group_of(child_join_values(&child, relationship)?);
                grouped.entry(key).or_default().push(child);
            }
        }

        for (parent, key) in parents.iter().zip(&keys) {
            let children = grouped.get(key).cloned().unwrap_or_default();
            publish(parent, relationship, children)?;
        }
        Ok(())
    }
}

impl RelationshipLoader for SeparateQueryLoader {
    fn load(&self, session: &Session, parents: &[EntityArc], relationship: &RelationshipMap) -> Result<()> {
        if parents.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            relationship = relationship.name,
            parents = parents.len(),
            per_parent = self.per_parent,
            "Loading relationship by separate query"
        );
        if self.per_parent {
            self.load_each(session, parents, relationship)
        } else {
            self.load_batched(session, parents, relationship)
        }
    }
}

/// Installs deferred loaders that query on first access.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnAccessLoader;

impl RelationshipLoader for OnAccessLoader {
    fn load(&self, session: &Session, parents: &[EntityArc], relationship: &RelationshipMap) -> Result<()> {
        for parent in parents {
            let slot = accessor_of(parent.as_ref(), relationship.name)?.navigation(parent.as_ref())?;
            if slot.load_state() != LoadState::Unloaded {
                continue;
            }

            // The loader lives inside the parent, so it must not own it.
            let weak = Arc::downgrade(parent);
            let session = session.clone();
            let relationship = relationship.clone();
            let loader: LazyLoader = Arc::new(move |site: CallSite| {
                let parent = weak.upgrade().ok_or_else(|| {
                    Error::Custom(format!(
                        "parent of {} was dropped before the relationship was loaded",
                        relationship.name
                    ))
                })?;
                session.record_load(&parent, &relationship, LoadKind::Lazy, site);
                if parent_join_values(&parent, &relationship)?.iter().all(Value::is_null) {
                    return Ok(Vec::new());
                }
                let filter = correlated_filter(&parent, &relationship)?;
                let children = session.fetch(relationship.target.type_id, Some(&filter), &GraphDirective::None, site)?;
                link_back_references(&parent, &relationship, &children)?;
                Ok(children)
            });
            slot.install_loader(loader);
        }
        Ok(())
    }
}
