//! Relationship mappings.
//!
//! A relationship is a navigation field on a parent entity whose value is one or
//! many child entities, correlated by a join predicate between key columns. How
//! it gets populated is decided per query (graph directive) and per relationship
//! (loading strategy).

use std::any::TypeId;

use crate::entity::{Entity, EntityRef};

/// Cardinality of a navigation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// One parent has at most one child: `OrderItem` has one `Receipt`.
    OneToOne,
    /// One parent has many children: `Order` has many `OrderItem`s.
    OneToMany,
}

/// How a relationship is populated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadingStrategy {
    /// Populated only when a graph directive names it; joined into the root query.
    #[default]
    None,
    /// Joined into the query when requested by the graph directive.
    EagerByJoin,
    /// Loaded with a correlated follow-up query per parent when requested.
    EagerBySeparateQuery,
    /// Loaded on first access when the query did not populate it.
    LazyOnAccess,
}

/// Correlation between parent and child key columns.
///
/// Columns are addressed by **field name**; `parent[i]` pairs with `child[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPredicate {
    pub parent: Vec<&'static str>,
    pub child: Vec<&'static str>,
}

impl JoinPredicate {
    /// Single-column correlation `parent.parent_field = child.child_field`.
    pub fn on(parent_field: &'static str, child_field: &'static str) -> Self {
        Self {
            parent: vec![parent_field],
            child: vec![child_field],
        }
    }

    /// Add another column pair.
    #[must_use]
    pub fn and(mut self, parent_field: &'static str, child_field: &'static str) -> Self {
        self.parent.push(parent_field);
        self.child.push(child_field);
        self
    }

    /// Column pairs in order.
    pub fn pairs(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.parent.iter().copied().zip(self.child.iter().copied())
    }
}

/// Metadata about one navigation field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipMap {
    /// Navigation field name on the parent.
    pub name: &'static str,
    /// Child entity type.
    pub target: EntityRef,
    /// One-to-one or one-to-many.
    pub cardinality: Cardinality,
    /// Loading strategy.
    pub loading: LoadingStrategy,
    /// Key correlation.
    pub join: JoinPredicate,
    /// Field on the child pointing back at the parent.
    pub back_reference: Option<&'static str>,
}

impl RelationshipMap {
    /// Create a relationship to `T`.
    pub fn new<T: Entity>(name: &'static str, cardinality: Cardinality, join: JoinPredicate) -> Self {
        Self {
            name,
            target: EntityRef::of::<T>(),
            cardinality,
            loading: LoadingStrategy::None,
            join,
            back_reference: None,
        }
    }

    /// One-to-many relationship to `T`.
    pub fn one_to_many<T: Entity>(name: &'static str, join: JoinPredicate) -> Self {
        Self::new::<T>(name, Cardinality::OneToMany, join)
    }

    /// One-to-one relationship to `T`.
    pub fn one_to_one<T: Entity>(name: &'static str, join: JoinPredicate) -> Self {
        Self::new::<T>(name, Cardinality::OneToOne, join)
    }

    /// Set the loading strategy.
    #[must_use]
    pub fn loading(mut self, strategy: LoadingStrategy) -> Self {
        self.loading = strategy;
        self
    }

    /// Shorthand for [`LoadingStrategy::LazyOnAccess`].
    #[must_use]
    pub fn lazy(self) -> Self {
        self.loading(LoadingStrategy::LazyOnAccess)
    }

    /// Set the back-reference field on the child.
    #[must_use]
    pub fn back_reference(mut self, field: &'static str) -> Self {
        self.back_reference = Some(field);
        self
    }

    /// Type id of the child entity.
    #[must_use]
    pub fn target_type(&self) -> TypeId {
        self.target.type_id
    }

    #[must_use]
    pub fn is_one_to_many(&self) -> bool {
        self.cardinality == Cardinality::OneToMany
    }
}
