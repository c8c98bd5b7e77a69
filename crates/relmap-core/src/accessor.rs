//! Field accessors resolved by name.
//!
//! Entities declare their members through [`Members`]; the first request for a
//! type's accessors builds an [`AccessorTable`] and stores it in a process-wide
//! cache keyed by type. Later requests for any `(type, field)` pair are a read
//! lock and a hash lookup.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::entity::{Entity, EntityRef};
use crate::error::{Error, Result};
use crate::navigation::{BackReferenceSlot, EntityArc, NavigationSlot};
use crate::relationship::Cardinality;
use crate::value::Value;

/// A type-erased entity instance.
pub type AnyEntity = dyn Any + Send + Sync;

/// Kind of a declared member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Scalar,
    Navigation,
    BackReference,
}

enum MemberFns<E> {
    Scalar {
        get: fn(&E) -> Value,
        set: fn(&mut E, Value) -> Result<()>,
    },
    Navigation(fn(&E) -> &dyn NavigationSlot),
    BackReference(fn(&E) -> &dyn BackReferenceSlot),
}

impl<E> MemberFns<E> {
    fn kind(&self) -> MemberKind {
        match self {
            MemberFns::Scalar { .. } => MemberKind::Scalar,
            MemberFns::Navigation(_) => MemberKind::Navigation,
            MemberFns::BackReference(_) => MemberKind::BackReference,
        }
    }
}

/// Member declarations of one entity type.
pub struct Members<E> {
    defs: Vec<(&'static str, MemberFns<E>)>,
}

impl<E: Entity> Members<E> {
    fn new() -> Self {
        Self { defs: Vec::new() }
    }

    /// Declare a scalar field.
    pub fn field(
        &mut self,
        name: &'static str,
        get: fn(&E) -> Value,
        set: fn(&mut E, Value) -> Result<()>,
    ) -> &mut Self {
        self.defs.push((name, MemberFns::Scalar { get, set }));
        self
    }

    /// Declare a navigation field (a [`Navigation`](crate::Navigation) cell).
    pub fn navigation(&mut self, name: &'static str, slot: fn(&E) -> &dyn NavigationSlot) -> &mut Self {
        self.defs.push((name, MemberFns::Navigation(slot)));
        self
    }

    /// Declare a back-reference field (a [`BackRef`](crate::BackRef) cell).
    pub fn back_reference(
        &mut self,
        name: &'static str,
        slot: fn(&E) -> &dyn BackReferenceSlot,
    ) -> &mut Self {
        self.defs.push((name, MemberFns::BackReference(slot)));
        self
    }
}

trait ErasedMember: Send + Sync {
    fn get(&self, instance: &AnyEntity) -> Option<Value>;
    fn set(&self, instance: &mut AnyEntity, value: Value) -> Option<Result<()>>;
    fn navigation<'a>(&self, instance: &'a AnyEntity) -> Option<&'a dyn NavigationSlot>;
    fn back_reference<'a>(&self, instance: &'a AnyEntity) -> Option<&'a dyn BackReferenceSlot>;
}

struct TypedMember<E> {
    fns: MemberFns<E>,
}

impl<E: Entity> ErasedMember for TypedMember<E> {
    fn get(&self, instance: &AnyEntity) -> Option<Value> {
        let entity = instance.downcast_ref::<E>()?;
        match &self.fns {
            MemberFns::Scalar { get, .. } => Some(get(entity)),
            _ => None,
        }
    }

    fn set(&self, instance: &mut AnyEntity, value: Value) -> Option<Result<()>> {
        let entity = instance.downcast_mut::<E>()?;
        match &self.fns {
            MemberFns::Scalar { set, .. } => Some(set(entity, value)),
            _ => None,
        }
    }

    fn navigation<'a>(&self, instance: &'a AnyEntity) -> Option<&'a dyn NavigationSlot> {
        let entity = instance.downcast_ref::<E>()?;
        match &self.fns {
            MemberFns::Navigation(slot) => Some(slot(entity)),
            _ => None,
        }
    }

    fn back_reference<'a>(&self, instance: &'a AnyEntity) -> Option<&'a dyn BackReferenceSlot> {
        let entity = instance.downcast_ref::<E>()?;
        match &self.fns {
            MemberFns::BackReference(slot) => Some(slot(entity)),
            _ => None,
        }
    }
}

/// Getter/setter for one member of one entity type.
pub struct Accessor {
    entity: EntityRef,
    name: &'static str,
    kind: MemberKind,
    member: Box<dyn ErasedMember>,
}

impl Accessor {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    #[must_use]
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    fn wrong_kind(&self, wanted: MemberKind) -> Error {
        Error::mapping(
            self.entity.name,
            format!("member {} is {:?}, not {:?}", self.name, self.kind, wanted),
        )
    }

    fn wrong_type(&self) -> Error {
        Error::mapping(
            self.entity.name,
            format!("accessor for {} applied to an instance of another type", self.name),
        )
    }

    fn check(&self, instance: &AnyEntity, wanted: MemberKind) -> Result<()> {
        if instance.type_id() != self.entity.type_id {
            return Err(self.wrong_type());
        }
        if self.kind != wanted {
            return Err(self.wrong_kind(wanted));
        }
        Ok(())
    }

    /// Read a scalar field.
    pub fn get(&self, instance: &AnyEntity) -> Result<Value> {
        self.check(instance, MemberKind::Scalar)?;
        self.member.get(instance).ok_or_else(|| self.wrong_type())
    }

    /// Write a scalar field.
    pub fn set(&self, instance: &mut AnyEntity, value: Value) -> Result<()> {
        self.check(instance, MemberKind::Scalar)?;
        self.member
            .set(instance, value)
            .unwrap_or_else(|| Err(self.wrong_type()))
    }

    /// The navigation cell of `instance`.
    pub fn navigation<'a>(&self, instance: &'a AnyEntity) -> Result<&'a dyn NavigationSlot> {
        self.check(instance, MemberKind::Navigation)?;
        self.member
            .navigation(instance)
            .ok_or_else(|| self.wrong_type())
    }

    /// The back-reference cell of `instance`.
    pub fn back_reference<'a>(&self, instance: &'a AnyEntity) -> Result<&'a dyn BackReferenceSlot> {
        self.check(instance, MemberKind::BackReference)?;
        self.member
            .back_reference(instance)
            .ok_or_else(|| self.wrong_type())
    }

    /// The single entity reachable through a back-reference or a loaded
    /// one-to-one navigation. Collections are rejected.
    pub fn related(&self, instance: &AnyEntity) -> Result<Option<EntityArc>> {
        match self.kind {
            MemberKind::BackReference => Ok(self.back_reference(instance)?.parent()),
            MemberKind::Navigation => {
                let slot = self.navigation(instance)?;
                if slot.cardinality() == Cardinality::OneToMany {
                    return Err(Error::mapping(
                        self.entity.name,
                        format!("{} is a collection and cannot be dereferenced", self.name),
                    ));
                }
                Ok(slot.loaded_entities().and_then(|items| items.into_iter().next()))
            }
            MemberKind::Scalar => Err(self.wrong_kind(MemberKind::BackReference)),
        }
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("entity", &self.entity.name)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// All accessors of one entity type plus its factory.
pub struct AccessorTable {
    entity: EntityRef,
    create: fn() -> Box<AnyEntity>,
    members: HashMap<&'static str, Arc<Accessor>>,
    order: Vec<&'static str>,
    duplicates: Vec<&'static str>,
}

fn create_instance<E: Entity>() -> Box<AnyEntity> {
    Box::new(E::default())
}

impl AccessorTable {
    fn build<E: Entity>() -> Self {
        let mut members = Members::<E>::new();
        E::members(&mut members);

        let entity = EntityRef::of::<E>();
        let mut table = Self {
            entity,
            create: create_instance::<E>,
            members: HashMap::with_capacity(members.defs.len()),
            order: Vec::with_capacity(members.defs.len()),
            duplicates: Vec::new(),
        };
        for (name, fns) in members.defs {
            let accessor = Accessor {
                entity,
                name,
                kind: fns.kind(),
                member: Box::new(TypedMember { fns }),
            };
            if table.members.insert(name, Arc::new(accessor)).is_some() {
                table.duplicates.push(name);
            } else {
                table.order.push(name);
            }
        }
        table
    }

    #[must_use]
    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    /// A fresh default instance of the entity type.
    #[must_use]
    pub fn create(&self) -> Box<AnyEntity> {
        (self.create)()
    }

    /// Accessor for `name`, if declared.
    pub fn get(&self, name: &str) -> Option<&Arc<Accessor>> {
        self.members.get(name)
    }

    /// Accessor for `name`, or a mapping error naming the entity and member.
    pub fn require(&self, name: &str) -> Result<&Arc<Accessor>> {
        self.members.get(name).ok_or_else(|| {
            Error::mapping(
                self.entity.name,
                format!("no member named {} is declared", name),
            )
        })
    }

    /// Declared member names in declaration order.
    pub fn names(&self) -> &[&'static str] {
        &self.order
    }

    /// Names declared more than once.
    pub fn duplicates(&self) -> &[&'static str] {
        &self.duplicates
    }
}

impl fmt::Debug for AccessorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessorTable")
            .field("entity", &self.entity.name)
            .field("members", &self.order)
            .finish_non_exhaustive()
    }
}

struct AccessorCache {
    tables: RwLock<HashMap<TypeId, Arc<AccessorTable>>>,
}

impl AccessorCache {
    fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    fn lookup(&self, type_id: TypeId) -> Option<Arc<AccessorTable>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
            .cloned()
    }

    fn get_or_build<E: Entity>(&self) -> Arc<AccessorTable> {
        let type_id = TypeId::of::<E>();
        if let Some(table) = self.lookup(type_id) {
            return table;
        }

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(tables.entry(type_id).or_insert_with(|| {
            let table = AccessorTable::build::<E>();
            tracing::debug!(
                entity = table.entity.name,
                members = table.order.len(),
                "Built accessor table"
            );
            Arc::new(table)
        }))
    }
}

fn accessor_cache() -> &'static AccessorCache {
    static CACHE: OnceLock<AccessorCache> = OnceLock::new();
    CACHE.get_or_init(AccessorCache::new)
}

/// Accessor table for `E`, built on first use.
#[must_use]
pub fn table<E: Entity>() -> Arc<AccessorTable> {
    accessor_cache().get_or_build::<E>()
}

/// Accessor table for a type that has already been registered.
#[must_use]
pub fn table_for(type_id: TypeId) -> Option<Arc<AccessorTable>> {
    accessor_cache().lookup(type_id)
}

/// Accessor for `E.name`.
pub fn accessor<E: Entity>(name: &str) -> Result<Arc<Accessor>> {
    table::<E>().require(name).cloned()
}

/// Accessor for `name` on whatever entity `instance` is.
pub fn accessor_of(instance: &AnyEntity, name: &str) -> Result<Arc<Accessor>> {
    let table = table_for(instance.type_id()).ok_or_else(|| {
        Error::mapping(
            format!("{:?}", instance.type_id()),
            "entity type has no accessor table; register it with a mapping context",
        )
    })?;
    table.require(name).cloned()
}
