//! The mapping context: every registered entity map, validated together.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::accessor::{self, AccessorTable, MemberKind};
use crate::column::ColumnNaming;
use crate::entity::{Entity, EntityMap, EntityRef};
use crate::error::{Error, Result};

/// Accepted table/column identifier segment. Tables may be dot-qualified.
const IDENTIFIER: &str = r"^[A-Za-z_#@][A-Za-z0-9_$#@]*$";

fn identifier_regex() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(IDENTIFIER))
        .as_ref()
        .map_err(|e| Error::Custom(format!("invalid identifier pattern: {}", e)))
}

fn check_identifier(entity: &str, what: &str, ident: &str, max_parts: usize) -> Result<()> {
    let re = identifier_regex()?;
    let parts: Vec<&str> = ident.split('.').collect();
    if parts.len() > max_parts || !parts.iter().all(|p| re.is_match(p)) {
        return Err(Error::mapping(
            entity,
            format!("{} {:?} is not a valid identifier", what, ident),
        ));
    }
    Ok(())
}

#[derive(Debug)]
struct Registered {
    map: Arc<EntityMap>,
    accessors: Arc<AccessorTable>,
    registered_as: EntityRef,
}

/// Builder for [`MappingContext`].
#[derive(Debug, Default)]
pub struct MappingContextBuilder {
    entries: Vec<Registered>,
}

impl MappingContextBuilder {
    /// Register `E` with its mapping. Builds `E`'s accessor table.
    #[must_use]
    pub fn register<E: Entity>(mut self, map: EntityMap) -> Self {
        self.entries.push(Registered {
            map: Arc::new(map),
            accessors: accessor::table::<E>(),
            registered_as: EntityRef::of::<E>(),
        });
        self
    }

    /// Validate every mapping and produce the context.
    #[tracing::instrument(level = "debug", skip(self), fields(entities = self.entries.len()))]
    pub fn build(self) -> Result<MappingContext> {
        let mut entities = HashMap::with_capacity(self.entries.len());
        for entry in self.entries {
            if entry.map.entity != entry.registered_as {
                return Err(Error::mapping(
                    entry.registered_as.name,
                    format!(
                        "entity map describes {} but was registered for {}",
                        entry.map.entity, entry.registered_as
                    ),
                ));
            }
            let type_id = entry.registered_as.type_id;
            if entities.contains_key(&type_id) {
                return Err(Error::mapping(
                    entry.registered_as.name,
                    "entity registered more than once",
                ));
            }
            entities.insert(type_id, entry);
        }

        let context = MappingContext { entities };
        for entry in context.entities.values() {
            context.validate(entry)?;
        }
        tracing::info!(entities = context.entities.len(), "Mapping context built");
        Ok(context)
    }
}

/// Every entity mapping known to a session.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug)]
pub struct MappingContext {
    entities: HashMap<TypeId, Registered>,
}

impl MappingContext {
    #[must_use]
    pub fn builder() -> MappingContextBuilder {
        MappingContextBuilder::default()
    }

    /// Mapping of the entity with type id `type_id`.
    pub fn entity(&self, type_id: TypeId) -> Result<&Arc<EntityMap>> {
        self.entities
            .get(&type_id)
            .map(|e| &e.map)
            .ok_or_else(|| Error::mapping(format!("{:?}", type_id), "entity type is not registered"))
    }

    /// Mapping of `E`.
    pub fn entity_of<E: Entity>(&self) -> Result<&Arc<EntityMap>> {
        self.entities
            .get(&TypeId::of::<E>())
            .map(|e| &e.map)
            .ok_or_else(|| Error::mapping(E::entity_name(), "entity type is not registered"))
    }

    /// Accessor table of the entity with type id `type_id`.
    pub fn accessors(&self, type_id: TypeId) -> Result<&Arc<AccessorTable>> {
        self.entities
            .get(&type_id)
            .map(|e| &e.accessors)
            .ok_or_else(|| Error::mapping(format!("{:?}", type_id), "entity type is not registered"))
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All registered mappings, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityMap>> {
        self.entities.values().map(|e| &e.map)
    }

    fn validate(&self, entry: &Registered) -> Result<()> {
        let map = &entry.map;
        let name = map.name();
        let table = &entry.accessors;

        check_identifier(name, "table", map.table, 3)?;
        if let Some(dup) = table.duplicates().first() {
            return Err(Error::mapping(name, format!("member {} is declared more than once", dup)));
        }

        let mut fields = HashSet::new();
        let mut names = HashSet::new();
        let mut alt_names = HashSet::new();
        for column in &map.columns {
            check_identifier(name, "column", column.name, 1)?;
            if let Some(alt) = column.alt_name {
                check_identifier(name, "alternate name", alt, 1)?;
            }
            if !fields.insert(column.field) {
                return Err(Error::mapping(name, format!("field {} is mapped twice", column.field)));
            }
            if !names.insert(column.result_name(ColumnNaming::Name).to_ascii_lowercase()) {
                return Err(Error::mapping(name, format!("column {} is mapped twice", column.name)));
            }
            if !alt_names.insert(column.result_name(ColumnNaming::Alternate).to_ascii_lowercase()) {
                return Err(Error::mapping(
                    name,
                    format!("result name {} is mapped twice", column.result_name(ColumnNaming::Alternate)),
                ));
            }
            let accessor = table.require(column.field)?;
            if accessor.kind() != MemberKind::Scalar {
                return Err(Error::mapping(
                    name,
                    format!("column {} is mapped onto a non-scalar member", column.field),
                ));
            }
        }

        let probe = table.create();
        for rel in &map.relationships {
            let accessor = table.require(rel.name)?;
            let slot = accessor.navigation(probe.as_ref())?;
            if slot.cardinality() != rel.cardinality {
                return Err(Error::mapping(
                    name,
                    format!(
                        "relationship {} is {:?} but its navigation holds {:?}",
                        rel.name,
                        rel.cardinality,
                        slot.cardinality()
                    ),
                ));
            }

            let target = self.entities.get(&rel.target.type_id).ok_or_else(|| {
                Error::mapping(
                    name,
                    format!("relationship {} targets unregistered entity {}", rel.name, rel.target),
                )
            })?;

            if rel.join.parent.is_empty() || rel.join.parent.len() != rel.join.child.len() {
                return Err(Error::mapping(
                    name,
                    format!("relationship {} has an unbalanced join predicate", rel.name),
                ));
            }
            for (parent_field, child_field) in rel.join.pairs() {
                if map.column_by_field(parent_field).is_none() {
                    return Err(Error::mapping(
                        name,
                        format!("join column {} of {} is not mapped", parent_field, rel.name),
                    ));
                }
                if target.map.column_by_field(child_field).is_none() {
                    return Err(Error::mapping(
                        target.map.name(),
                        format!("join column {} of {}.{} is not mapped", child_field, name, rel.name),
                    ));
                }
            }

            if rel.is_one_to_many() && !target.map.has_primary_key() {
                return Err(Error::mapping(
                    target.map.name(),
                    format!("one-to-many relationship {}.{} requires a primary key on the child", name, rel.name),
                ));
            }

            if let Some(back) = rel.back_reference {
                let back_accessor = target.accessors.require(back)?;
                if back_accessor.kind() != MemberKind::BackReference {
                    return Err(Error::mapping(
                        target.map.name(),
                        format!("{} is not declared as a back-reference", back),
                    ));
                }
            }
        }

        tracing::debug!(
            entity = name,
            table = map.table,
            columns = map.columns.len(),
            relationships = map.relationships.len(),
            "Validated entity map"
        );
        Ok(())
    }
}
