//! Entity types and their table mappings.

use std::any::{Any, TypeId};
use std::fmt;

use crate::accessor::Members;
use crate::column::{ColumnMap, ColumnNaming};
use crate::relationship::RelationshipMap;

/// A plain data type that can be mapped to a table.
///
/// Implementations declare their members once; the accessor layer turns the
/// declarations into cached getters/setters keyed by field name. Because the
/// declarations live next to the type, they may touch private fields.
///
/// ```
/// use relmap_core::{Entity, Members, Value};
///
/// #[derive(Default)]
/// struct Person {
///     id: i32,
///     name: String,
/// }
///
/// impl Entity for Person {
///     fn members(m: &mut Members<Self>) {
///         m.field("ID", |p| p.id.into(), |p, v| {
///             p.id = v.into_typed()?;
///             Ok(())
///         });
///         m.field("Name", |p| Value::from(&p.name), |p, v| {
///             p.name = v.into_typed()?;
///             Ok(())
///         });
///     }
/// }
/// ```
pub trait Entity: Any + Send + Sync + Default {
    /// Name used in diagnostics. Defaults to the unqualified type name.
    fn entity_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// Declare the fields, navigation properties and back-references of `Self`.
    fn members(members: &mut Members<Self>);
}

/// Identity of an entity type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub type_id: TypeId,
    pub name: &'static str,
}

impl EntityRef {
    /// Reference to `T`.
    #[must_use]
    pub fn of<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: T::entity_name(),
        }
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({})", self.name)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Resolved mapping of one entity type: table, columns and relationships.
///
/// Built once at configuration time and immutable afterwards.
#[derive(Debug, Clone)]
pub struct EntityMap {
    pub entity: EntityRef,
    /// Target table (may be schema-qualified: `dbo.Orders`).
    pub table: &'static str,
    /// Columns in declaration order; SELECT lists follow this order.
    pub columns: Vec<ColumnMap>,
    pub relationships: Vec<RelationshipMap>,
}

impl EntityMap {
    /// Start a mapping of `T` onto `table`.
    pub fn new<T: Entity>(table: &'static str) -> Self {
        Self {
            entity: EntityRef::of::<T>(),
            table,
            columns: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Add a column.
    #[must_use]
    pub fn column(mut self, column: ColumnMap) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a relationship.
    #[must_use]
    pub fn relationship(mut self, relationship: RelationshipMap) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Entity name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.entity.name
    }

    /// Look a column up by entity field name.
    pub fn column_by_field(&self, field: &str) -> Option<&ColumnMap> {
        self.columns.iter().find(|c| c.field == field)
    }

    /// Look a relationship up by navigation field name.
    pub fn relationship_by_name(&self, name: &str) -> Option<&RelationshipMap> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Primary-key columns in declaration order.
    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnMap> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.primary_key)
    }

    /// Columns that take part in INSERT/UPDATE value lists.
    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnMap> {
        self.columns.iter().filter(|c| !c.auto_increment)
    }

    /// Columns whose generated value is read back after INSERT.
    pub fn return_value_columns(&self) -> impl Iterator<Item = &ColumnMap> {
        self.columns.iter().filter(|c| c.return_value)
    }

    /// Result-set names of every column under `naming`.
    pub fn result_names(&self, naming: ColumnNaming) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.result_name(naming)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlType;

    #[derive(Default)]
    struct Widget;

    impl Entity for Widget {
        fn members(_members: &mut Members<Self>) {}
    }

    #[test]
    fn test_entity_name_strips_module_path() {
        assert_eq!(Widget::entity_name(), "Widget");
        assert_eq!(EntityRef::of::<Widget>().to_string(), "Widget");
    }

    #[test]
    fn test_writable_columns_skip_auto_increment() {
        let map = EntityMap::new::<Widget>("Widgets")
            .column(ColumnMap::new("ID", SqlType::Integer).identity())
            .column(ColumnMap::new("Name", SqlType::Text))
            .column(ColumnMap::new("Stamp", SqlType::Timestamp).return_value(true));

        let writable: Vec<_> = map.writable_columns().map(|c| c.field).collect();
        assert_eq!(writable, vec!["Name", "Stamp"]);
        let returned: Vec<_> = map.return_value_columns().map(|c| c.field).collect();
        assert_eq!(returned, vec!["ID", "Stamp"]);
        assert!(map.has_primary_key());
        assert!(map.column_by_field("Name").is_some());
        assert!(map.column_by_field("name").is_none());
    }
}
