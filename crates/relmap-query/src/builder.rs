//! Builders for INSERT, UPDATE and DELETE statements.
//!
//! Values are read off the entity through the accessor layer, passed through the
//! column's converter and bound as parameters named after the field:
//!
//! ```text
//! INSERT INTO [Person] ([Name], [Age]) VALUES (@Name, @Age); SELECT SCOPE_IDENTITY()
//! UPDATE [Person] SET [Name] = @Name, [Age] = @Age WHERE ([ID] = @P2)
//! DELETE FROM [Person] WHERE ([ID] = @P0)
//! ```
//!
//! UPDATE and DELETE refuse to run without a WHERE fragment unless
//! `unconditional()` was called.

use relmap_core::accessor::accessor_of;
use relmap_core::{
    AnyEntity, EntityMap, Error, GuardViolation, GuardedStatement, Parameter, ParameterSink,
    Parameters, Result,
};

use crate::dialect::Dialect;
use crate::expr::{col, Expr};
use crate::statement::Statement;
use crate::translate::Translator;

/// Bind every writable column of `entity` and return the quoted column names and
/// placeholders, in column order.
fn bind_writable(
    map: &EntityMap,
    dialect: &dyn Dialect,
    entity: &AnyEntity,
    params: &mut Parameters,
) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for column in map.writable_columns() {
        let value = accessor_of(entity, column.field)?.get(entity)?;
        let value = column.to_storage(value)?;
        params.add_parameter(Parameter::new(column.field, value).with_type(column.storage_type()));
        out.push((
            dialect.quote_identifier(column.name),
            dialect.parameter(column.field),
        ));
    }
    Ok(out)
}

/// Equality filter over the primary key values of `entity`.
fn primary_key_filter(map: &EntityMap, entity: &AnyEntity) -> Result<Expr> {
    let mut filter: Option<Expr> = None;
    for pk in map.primary_keys() {
        let value = accessor_of(entity, pk.field)?.get(entity)?;
        let term = col(pk.field).eq(value);
        filter = Some(match filter {
            Some(existing) => existing.and(term),
            None => term,
        });
    }
    filter.ok_or_else(|| {
        Error::mapping(
            map.name(),
            "has no primary key; pass an explicit filter instead",
        )
    })
}

/// Translate the guarded WHERE of an UPDATE/DELETE.
fn guarded_where(
    map: &EntityMap,
    dialect: &dyn Dialect,
    statement: GuardedStatement,
    filter: Option<&Expr>,
    unconditional: bool,
    params: &mut Parameters,
) -> Result<String> {
    if filter.is_none() && !unconditional {
        return Err(GuardViolation {
            statement,
            table: map.table.to_string(),
        }
        .into());
    }
    Translator::new(map, dialect).where_clause(filter, params)
}

/// INSERT builder.
#[derive(Debug, Clone, Copy)]
pub struct InsertBuilder<'a> {
    map: &'a EntityMap,
    dialect: &'a dyn Dialect,
}

impl<'a> InsertBuilder<'a> {
    pub fn new(map: &'a EntityMap, dialect: &'a dyn Dialect) -> Self {
        Self { map, dialect }
    }

    /// Render the INSERT for `entity`.
    ///
    /// Auto-increment columns are left out. When any column is flagged as a
    /// return value, the dialect's identity clause is appended.
    pub fn build(&self, entity: &AnyEntity) -> Result<Statement> {
        let mut params = Parameters::new();
        let bound = bind_writable(self.map, self.dialect, entity, &mut params)?;
        let (columns, values): (Vec<String>, Vec<String>) = bound.into_iter().unzip();

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.dialect.quote_identifier(self.map.table),
            columns.join(", "),
            values.join(", ")
        );
        let returned: Vec<&str> = self.map.return_value_columns().map(|c| c.name).collect();
        if !returned.is_empty() {
            sql.push_str(&self.dialect.identity_clause(&returned));
        }

        tracing::debug!(entity = self.map.name(), table = self.map.table, sql = %sql, params = params.len(), "Built INSERT");
        Ok(Statement::new(sql, params))
    }
}

/// UPDATE builder.
#[derive(Debug, Clone)]
pub struct UpdateBuilder<'a> {
    map: &'a EntityMap,
    dialect: &'a dyn Dialect,
    filter: Option<Expr>,
    unconditional: bool,
}

impl<'a> UpdateBuilder<'a> {
    pub fn new(map: &'a EntityMap, dialect: &'a dyn Dialect) -> Self {
        Self {
            map,
            dialect,
            filter: None,
            unconditional: false,
        }
    }

    /// Restrict the rows updated.
    #[must_use]
    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Restrict the update to the row whose primary key matches `entity`.
    pub fn where_primary_key(mut self, entity: &AnyEntity) -> Result<Self> {
        self.filter = Some(primary_key_filter(self.map, entity)?);
        Ok(self)
    }

    /// Allow the statement to run without a WHERE clause, updating every row.
    #[must_use]
    pub fn unconditional(mut self) -> Self {
        self.unconditional = true;
        self
    }

    /// Render the UPDATE, taking SET values from `entity`.
    pub fn build(&self, entity: &AnyEntity) -> Result<Statement> {
        if self.filter.is_none() && !self.unconditional {
            return Err(GuardViolation {
                statement: GuardedStatement::Update,
                table: self.map.table.to_string(),
            }
            .into());
        }

        let mut params = Parameters::new();
        let assignments: Vec<String> = bind_writable(self.map, self.dialect, entity, &mut params)?
            .into_iter()
            .map(|(column, placeholder)| format!("{} = {}", column, placeholder))
            .collect();
        if assignments.is_empty() {
            return Err(Error::mapping(self.map.name(), "has no writable columns to update"));
        }
        let where_clause = guarded_where(
            self.map,
            self.dialect,
            GuardedStatement::Update,
            self.filter.as_ref(),
            self.unconditional,
            &mut params,
        )?;

        let mut sql = format!(
            "UPDATE {} SET {}",
            self.dialect.quote_identifier(self.map.table),
            assignments.join(", ")
        );
        if !where_clause.is_empty() {
            sql.push(' ');
            sql.push_str(&where_clause);
        }

        tracing::debug!(entity = self.map.name(), table = self.map.table, sql = %sql, params = params.len(), "Built UPDATE");
        Ok(Statement::new(sql, params))
    }
}

/// DELETE builder.
#[derive(Debug, Clone)]
pub struct DeleteBuilder<'a> {
    map: &'a EntityMap,
    dialect: &'a dyn Dialect,
    filter: Option<Expr>,
    unconditional: bool,
}

impl<'a> DeleteBuilder<'a> {
    pub fn new(map: &'a EntityMap, dialect: &'a dyn Dialect) -> Self {
        Self {
            map,
            dialect,
            filter: None,
            unconditional: false,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn where_primary_key(mut self, entity: &AnyEntity) -> Result<Self> {
        self.filter = Some(primary_key_filter(self.map, entity)?);
        Ok(self)
    }

    /// Allow the statement to run without a WHERE clause, deleting every row.
    #[must_use]
    pub fn unconditional(mut self) -> Self {
        self.unconditional = true;
        self
    }

    pub fn build(&self) -> Result<Statement> {
        let mut params = Parameters::new();
        let where_clause = guarded_where(
            self.map,
            self.dialect,
            GuardedStatement::Delete,
            self.filter.as_ref(),
            self.unconditional,
            &mut params,
        )?;

        let mut sql = format!("DELETE FROM {}", self.dialect.quote_identifier(self.map.table));
        if !where_clause.is_empty() {
            sql.push(' ');
            sql.push_str(&where_clause);
        }

        tracing::debug!(entity = self.map.name(), table = self.map.table, sql = %sql, params = params.len(), "Built DELETE");
        Ok(Statement::new(sql, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqlServerDialect, SqliteDialect};
    use relmap_core::{BooleanYesNoConverter, ColumnMap, Entity, Members, SqlType, Value};

    #[derive(Default)]
    struct Person {
        id: i32,
        name: String,
        age: i32,
        is_happy: bool,
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
            })
            .field("Age", |p| p.age.into(), |p, v| {
                p.age = v.into_typed()?;
                Ok(())
            })
            .field("IsHappy", |p| p.is_happy.into(), |p, v| {
                p.is_happy = v.into_typed()?;
                Ok(())
            });
        }
    }

    fn person_map() -> EntityMap {
        EntityMap::new::<Person>("Person")
            .column(ColumnMap::new("ID", SqlType::Integer).identity())
            .column(ColumnMap::new("Name", SqlType::Text).size(50))
            .column(ColumnMap::new("Age", SqlType::Integer))
            .column(ColumnMap::new("IsHappy", SqlType::Boolean).converter(BooleanYesNoConverter))
    }

    fn jimmy() -> Person {
        Person {
            id: 7,
            name: "Jimmy".to_string(),
            age: 12,
            is_happy: true,
        }
    }

    #[test]
    fn test_insert_skips_auto_increment_and_reads_identity() {
        let map = person_map();
        let stmt = InsertBuilder::new(&map, &SqlServerDialect).build(&jimmy()).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO [Person] ([Name], [Age], [IsHappy]) VALUES (@Name, @Age, @IsHappy); SELECT SCOPE_IDENTITY()"
        );
        let names: Vec<&str> = stmt.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Name", "Age", "IsHappy"]);
        assert_eq!(stmt.parameter("IsHappy").unwrap().value, Value::Text("Y".into()));
        assert_eq!(stmt.parameter("Name").unwrap().sql_type, SqlType::VarChar(50));
    }

    #[test]
    fn test_insert_without_return_value_has_no_identity_clause() {
        let map = EntityMap::new::<Person>("Person")
            .column(ColumnMap::new("ID", SqlType::Integer).primary_key(true))
            .column(ColumnMap::new("Name", SqlType::Text));
        let stmt = InsertBuilder::new(&map, &SqliteDialect).build(&jimmy()).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO [Person] ([ID], [Name]) VALUES (@ID, @Name)");
    }

    #[test]
    fn test_insert_postgres_returning() {
        let map = person_map();
        let stmt = InsertBuilder::new(&map, &PostgresDialect).build(&jimmy()).unwrap();
        assert!(stmt.sql.starts_with("INSERT INTO \"Person\" (\"Name\", \"Age\", \"IsHappy\") VALUES (:Name, :Age, :IsHappy)"));
        assert!(stmt.sql.contains("RETURNING"));
    }

    #[test]
    fn test_update_by_primary_key() {
        let map = person_map();
        let person = jimmy();
        let stmt = UpdateBuilder::new(&map, &SqlServerDialect)
            .where_primary_key(&person)
            .unwrap()
            .build(&person)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE [Person] SET [Name] = @Name, [Age] = @Age, [IsHappy] = @IsHappy WHERE ([ID] = @P3)"
        );
        assert_eq!(stmt.parameter("P3").unwrap().value, Value::Int(7));
    }

    #[test]
    fn test_update_with_filter() {
        let map = person_map();
        let stmt = UpdateBuilder::new(&map, &SqlServerDialect)
            .filter(col("Age").lt(18))
            .build(&jimmy())
            .unwrap();
        assert!(stmt.sql.ends_with("WHERE ([Age] < @P3)"));
    }

    #[test]
    fn test_update_without_where_is_guarded() {
        let map = person_map();
        let err = UpdateBuilder::new(&map, &SqlServerDialect)
            .build(&jimmy())
            .unwrap_err();
        assert!(err.is_guard_violation());
        assert!(err.to_string().contains("UPDATE on Person"));
    }

    #[test]
    fn test_unconditional_update() {
        let map = person_map();
        let stmt = UpdateBuilder::new(&map, &SqlServerDialect)
            .unconditional()
            .build(&jimmy())
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE [Person] SET [Name] = @Name, [Age] = @Age, [IsHappy] = @IsHappy"
        );
    }

    #[test]
    fn test_delete_guard_and_opt_in() {
        let map = person_map();
        let err = DeleteBuilder::new(&map, &SqlServerDialect).build().unwrap_err();
        assert!(err.is_guard_violation());

        let stmt = DeleteBuilder::new(&map, &SqlServerDialect)
            .unconditional()
            .build()
            .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM [Person]");
        assert!(stmt.parameters.is_empty());
    }

    #[test]
    fn test_delete_by_primary_key() {
        let map = person_map();
        let stmt = DeleteBuilder::new(&map, &SqlServerDialect)
            .where_primary_key(&jimmy())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM [Person] WHERE ([ID] = @P0)");
    }

    #[test]
    fn test_where_primary_key_needs_a_key() {
        let map = EntityMap::new::<Person>("Person").column(ColumnMap::new("Name", SqlType::Text));
        let err = DeleteBuilder::new(&map, &SqlServerDialect)
            .where_primary_key(&jimmy())
            .unwrap_err();
        assert!(err.is_mapping());
    }
}
