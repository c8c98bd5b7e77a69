//! SELECT builders.
//!
//! [`SelectBuilder`] reads one table (or a view standing in for it).
//! [`GraphSelectBuilder`] joins the tables of an entity graph into one result
//! set, renaming every column to its alternate name, and filters/sorts/pages
//! over that renamed set.

use std::collections::HashSet;

use relmap_core::{ColumnNaming, EntityMap, Error, Result};

use crate::dialect::Dialect;
use crate::graph::JoinLevel;

const GRAPH_ALIAS: &str = "g";
const RANKED_ALIAS: &str = "r";
const RANK_COLUMN: &str = "RowRank";

/// SELECT over a single table.
#[derive(Debug, Clone)]
pub struct SelectBuilder<'a> {
    map: &'a EntityMap,
    dialect: &'a dyn Dialect,
    source: Option<&'a str>,
    where_clause: String,
    order_by: Vec<String>,
    skip: Option<u64>,
    take: Option<u64>,
}

impl<'a> SelectBuilder<'a> {
    pub fn new(map: &'a EntityMap, dialect: &'a dyn Dialect) -> Self {
        Self {
            map,
            dialect,
            source: None,
            where_clause: String::new(),
            order_by: Vec::new(),
            skip: None,
            take: None,
        }
    }

    /// Read from `view` instead of the mapped table.
    #[must_use]
    pub fn from_source(mut self, view: Option<&'a str>) -> Self {
        self.source = view;
        self
    }

    /// Append a translated `WHERE (...)` fragment verbatim.
    #[must_use]
    pub fn where_clause(mut self, fragment: impl Into<String>) -> Self {
        self.where_clause = fragment.into();
        self
    }

    /// Sort tokens (`[col] ASC`), joined under one ORDER BY.
    #[must_use]
    pub fn order_by(mut self, tokens: Vec<String>) -> Self {
        self.order_by = tokens;
        self
    }

    #[must_use]
    pub fn skip(mut self, skip: Option<u64>) -> Self {
        self.skip = skip;
        self
    }

    #[must_use]
    pub fn take(mut self, take: Option<u64>) -> Self {
        self.take = take;
        self
    }

    /// Render the statement.
    #[must_use]
    pub fn build(&self) -> String {
        let columns: Vec<String> = self
            .map
            .columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c.name))
            .collect();

        let mut sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            self.dialect
                .quote_identifier(self.source.unwrap_or(self.map.table))
        );
        push_clause(&mut sql, &self.where_clause);
        push_order_and_paging(&mut sql, self.dialect, &self.order_by, self.skip, self.take);
        sql
    }
}

/// SELECT over a joined entity graph.
#[derive(Debug, Clone)]
pub struct GraphSelectBuilder<'a> {
    levels: &'a [JoinLevel],
    dialect: &'a dyn Dialect,
    source: Option<&'a str>,
    where_clause: String,
    order_by: Vec<String>,
    skip: Option<u64>,
    take: Option<u64>,
}

impl<'a> GraphSelectBuilder<'a> {
    /// `levels[0]` is the root; every other level names its parent.
    pub fn new(levels: &'a [JoinLevel], dialect: &'a dyn Dialect) -> Self {
        Self {
            levels,
            dialect,
            source: None,
            where_clause: String::new(),
            order_by: Vec::new(),
            skip: None,
            take: None,
        }
    }

    /// Read the root from `view` instead of its mapped table.
    #[must_use]
    pub fn from_source(mut self, view: Option<&'a str>) -> Self {
        self.source = view;
        self
    }

    /// Filter over alternate column names, appended verbatim.
    #[must_use]
    pub fn where_clause(mut self, fragment: impl Into<String>) -> Self {
        self.where_clause = fragment.into();
        self
    }

    /// Root sort tokens over alternate column names.
    #[must_use]
    pub fn order_by(mut self, tokens: Vec<String>) -> Self {
        self.order_by = tokens;
        self
    }

    /// Skip this many root entities (not rows).
    #[must_use]
    pub fn skip(mut self, skip: Option<u64>) -> Self {
        self.skip = skip;
        self
    }

    /// Take this many root entities (not rows).
    #[must_use]
    pub fn take(mut self, take: Option<u64>) -> Self {
        self.take = take;
        self
    }

    /// Render the statement. Fails if two columns of the graph share a result name.
    pub fn build(&self) -> Result<String> {
        let Some(root) = self.levels.first() else {
            return Err(Error::Custom("graph select needs at least a root level".to_string()));
        };
        let q = |ident: &str| self.dialect.quote_identifier(ident);

        let mut seen = HashSet::new();
        let mut inner_columns = Vec::new();
        let mut outer_columns = Vec::new();
        for level in self.levels {
            for column in &level.entity.columns {
                let result_name = column.result_name(ColumnNaming::Alternate);
                if !seen.insert(result_name.to_ascii_lowercase()) {
                    return Err(Error::mapping(
                        level.entity.name(),
                        format!(
                            "result name {} of {} collides with another column in the graph; map an alternate name",
                            result_name, column.field
                        ),
                    ));
                }
                inner_columns.push(format!(
                    "{}.{} AS {}",
                    q(&level.alias),
                    q(column.name),
                    q(result_name)
                ));
                outer_columns.push(q(result_name));
            }
        }

        let mut from = format!(
            "{} {}",
            q(self.source.unwrap_or(root.entity.table)),
            q(&root.alias)
        );
        for level in &self.levels[1..] {
            from.push_str(&self.join_clause(level)?);
        }

        let inner = format!("SELECT {} FROM {}", inner_columns.join(", "), from);
        let outer_list = outer_columns.join(", ");

        if self.skip.is_none() && self.take.is_none() {
            let mut sql = format!("SELECT {} FROM ({}) AS {}", outer_list, inner, q(GRAPH_ALIAS));
            push_clause(&mut sql, &self.where_clause);
            push_order_and_paging(&mut sql, self.dialect, &self.order_by, None, None);
            return Ok(sql);
        }

        // Page over root entities: rows of the same root share a dense rank.
        let mut rank_order = self.order_by.clone();
        for pk in root.entity.primary_keys() {
            rank_order.push(format!("{} ASC", q(pk.result_name(ColumnNaming::Alternate))));
        }
        let mut ranked = format!(
            "SELECT {}, DENSE_RANK() OVER (ORDER BY {}) AS {} FROM ({}) AS {}",
            outer_list,
            rank_order.join(", "),
            q(RANK_COLUMN),
            inner,
            q(GRAPH_ALIAS)
        );
        push_clause(&mut ranked, &self.where_clause);

        let skip = self.skip.unwrap_or(0);
        let mut bounds = format!("{} > {}", q(RANK_COLUMN), skip);
        if let Some(take) = self.take {
            bounds.push_str(&format!(" AND {} <= {}", q(RANK_COLUMN), skip.saturating_add(take)));
        }
        Ok(format!(
            "SELECT {} FROM ({}) AS {} WHERE {} ORDER BY {}",
            outer_list,
            ranked,
            q(RANKED_ALIAS),
            bounds,
            q(RANK_COLUMN)
        ))
    }

    fn join_clause(&self, level: &JoinLevel) -> Result<String> {
        let q = |ident: &str| self.dialect.quote_identifier(ident);
        let (Some(parent_index), Some(rel)) = (level.parent, level.relationship.as_ref()) else {
            return Err(Error::Custom(format!("graph level {} has no parent", level.path)));
        };
        let parent = &self.levels[parent_index];

        let mut conditions = Vec::new();
        for (parent_field, child_field) in rel.join.pairs() {
            let parent_col = parent.entity.column_by_field(parent_field).ok_or_else(|| {
                Error::mapping(parent.entity.name(), format!("join column {} is not mapped", parent_field))
            })?;
            let child_col = level.entity.column_by_field(child_field).ok_or_else(|| {
                Error::mapping(level.entity.name(), format!("join column {} is not mapped", child_field))
            })?;
            conditions.push(format!(
                "{}.{} = {}.{}",
                q(&parent.alias),
                q(parent_col.name),
                q(&level.alias),
                q(child_col.name)
            ));
        }
        Ok(format!(
            " LEFT JOIN {} {} ON {}",
            q(level.entity.table),
            q(&level.alias),
            conditions.join(" AND ")
        ))
    }
}

fn push_clause(sql: &mut String, clause: &str) {
    if !clause.is_empty() {
        sql.push(' ');
        sql.push_str(clause);
    }
}

fn push_order_and_paging(
    sql: &mut String,
    dialect: &dyn Dialect,
    order_by: &[String],
    skip: Option<u64>,
    take: Option<u64>,
) {
    let paging = dialect.paging(skip, take);
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by.join(", "));
    } else if !paging.is_empty() && dialect.paging_requires_order() {
        sql.push_str(" ORDER BY (SELECT NULL)");
    }
    push_clause(sql, &paging);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{SqlServerDialect, SqliteDialect};
    use crate::graph::JoinLevel;
    use relmap_core::{ColumnMap, Entity, JoinPredicate, Members, RelationshipMap, SqlType};
    use std::sync::Arc;

    #[derive(Default)]
    struct Order;
    #[derive(Default)]
    struct Line;

    impl Entity for Order {
        fn members(_members: &mut Members<Self>) {}
    }
    impl Entity for Line {
        fn members(_members: &mut Members<Self>) {}
    }

    fn order_map() -> EntityMap {
        EntityMap::new::<Order>("Order")
            .column(ColumnMap::new("ID", SqlType::Integer).identity())
            .column(ColumnMap::new("OrderName", SqlType::Text))
    }

    fn line_map() -> EntityMap {
        EntityMap::new::<Line>("OrderItem")
            .column(ColumnMap::new("ID", SqlType::Integer).identity().alt_name("OrderItemID"))
            .column(ColumnMap::new("OrderID", SqlType::Integer))
    }

    fn levels(line: EntityMap) -> Vec<JoinLevel> {
        let rel = RelationshipMap::one_to_many::<Line>("OrderItems", JoinPredicate::on("ID", "OrderID"));
        vec![
            JoinLevel::root(Arc::new(order_map())),
            JoinLevel::child(1, "OrderItems".to_string(), Arc::new(line), 0, rel),
        ]
    }

    #[test]
    fn test_simple_select() {
        let map = order_map();
        let sql = SelectBuilder::new(&map, &SqlServerDialect)
            .where_clause("WHERE ([ID] = @P0)")
            .order_by(vec!["[OrderName] ASC".to_string()])
            .build();
        assert_eq!(
            sql,
            "SELECT [ID], [OrderName] FROM [Order] WHERE ([ID] = @P0) ORDER BY [OrderName] ASC"
        );
    }

    #[test]
    fn test_view_override_and_paging() {
        let map = order_map();
        let sql = SelectBuilder::new(&map, &SqlServerDialect)
            .from_source(Some("dbo.V_Orders"))
            .skip(Some(20))
            .take(Some(10))
            .build();
        assert_eq!(
            sql,
            "SELECT [ID], [OrderName] FROM [dbo].[V_Orders] ORDER BY (SELECT NULL) OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
        );

        let sql = SelectBuilder::new(&map, &SqliteDialect).take(Some(5)).build();
        assert_eq!(sql, "SELECT [ID], [OrderName] FROM [Order] LIMIT 5");
    }

    #[test]
    fn test_graph_select_uses_alternate_names() {
        let levels = levels(line_map());
        let sql = GraphSelectBuilder::new(&levels, &SqlServerDialect)
            .order_by(vec!["[OrderName] ASC".to_string()])
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT [ID], [OrderName], [OrderItemID], [OrderID] FROM (\
             SELECT [t0].[ID] AS [ID], [t0].[OrderName] AS [OrderName], \
             [t1].[ID] AS [OrderItemID], [t1].[OrderID] AS [OrderID] \
             FROM [Order] [t0] LEFT JOIN [OrderItem] [t1] ON [t0].[ID] = [t1].[OrderID]\
             ) AS [g] ORDER BY [OrderName] ASC"
        );
    }

    #[test]
    fn test_graph_select_rejects_colliding_result_names() {
        let clash = EntityMap::new::<Line>("OrderItem")
            .column(ColumnMap::new("ID", SqlType::Integer).identity())
            .column(ColumnMap::new("OrderID", SqlType::Integer));
        let levels = levels(clash);
        let err = GraphSelectBuilder::new(&levels, &SqlServerDialect).build().unwrap_err();
        assert!(err.is_mapping());
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn test_graph_paging_ranks_roots() {
        let levels = levels(line_map());
        let sql = GraphSelectBuilder::new(&levels, &SqlServerDialect)
            .skip(Some(2))
            .take(Some(2))
            .build()
            .unwrap();
        assert!(sql.contains("DENSE_RANK() OVER (ORDER BY [ID] ASC) AS [RowRank]"));
        assert!(sql.ends_with("WHERE [RowRank] > 2 AND [RowRank] <= 4 ORDER BY [RowRank]"));
    }
}
