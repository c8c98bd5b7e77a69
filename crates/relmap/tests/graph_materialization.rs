mod common;

use std::collections::HashSet;

use common::{GRAPH_COLUMNS, Order, OrderItem, graph_row, order_context, recording, sql_of, two_by_two_rows};
use relmap::LoadState;
use relmap::prelude::*;

#[derive(Debug, Default)]
struct Author {
    id: i32,
    name: String,
    books: HasMany<Book>,
    awards: HasMany<Award>,
}

#[derive(Debug, Default)]
struct Book {
    id: i32,
    author_id: i32,
    title: String,
}

#[derive(Debug, Default)]
struct Award {
    id: i32,
    author_id: i32,
    prize: String,
}

impl Entity for Author {
    fn members(m: &mut Members<Self>) {
        m.field("ID", |a| a.id.into(), |a, v| {
            a.id = v.into_typed()?;
            Ok(())
        })
        .field("AuthorName", |a| a.name.clone().into(), |a, v| {
            a.name = v.into_typed()?;
            Ok(())
        })
        .navigation("Books", |a| &a.books)
        .navigation("Awards", |a| &a.awards);
    }
}

impl Entity for Book {
    fn members(m: &mut Members<Self>) {
        m.field("ID", |b| b.id.into(), |b, v| {
            b.id = v.into_typed()?;
            Ok(())
        })
        .field("AuthorID", |b| b.author_id.into(), |b, v| {
            b.author_id = v.into_typed()?;
            Ok(())
        })
        .field("Title", |b| b.title.clone().into(), |b, v| {
            b.title = v.into_typed()?;
            Ok(())
        });
    }
}

impl Entity for Award {
    fn members(m: &mut Members<Self>) {
        m.field("ID", |a| a.id.into(), |a, v| {
            a.id = v.into_typed()?;
            Ok(())
        })
        .field("AuthorID", |a| a.author_id.into(), |a, v| {
            a.author_id = v.into_typed()?;
            Ok(())
        })
        .field("Prize", |a| a.prize.clone().into(), |a, v| {
            a.prize = v.into_typed()?;
            Ok(())
        });
    }
}

/// Author with two sibling collections, both joined on `AuthorID`.
fn author_context() -> Arc<MappingContext> {
    let context = MappingContext::builder()
        .register::<Author>(
            EntityMap::new::<Author>("Author")
                .column(ColumnMap::new("ID", SqlType::Integer).identity())
                .column(ColumnMap::new("AuthorName", SqlType::Text))
                .relationship(RelationshipMap::one_to_many::<Book>("Books", JoinPredicate::on("ID", "AuthorID")))
                .relationship(RelationshipMap::one_to_many::<Award>("Awards", JoinPredicate::on("ID", "AuthorID"))),
        )
        .register::<Book>(
            EntityMap::new::<Book>("Book")
                .column(ColumnMap::new("ID", SqlType::Integer).identity().alt_name("BookID"))
                .column(ColumnMap::new("AuthorID", SqlType::Integer))
                .column(ColumnMap::new("Title", SqlType::Text)),
        )
        .register::<Award>(
            EntityMap::new::<Award>("Award")
                .column(ColumnMap::new("ID", SqlType::Integer).identity().alt_name("AwardID"))
                .column(ColumnMap::new("AuthorID", SqlType::Integer))
                .column(ColumnMap::new("Prize", SqlType::Text)),
        )
        .build()
        .expect("author model is valid");
    Arc::new(context)
}

/// Joined rows for whichever sibling collection the statement selects.
fn author_rows(stmt: &Statement) -> MemoryRows {
    if stmt.sql.contains("[Book]") {
        MemoryRows::new(["ID", "AuthorName", "BookID", "AuthorID", "Title"])
            .row([Value::Int(1), Value::from("Le Guin"), Value::Int(100), Value::Int(1), Value::from("Earthsea")])
            .row([Value::Int(1), Value::from("Le Guin"), Value::Int(101), Value::Int(1), Value::from("Lathe")])
            .row([Value::Int(2), Value::from("Lem"), Value::Int(200), Value::Int(2), Value::from("Solaris")])
    } else {
        MemoryRows::new(["ID", "AuthorName", "AwardID", "AuthorID", "Prize"])
            .row([Value::Int(1), Value::from("Le Guin"), Value::Int(7), Value::Int(1), Value::from("Hugo")])
            .row([Value::Int(1), Value::from("Le Guin"), Value::Int(8), Value::Int(1), Value::from("Nebula")])
            .row([Value::Int(2), Value::from("Lem"), Value::Null, Value::Null, Value::Null])
    }
}

#[test]
fn graph_all_builds_one_instance_per_key() {
    let (log, source) = recording(|_| two_by_two_rows());
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);

    let orders = session.query::<Order>().graph_all().to_list().expect("graph query");

    assert_eq!(sql_of(&log).len(), 1);
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].id, 1);
    assert_eq!(orders[1].order_name, "second");

    let mut seen = HashSet::new();
    for order in &orders {
        let items = order.order_items.get().expect("items joined");
        assert_eq!(items.len(), 2);
        for item in items.iter() {
            assert!(seen.insert(item.id), "item {} materialized twice", item.id);
            assert_eq!(item.order_id, order.id);

            let receipt = item.item_receipt.get().expect("receipt joined");
            let receipt = (*receipt).as_ref().map(|r| (r.order_item_id, r.amount_paid));
            assert_eq!(receipt, Some((item.id, 5.5)));

            let parent = item.order.get().expect("back-reference set");
            assert!(Arc::ptr_eq(&parent, order));
        }
    }
    assert_eq!(seen.len(), 4);
}

#[test]
fn graph_all_joins_every_level_with_alternate_names() {
    let (log, source) = recording(|_| two_by_two_rows());
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);

    let statements = session.query::<Order>().graph_all().to_sql().expect("plan");
    assert_eq!(statements.len(), 1);
    let sql = &statements[0].sql;

    assert!(sql.starts_with(
        "SELECT [ID], [OrderName], [OrderItemID], [OrderID], [ItemName], [ReceiptItemID], [AmountPaid] FROM ("
    ));
    assert!(sql.contains("[t1].[ID] AS [OrderItemID]"));
    assert!(sql.contains("[t2].[OrderItemID] AS [ReceiptItemID]"));
    assert!(sql.contains("FROM [Order] [t0] LEFT JOIN [OrderItem] [t1] ON [t0].[ID] = [t1].[OrderID]"));
    assert!(sql.contains("LEFT JOIN [Receipt] [t2] ON [t1].[ID] = [t2].[OrderItemID]"));
    assert!(sql.ends_with(") AS [g]"));
    assert!(sql_of(&log).is_empty(), "to_sql must not execute anything");
}

#[test]
fn duplicate_rows_are_idempotent() {
    let doubled = || {
        let mut rows = MemoryRows::new(GRAPH_COLUMNS);
        for _ in 0..2 {
            rows.push(graph_row(1, "first", 10, "bolt", 5.5));
            rows.push(graph_row(1, "first", 11, "nut", 5.5));
        }
        rows
    };
    let (_, source) = recording(move |_| doubled());
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);

    let orders = session.query::<Order>().graph_all().to_list().expect("graph query");

    assert_eq!(orders.len(), 1);
    let items = orders[0].order_items.get().expect("items joined");
    let ids: Vec<i32> = items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![10, 11]);
    for item in items.iter() {
        assert!(item.item_receipt.get().expect("receipt").is_some());
    }
}

#[test]
fn order_without_items_is_loaded_empty() {
    let rows = MemoryRows::new(GRAPH_COLUMNS)
        .row(graph_row(1, "first", 10, "bolt", 5.5))
        .row([Value::Int(2), Value::from("empty")]);
    let (_, source) = recording(move |_| rows.clone());
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);

    let orders = session.query::<Order>().graph_all().to_list().expect("graph query");

    assert_eq!(orders.len(), 2);
    assert_eq!(orders[1].order_items.state(), LoadState::Loaded);
    assert!(orders[1].order_items.get().expect("loaded").is_empty());
}

#[test]
fn selective_path_leaves_sibling_levels_unloaded() {
    let (log, source) = recording(|_| two_by_two_rows());
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);

    let orders = session
        .query::<Order>()
        .graph(["OrderItems"])
        .to_list()
        .expect("graph query");

    let sql = sql_of(&log);
    assert_eq!(sql.len(), 1);
    assert!(!sql[0].contains("[Receipt]"));

    let items = orders[0].order_items.get().expect("items joined");
    assert_eq!(items.len(), 2);
    for item in items.iter() {
        assert_eq!(item.item_receipt.state(), LoadState::Unloaded);
        assert!(!item.item_receipt.has_loader());
        assert!(item.item_receipt.load().expect("no loader").is_none());
    }
}

#[test]
fn nested_path_includes_intermediate_levels() {
    let (log, source) = recording(|_| two_by_two_rows());
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);

    let orders = session
        .query::<Order>()
        .graph(["OrderItems.ItemReceipt"])
        .to_list()
        .expect("graph query");

    assert!(sql_of(&log)[0].contains("LEFT JOIN [Receipt] [t2]"));
    let items = orders[1].order_items.get().expect("items joined");
    assert!(items.iter().all(|i| i.item_receipt.is_loaded()));
}

#[test]
fn unknown_path_is_a_mapping_error() {
    let (log, source) = recording(|_| two_by_two_rows());
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);

    let err = session
        .query::<Order>()
        .graph(["OrderItems.Invoice"])
        .to_list()
        .expect_err("unknown relationship");

    assert!(err.is_mapping());
    assert!(err.to_string().contains("Invoice"));
    assert!(sql_of(&log).is_empty());
}

#[test]
fn no_directive_leaves_navigations_unloaded() {
    let rows = MemoryRows::new(["ID", "OrderName"])
        .row([Value::Int(1), Value::from("first")])
        .row([Value::Int(2), Value::from("second")]);
    let (log, source) = recording(move |_| rows.clone());
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);

    let orders = session.query::<Order>().to_list().expect("flat query");

    assert_eq!(sql_of(&log), vec!["SELECT [ID], [OrderName] FROM [Order]".to_string()]);
    assert_eq!(orders.len(), 2);
    for order in &orders {
        assert_eq!(order.order_items.state(), LoadState::Unloaded);
        assert!(order.order_items.get().is_none());
    }
}

#[test]
fn graph_paging_ranks_root_keys() {
    let (_, source) = recording(|_| two_by_two_rows());
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);

    let statements = session
        .query::<Order>()
        .graph_all()
        .order_by(col("OrderName").desc())
        .skip(10)
        .take(5)
        .to_sql()
        .expect("plan");

    let sql = &statements[0].sql;
    assert!(sql.contains("DENSE_RANK() OVER (ORDER BY [OrderName] DESC, [ID] ASC) AS [RowRank]"));
    assert!(sql.contains("WHERE [RowRank] > 10 AND [RowRank] <= 15"));
}

#[test]
fn nested_field_operand_reads_through_back_reference() {
    let (_, source) = recording(|_| two_by_two_rows());
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);
    let orders = session.query::<Order>().graph_all().to_list().expect("graph query");
    let item: Arc<OrderItem> = Arc::clone(&orders[1].order_items.get().expect("items")[0]);

    let statements = session
        .query::<Order>()
        .filter(col("OrderName").eq(Operand::nested_field(&item, "Order", "OrderName")))
        .to_sql()
        .expect("plan");

    assert_eq!(statements[0].sql, "SELECT [ID], [OrderName] FROM [Order] WHERE ([OrderName] = @P0)");
    assert_eq!(statements[0].parameters.values(), vec![Value::from("second")]);
}

#[test]
fn materialize_reads_an_external_row_stream() {
    let (log, source) = recording(|_| MemoryRows::new(["N"]));
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);
    let mut rows = two_by_two_rows();

    let orders = session
        .materialize::<Order>(&GraphDirective::All, &mut rows)
        .expect("materialize");

    assert_eq!(orders.len(), 2);
    let items = orders[1].order_items.get().expect("items joined");
    assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![20, 21]);
    assert!(sql_of(&log).is_empty());
}

#[test]
fn sibling_paths_merge_into_the_same_roots() {
    let (log, source) = recording(author_rows);
    let session = Session::new(author_context(), source);

    let authors = session
        .query::<Author>()
        .graph(["Books", "Awards"])
        .to_list()
        .expect("graph query");

    let sql = sql_of(&log);
    assert_eq!(sql.len(), 2, "one statement per top-level relationship");
    assert!(sql[0].contains("LEFT JOIN [Book] [t1]") && !sql[0].contains("[Award]"));
    assert!(sql[1].contains("LEFT JOIN [Award] [t1]") && !sql[1].contains("[Book]"));

    assert_eq!(authors.len(), 2, "second statement must reuse the roots of the first");
    let le_guin = &authors[0];
    let titles: Vec<String> = le_guin.books.get().expect("books").iter().map(|b| b.title.clone()).collect();
    assert_eq!(titles, vec!["Earthsea", "Lathe"]);
    let prizes: Vec<String> = le_guin.awards.get().expect("awards").iter().map(|a| a.prize.clone()).collect();
    assert_eq!(prizes, vec!["Hugo", "Nebula"]);

    let lem = &authors[1];
    assert_eq!(lem.books.get().expect("books").len(), 1);
    assert_eq!(lem.awards.state(), LoadState::Loaded);
    assert!(lem.awards.get().expect("awards").is_empty());
}

#[test]
fn null_root_key_is_a_materialization_error() {
    let rows = MemoryRows::new(GRAPH_COLUMNS)
        .row(graph_row(1, "first", 10, "bolt", 5.5))
        .row([Value::Null, Value::from("orphan")]);
    let (_, source) = recording(move |_| rows.clone());
    let session = Session::new(order_context(LoadingStrategy::EagerByJoin), source);

    let err = session
        .query::<Order>()
        .graph_all()
        .to_list()
        .expect_err("root without a key");

    assert!(matches!(err, Error::Materialization(ref e) if e.entity == "Order" && e.field == "ID"));
}
