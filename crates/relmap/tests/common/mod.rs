//! Shared model and row source for the integration tests.

#![allow(dead_code)]

use std::sync::Mutex;

use relmap::prelude::*;
use relmap::{BooleanYesNoConverter, Value};

#[derive(Debug, Default)]
pub struct Order {
    pub id: i32,
    pub order_name: String,
    pub order_items: HasMany<OrderItem>,
}

#[derive(Debug, Default)]
pub struct OrderItem {
    pub id: i32,
    pub order_id: i32,
    pub item_name: String,
    pub item_receipt: HasOne<Receipt>,
    pub order: BackRef<Order>,
}

#[derive(Debug, Default)]
pub struct Receipt {
    pub order_item_id: i32,
    pub amount_paid: f64,
}

#[derive(Debug, Default)]
pub struct Person {
    pub id: i32,
    pub name: String,
    pub age: i32,
    pub is_happy: bool,
    pub nickname: Option<String>,
}

impl Entity for Order {
    fn members(m: &mut Members<Self>) {
        m.field("ID", |o| o.id.into(), |o, v| {
            o.id = v.into_typed()?;
            Ok(())
        })
        .field("OrderName", |o| o.order_name.clone().into(), |o, v| {
            o.order_name = v.into_typed()?;
            Ok(())
        })
        .navigation("OrderItems", |o| &o.order_items);
    }
}

impl Entity for OrderItem {
    fn members(m: &mut Members<Self>) {
        m.field("ID", |i| i.id.into(), |i, v| {
            i.id = v.into_typed()?;
            Ok(())
        })
        .field("OrderID", |i| i.order_id.into(), |i, v| {
            i.order_id = v.into_typed()?;
            Ok(())
        })
        .field("ItemName", |i| i.item_name.clone().into(), |i, v| {
            i.item_name = v.into_typed()?;
            Ok(())
        })
        .navigation("ItemReceipt", |i| &i.item_receipt)
        .back_reference("Order", |i| &i.order);
    }
}

impl Entity for Receipt {
    fn members(m: &mut Members<Self>) {
        m.field("OrderItemID", |r| r.order_item_id.into(), |r, v| {
            r.order_item_id = v.into_typed()?;
            Ok(())
        })
        .field("AmountPaid", |r| r.amount_paid.into(), |r, v| {
            r.amount_paid = v.into_typed()?;
            Ok(())
        });
    }
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
        })
        .field("Nickname", |p| p.nickname.clone().into(), |p, v| {
            p.nickname = v.into_typed()?;
            Ok(())
        });
    }
}

/// Order -> OrderItems -> ItemReceipt, with `OrderItems` loaded by `items`.
pub fn order_context(items: LoadingStrategy) -> Arc<MappingContext> {
    let context = MappingContext::builder()
        .register::<Order>(
            EntityMap::new::<Order>("Order")
                .column(ColumnMap::new("ID", SqlType::Integer).identity())
                .column(ColumnMap::new("OrderName", SqlType::Text).size(100))
                .relationship(
                    RelationshipMap::one_to_many::<OrderItem>("OrderItems", JoinPredicate::on("ID", "OrderID"))
                        .loading(items)
                        .back_reference("Order"),
                ),
        )
        .register::<OrderItem>(
            EntityMap::new::<OrderItem>("OrderItem")
                .column(ColumnMap::new("ID", SqlType::Integer).identity().alt_name("OrderItemID"))
                .column(ColumnMap::new("OrderID", SqlType::Integer))
                .column(ColumnMap::new("ItemName", SqlType::Text).size(100))
                .relationship(RelationshipMap::one_to_one::<Receipt>(
                    "ItemReceipt",
                    JoinPredicate::on("ID", "OrderItemID"),
                )),
        )
        .register::<Receipt>(
            EntityMap::new::<Receipt>("Receipt")
                .column(ColumnMap::new("OrderItemID", SqlType::Integer).alt_name("ReceiptItemID"))
                .column(ColumnMap::new("AmountPaid", SqlType::Double)),
        )
        .build()
        .expect("order model is valid");
    Arc::new(context)
}

pub fn person_context() -> Arc<MappingContext> {
    let context = MappingContext::builder()
        .register::<Person>(
            EntityMap::new::<Person>("Person")
                .column(ColumnMap::new("ID", SqlType::Integer).identity())
                .column(ColumnMap::new("Name", SqlType::Text).size(50))
                .column(ColumnMap::new("Age", SqlType::Integer))
                .column(ColumnMap::new("IsHappy", SqlType::Boolean).converter(BooleanYesNoConverter))
                .column(ColumnMap::new("Nickname", SqlType::Text).nullable(true)),
        )
        .build()
        .expect("person model is valid");
    Arc::new(context)
}

/// Statements seen by a [`recording`] source, in execution order.
pub type Log = Arc<Mutex<Vec<Statement>>>;

/// A row source that logs every statement and answers with `route(statement)`.
pub fn recording<F>(route: F) -> (Log, impl RowSource + 'static)
where
    F: Fn(&Statement) -> MemoryRows + Send + Sync + 'static,
{
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let source = move |stmt: &Statement| -> Result<MemoryRows> {
        sink.lock().expect("log lock").push(stmt.clone());
        Ok(route(stmt))
    };
    (log, source)
}

/// SQL text of everything logged so far.
pub fn sql_of(log: &Log) -> Vec<String> {
    log.lock().expect("log lock").iter().map(|s| s.sql.clone()).collect()
}

pub const GRAPH_COLUMNS: [&str; 7] = [
    "ID",
    "OrderName",
    "OrderItemID",
    "OrderID",
    "ItemName",
    "ReceiptItemID",
    "AmountPaid",
];

/// One joined row: order, item, receipt.
pub fn graph_row(order: i32, name: &str, item: i32, item_name: &str, paid: f64) -> Vec<Value> {
    vec![
        Value::Int(order),
        Value::from(name),
        Value::Int(item),
        Value::Int(order),
        Value::from(item_name),
        Value::Int(item),
        Value::Double(paid),
    ]
}

/// Two orders, two items each, one receipt per item.
pub fn two_by_two_rows() -> MemoryRows {
    MemoryRows::new(GRAPH_COLUMNS)
        .row(graph_row(1, "first", 10, "bolt", 5.5))
        .row(graph_row(1, "first", 11, "nut", 5.5))
        .row(graph_row(2, "second", 20, "gear", 5.5))
        .row(graph_row(2, "second", 21, "spring", 5.5))
}

/// Flat `OrderItem` rows, physical column names.
pub fn item_rows(items: &[(i32, i32, &str)]) -> MemoryRows {
    let mut rows = MemoryRows::new(["ID", "OrderID", "ItemName"]);
    for (id, order_id, name) in items {
        rows.push([Value::Int(*id), Value::Int(*order_id), Value::from(*name)]);
    }
    rows
}
