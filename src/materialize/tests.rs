use std::rc::Rc;

use super::*;
use crate::config::OrmConfig;
use crate::errors::OrmError;
use crate::execution::ExecutionContext;
use crate::mapping::ConventionMapping;
use crate::model::navigation::downcast_entity;
use crate::model::EntityType;
use crate::query::Query;
use crate::sql_generator::SqliteDialect;
use crate::test_model::{
    context, text, Customer, Order, OrderStatus, Recorder, RecordingProvider, Scripted,
};
use crate::translator::translate_query;

fn fetch_with<T: EntityType>(ctx: &Rc<ExecutionContext>, query: Query<T>) -> Result<Vec<T>> {
    let translation = translate_query(ctx.mapping(), query.def())?;
    fetch_entities(ctx, &translation)?
        .into_iter()
        .map(|entity| -> Result<T> { Ok(*downcast_entity::<T>(entity)?) })
        .collect()
}

fn fetch<T: EntityType>(recorder: &Rc<Recorder>, query: Query<T>) -> Result<Vec<T>> {
    fetch_with(&context(recorder), query)
}

fn customer_row(id: i64, name: &str, rating: i64) -> Vec<Value> {
    vec![Value::Int(id), text(name), Value::Int(rating), Value::Null]
}

fn order_row(id: i64, total: i64, customer: i64) -> Vec<Value> {
    vec![
        Value::Int(id),
        Value::Int(total),
        Value::Int(0),
        Value::Null,
        Value::Int(customer),
    ]
}

fn joined(parts: &[Vec<Value>]) -> Vec<Value> {
    parts.concat()
}

fn nulls(count: usize) -> Vec<Value> {
    vec![Value::Null; count]
}

#[test]
fn test_rows_group_into_roots_by_leading_id() {
    let recorder = Recorder::new();
    recorder.script(Scripted::Rows(vec![
        joined(&[customer_row(1, "A", 5), order_row(10, 100, 1)]),
        joined(&[customer_row(1, "A", 5), order_row(11, 50, 1)]),
        joined(&[customer_row(2, "B", 3), nulls(5)]),
    ]));
    let customers = fetch(
        &recorder,
        Query::<Customer>::new().load(|c| c.field("orders")),
    )
    .unwrap();

    assert_eq!(customers.len(), 2);
    let orders = customers[0].orders.get().unwrap();
    assert_eq!(orders.iter().map(|o| o.id).collect::<Vec<_>>(), vec![10, 11]);
    assert_eq!(orders[0].status, OrderStatus::Pending);
    assert!(customers[1].orders.is_loaded(), "eager collection without rows is loaded");
    assert!(customers[1].orders.is_empty().unwrap());
}

#[test]
fn test_nested_collections_deduplicate_members() {
    let recorder = Recorder::new();
    let line = |id: i64, product: i64| {
        vec![Value::Int(id), Value::Int(1), Value::Int(product), Value::Int(10)]
    };
    recorder.script(Scripted::Rows(vec![
        joined(&[customer_row(1, "A", 5), order_row(10, 100, 1), line(100, 7)]),
        joined(&[customer_row(1, "A", 5), order_row(10, 100, 1), line(101, 8)]),
        joined(&[customer_row(1, "A", 5), order_row(11, 50, 1), nulls(4)]),
    ]));
    let customers = fetch(
        &recorder,
        Query::<Customer>::new().load(|c| c.field("orders").field("lines")),
    )
    .unwrap();

    assert_eq!(customers.len(), 1);
    let orders = customers[0].orders.get().unwrap();
    assert_eq!(orders.len(), 2, "order 10 must not repeat per line");
    let lines = orders[0].lines.get().unwrap();
    assert_eq!(lines.iter().map(|l| l.id).collect::<Vec<_>>(), vec![100, 101]);
    assert_eq!(lines[1].product.pending_id(), Some(&Value::Int(8)));
    assert!(orders[1].lines.get().unwrap().is_empty());
}

#[test]
fn test_undirected_navigations_are_not_loaded() {
    let recorder = Recorder::new();
    recorder.script(Scripted::Rows(vec![order_row(10, 100, 1)]));
    let orders = fetch(&recorder, Query::<Order>::new()).unwrap();

    assert_eq!(orders[0].customer.pending_id(), Some(&Value::Int(1)));
    assert!(matches!(
        orders[0].customer.get(),
        Err(OrmError::Data(DataError::NotLoaded { .. }))
    ));
    assert!(matches!(
        orders[0].lines.get(),
        Err(OrmError::Data(DataError::NotLoaded { .. }))
    ));
}

#[test]
fn test_null_in_non_nullable_column_names_the_property() {
    let recorder = Recorder::new();
    recorder.script(Scripted::Rows(vec![vec![
        Value::Int(1),
        text("A"),
        Value::Null,
        Value::Null,
    ]]));
    let err = fetch(&recorder, Query::<Customer>::new()).unwrap_err();
    assert!(
        matches!(
            &err,
            OrmError::Data(DataError::NullForNonNullable { property })
                if property == "Customer.rating"
        ),
        "unexpected error: {}",
        err
    );
}

#[test]
fn test_null_root_id_is_rejected() {
    let recorder = Recorder::new();
    recorder.script(Scripted::Rows(vec![vec![
        Value::Null,
        text("A"),
        Value::Int(1),
        Value::Null,
    ]]));
    let err = fetch(&recorder, Query::<Customer>::new()).unwrap_err();
    assert!(matches!(err, OrmError::Data(DataError::NullIdentifier { .. })));
}

#[test]
fn test_lazy_reference_loads_by_id_on_first_access() {
    let recorder = Recorder::new();
    recorder.script(Scripted::Rows(vec![order_row(10, 100, 1)]));
    recorder.script(Scripted::Rows(vec![customer_row(1, "A", 5)]));
    let orders = fetch(
        &recorder,
        Query::<Order>::new().load_lazy(|o| o.field("customer")),
    )
    .unwrap();
    assert_eq!(recorder.statements.borrow().len(), 1);

    let customer = orders[0].customer.get().unwrap().unwrap();
    assert_eq!(customer.name.as_deref(), Some("A"));
    let _ = orders[0].customer.get().unwrap();

    let statements = recorder.statements.borrow();
    assert_eq!(statements.len(), 2, "second access reads the loaded value");
    assert_eq!(statements[1].1, vec![Value::Int(1)]);
}

#[test]
fn test_lazy_reference_to_vanished_row_is_data_error() {
    let recorder = Recorder::new();
    recorder.script(Scripted::Rows(vec![order_row(10, 100, 1)]));
    recorder.script(Scripted::Rows(vec![]));
    let orders = fetch(
        &recorder,
        Query::<Order>::new().load_lazy(|o| o.field("customer")),
    )
    .unwrap();
    let err = orders[0].customer.get().unwrap_err();
    assert!(err.is_data_error(), "unexpected error: {}", err);
}

#[test]
fn test_batch_reference_fetches_every_id_once() {
    let recorder = Recorder::new();
    recorder.script(Scripted::Rows(vec![
        order_row(10, 100, 1),
        order_row(11, 50, 2),
        order_row(12, 25, 1),
    ]));
    recorder.script(Scripted::Rows(vec![
        customer_row(1, "A", 5),
        customer_row(2, "B", 4),
    ]));
    let orders = fetch(
        &recorder,
        Query::<Order>::new().load_batch(|o| o.field("customer")),
    )
    .unwrap();

    let names: Vec<Option<String>> = orders
        .iter()
        .map(|o| o.customer.get().unwrap().unwrap().name.clone())
        .collect();
    assert_eq!(
        names,
        vec![Some("A".to_string()), Some("B".to_string()), Some("A".to_string())]
    );
    let statements = recorder.statements.borrow();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[1].1, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn test_batch_reference_respects_batch_size() {
    let recorder = Recorder::new();
    let ctx = Rc::new(ExecutionContext::new(
        Box::new(RecordingProvider(Rc::clone(&recorder))),
        Box::new(SqliteDialect),
        Box::new(ConventionMapping::new()),
        OrmConfig {
            batch_size: 1,
            ..Default::default()
        },
    ));
    recorder.script(Scripted::Rows(vec![order_row(10, 100, 1), order_row(11, 50, 2)]));
    recorder.script(Scripted::Rows(vec![customer_row(1, "A", 5)]));
    recorder.script(Scripted::Rows(vec![customer_row(2, "B", 4)]));
    let orders = fetch_with(
        &ctx,
        Query::<Order>::new().load_batch(|o| o.field("customer")),
    )
    .unwrap();

    assert!(orders[1].customer.get().unwrap().is_some());
    assert!(orders[0].customer.get().unwrap().is_some());
    assert_eq!(recorder.statements.borrow().len(), 3);
}

#[test]
fn test_lazy_collection_loads_by_owner() {
    let recorder = Recorder::new();
    recorder.script(Scripted::Rows(vec![customer_row(1, "A", 5)]));
    recorder.script(Scripted::Rows(vec![order_row(10, 100, 1), order_row(11, 50, 1)]));
    let customers = fetch(
        &recorder,
        Query::<Customer>::new().load_lazy(|c| c.field("orders")),
    )
    .unwrap();

    assert!(!customers[0].orders.is_loaded());
    assert_eq!(customers[0].orders.len().unwrap(), 2);
    let statements = recorder.statements.borrow();
    assert!(
        statements[1].0.contains("a0.\"FK_CUSTOMER\" = ?1"),
        "unexpected SQL: {}",
        statements[1].0
    );
    assert!(statements[1].0.ends_with("ORDER BY a0.\"ID\""));
    assert_eq!(statements[1].1, vec![Value::Int(1)]);
}

#[test]
fn test_deferred_load_forwards_the_subtree() {
    let recorder = Recorder::new();
    recorder.script(Scripted::Rows(vec![customer_row(1, "A", 5)]));
    recorder.script(Scripted::Rows(vec![order_row(10, 100, 1)]));
    recorder.script(Scripted::Rows(vec![vec![
        Value::Int(100),
        Value::Int(2),
        Value::Int(7),
        Value::Int(10),
    ]]));
    let customers = fetch(
        &recorder,
        Query::<Customer>::new()
            .load_lazy(|c| c.field("orders"))
            .load_lazy(|c| c.field("orders").field("lines")),
    )
    .unwrap();

    let orders = customers[0].orders.get().unwrap();
    let lines = orders[0].lines.get().unwrap();
    assert_eq!(lines[0].quantity, 2);
    let statements = recorder.statements.borrow();
    assert_eq!(statements.len(), 3);
    assert!(statements[2].0.contains("\"FK_ORDER\" = ?1"));
}

#[test]
fn test_batch_collection_groups_members_by_owner() {
    let recorder = Recorder::new();
    recorder.script(Scripted::Rows(vec![
        customer_row(1, "A", 5),
        customer_row(2, "B", 4),
    ]));
    recorder.script(Scripted::Rows(vec![
        order_row(10, 100, 1),
        order_row(11, 50, 2),
        order_row(12, 25, 1),
    ]));
    let customers = fetch(
        &recorder,
        Query::<Customer>::new().load_batch(|c| c.field("orders")),
    )
    .unwrap();

    assert_eq!(customers[1].orders.len().unwrap(), 1);
    assert_eq!(customers[0].orders.len().unwrap(), 2);
    let statements = recorder.statements.borrow();
    assert_eq!(statements.len(), 2);
    assert!(statements[1].0.contains("IN (?1, ?2)"), "unexpected SQL: {}", statements[1].0);
}
