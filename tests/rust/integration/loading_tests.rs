//! Materialization and deferred loading against SQLite

use relgraph::{Query, Value};

use super::model::{Customer, Order, TestDb};

fn by_id() -> Query<Customer> {
    Query::<Customer>::new().order_by(|c| c.field("id").expr())
}

#[test]
fn test_eager_collection_groups_rows_into_roots() {
    let db = TestDb::new();
    db.seed();

    let customers = db.session.list(by_id().load(|c| c.field("orders"))).unwrap();

    assert_eq!(db.take_statements(), 1);
    assert_eq!(customers.len(), 5);
    let counts: Vec<usize> = customers.iter().map(|c| c.orders.len().unwrap()).collect();
    assert_eq!(counts, vec![2, 1, 0, 0, 0]);
    let totals: Vec<i64> = customers[0].orders.get().unwrap().iter().map(|o| o.total).collect();
    assert_eq!(totals, vec![10, 20]);
}

#[test]
fn test_nested_eager_load() {
    let db = TestDb::new();
    db.seed();

    let customers = db
        .session
        .list(by_id().take(1).load(|c| c.field("orders").field("lines")))
        .unwrap();

    assert_eq!(db.take_statements(), 1);
    let orders = customers[0].orders.get().unwrap();
    let lines: Vec<usize> = orders.iter().map(|o| o.lines.len().unwrap()).collect();
    assert_eq!(lines, vec![2, 1]);
    let quantities: Vec<i32> = orders[0].lines.get().unwrap().iter().map(|l| l.quantity).collect();
    assert_eq!(quantities, vec![1, 2]);
}

#[test]
fn test_lazy_reference_fetches_on_first_read() {
    let db = TestDb::new();
    db.seed();

    let orders = db
        .session
        .list(
            Query::<Order>::new()
                .order_by(|o| o.field("id").expr())
                .load_lazy(|o| o.field("customer")),
        )
        .unwrap();
    assert_eq!(db.take_statements(), 1);

    let customer = orders[2].customer.get().unwrap().unwrap();
    assert_eq!(customer.name.as_deref(), Some("B"));
    assert_eq!(db.take_statements(), 1);
    orders[2].customer.get().unwrap();
    assert_eq!(db.take_statements(), 0);
}

#[test]
fn test_batch_reference_fetches_all_ids_once() {
    let db = TestDb::new();
    db.seed();

    let orders = db
        .session
        .list(
            Query::<Order>::new()
                .order_by(|o| o.field("id").expr())
                .load_batch(|o| o.field("customer")),
        )
        .unwrap();
    assert_eq!(db.take_statements(), 1);

    let owners: Vec<String> = orders
        .iter()
        .map(|o| o.customer.get().unwrap().unwrap().name.clone().unwrap())
        .collect();

    assert_eq!(owners, vec!["A", "A", "B"]);
    assert_eq!(db.take_statements(), 1);
}

#[test]
fn test_lazy_collection_fetches_per_owner() {
    let db = TestDb::new();
    db.seed();

    let customers = db.session.list(by_id().load_lazy(|c| c.field("orders"))).unwrap();
    db.take_statements();

    assert_eq!(customers[0].orders.len().unwrap(), 2);
    assert_eq!(customers[2].orders.len().unwrap(), 0);
    assert_eq!(db.take_statements(), 2);
}

#[test]
fn test_batch_collection_fetches_every_owner_once() {
    let db = TestDb::new();
    db.seed();

    let customers = db.session.list(by_id().load_batch(|c| c.field("orders"))).unwrap();
    db.take_statements();

    assert_eq!(customers[0].orders.len().unwrap(), 2);
    assert_eq!(customers[1].orders.len().unwrap(), 1);
    assert_eq!(customers[4].orders.len().unwrap(), 0);
    assert_eq!(db.take_statements(), 1);
}

#[test]
fn test_navigation_without_directive_is_not_loaded() {
    let db = TestDb::new();
    db.seed();

    let orders = db
        .session
        .list(Query::<Order>::new().order_by(|o| o.field("id").expr()))
        .unwrap();
    let err = orders[0].customer.get().unwrap_err();

    assert!(err.is_data_error(), "got {:?}", err);
    assert_eq!(orders[0].customer.pending_id(), Some(&Value::Int(1)));
    assert!(orders[0].lines.get().is_err());
}

#[test]
fn test_by_id_and_first() {
    let db = TestDb::new();
    db.seed();

    let c = db.session.by_id::<Customer>(3i64).unwrap().unwrap();
    assert_eq!(c.name.as_deref(), Some("C"));
    assert!(db.session.by_id::<Customer>(99i64).unwrap().is_none());

    let top = db
        .session
        .first(Query::<Customer>::new().order_by_desc(|c| c.field("rating").expr()))
        .unwrap()
        .unwrap();
    assert_eq!(top.name.as_deref(), Some("E"));
}
