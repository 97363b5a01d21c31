//! Unit of work and change tracking against SQLite

use std::cell::RefCell;
use std::rc::Rc;

use relgraph::execution::ExecutionError;
use relgraph::{Collection, Entity, OrmError, Query, Reference, Value};

use super::model::{line, Customer, Order, OrderLine, TestDb};

#[test]
fn test_new_graph_inserts_every_row_with_keys() {
    let db = TestDb::new();
    let mut order = Order {
        total: 70,
        customer: Reference::new(Customer {
            name: Some("New".to_string()),
            rating: 4,
            ..Default::default()
        }),
        lines: Collection::new(vec![line(5)]),
        ..Default::default()
    };

    {
        let mut uow = db.session.unit_of_work();
        uow.save(&mut order);
        let summary = uow.commit().unwrap();
        assert_eq!(summary.inserted, 3);
    }

    assert_ne!(order.id, 0);
    let customer_id = order.customer.get().unwrap().unwrap().id;
    assert_ne!(customer_id, 0);
    assert_ne!(order.lines.get().unwrap()[0].id, 0);

    let reloaded = db
        .session
        .list(
            Query::<Order>::new()
                .load(|o| o.field("customer"))
                .load(|o| o.field("lines")),
        )
        .unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].id, order.id);
    assert_eq!(reloaded[0].customer.get().unwrap().unwrap().id, customer_id);
    let lines = reloaded[0].lines.get().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity, 5);

    let line_owner = db
        .session
        .list(Query::<OrderLine>::new().filter(|l| l.field("order").field("id").eq(order.id)))
        .unwrap();
    assert_eq!(line_owner.len(), 1);
}

#[test]
fn test_saving_unmodified_graph_twice_emits_nothing() {
    let db = TestDb::new();
    let mut customers = db.seed();

    {
        let mut uow = db.session.unit_of_work();
        uow.save(&mut customers[0]);
        let summary = uow.commit().unwrap();
        assert_eq!(summary.statements(), 0);
    }

    assert_eq!(db.take_statements(), 0);
}

#[test]
fn test_tracked_object_updates_changed_columns() {
    let db = TestDb::new();
    db.seed();
    let mut customer = db.session.by_id::<Customer>(2i64).unwrap().unwrap();
    assert_eq!(db.session.track(&customer).unwrap(), 1);
    db.take_statements();

    customer.rating = 9;
    {
        let mut uow = db.session.unit_of_work();
        uow.save(&mut customer);
        let summary = uow.commit().unwrap();
        assert_eq!(summary.updated, 1);
    }
    assert_eq!(db.take_statements(), 1);

    let reloaded = db.session.by_id::<Customer>(2i64).unwrap().unwrap();
    assert_eq!(reloaded.rating, 9);
    assert_eq!(reloaded.name.as_deref(), Some("B"));
}

#[test]
fn test_failed_commit_rolls_back_everything() {
    let db = TestDb::new();
    let mut customer = Customer {
        name: Some("Kept?".to_string()),
        ..Default::default()
    };
    let mut dangling = Order {
        total: 1,
        customer: Reference::unloaded(Value::Int(999), None),
        ..Default::default()
    };

    let result = {
        let mut uow = db.session.unit_of_work();
        uow.save(&mut customer);
        uow.save(&mut dangling);
        uow.commit()
    };

    let err = result.unwrap_err();
    assert!(
        matches!(err, OrmError::Execution(ExecutionError::Command { .. })),
        "got {:?}",
        err
    );
    assert_eq!(customer.id, 0);
    assert_eq!(dangling.id, 0);
    assert_eq!(db.session.count(&Query::<Customer>::new()).unwrap(), 0);
}

#[test]
fn test_delete_removes_row() {
    let db = TestDb::new();
    let customers = db.seed();

    {
        let mut uow = db.session.unit_of_work();
        uow.delete(&customers[2]).unwrap();
        assert_eq!(uow.commit().unwrap().deleted, 1);
    }

    assert_eq!(db.session.count(&Query::<Customer>::new()).unwrap(), 4);
    assert!(db.session.by_id::<Customer>(customers[2].id).unwrap().is_none());
}

#[test]
fn test_joined_delete_statement() {
    let db = TestDb::new();
    db.seed();

    let affected = db
        .session
        .execute(
            Query::<OrderLine>::new()
                .filter(|l| l.field("order").field("total").eq(10))
                .delete(),
        )
        .unwrap();

    assert_eq!(affected, 2);
    assert_eq!(db.session.count(&Query::<OrderLine>::new()).unwrap(), 1);
}

#[test]
fn test_save_hooks_see_every_object() {
    let db = TestDb::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    db.session
        .on_before_save(move |e: &dyn Entity| sink.borrow_mut().push(e.meta().name));
    let mut customer = Customer {
        orders: Collection::new(vec![Order::default()]),
        ..Default::default()
    };

    {
        let mut uow = db.session.unit_of_work();
        uow.save(&mut customer);
        uow.commit().unwrap();
    }

    assert_eq!(*seen.borrow(), vec!["Customer", "Order"]);
}

#[test]
fn test_rollback_discards_queued_work() {
    let db = TestDb::new();
    let mut customer = Customer::default();

    {
        let mut uow = db.session.unit_of_work();
        uow.save(&mut customer);
        uow.rollback();
        assert!(uow.is_empty());
        uow.commit().unwrap();
    }

    assert_eq!(customer.id, 0);
    assert_eq!(db.session.count(&Query::<Customer>::new()).unwrap(), 0);
}
