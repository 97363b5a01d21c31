//! Query translation end to end: rendered SQL shape and the rows SQLite returns

use relgraph::ast::AggregateFn;
use relgraph::query::Projection;
use relgraph::{Expr, Query, Value};

use super::model::{Customer, Order, TestDb};

fn names(customers: &[Customer]) -> Vec<String> {
    customers
        .iter()
        .map(|c| c.name.clone().unwrap_or_default())
        .collect()
}

#[test]
fn test_collection_count_becomes_correlated_subquery() {
    let db = TestDb::new();
    db.seed();
    let query = Query::<Customer>::new()
        .filter(|c| c.field("name").is_not_null().and(c.field("orders").count().eq(2)));

    let rendered = db.session.render(&query).unwrap();
    assert!(!rendered.sql.contains("JOIN"), "unexpected join in {}", rendered.sql);
    assert!(
        rendered.sql.contains(r#"(SELECT COUNT(*) FROM "ORDER""#),
        "got {}",
        rendered.sql
    );
    assert!(rendered.sql.contains(" AND "), "got {}", rendered.sql);

    let customers = db.session.list(query).unwrap();
    assert_eq!(names(&customers), vec!["A"]);
}

#[test]
fn test_reference_join_is_shared_by_predicates() {
    let db = TestDb::new();
    db.seed();
    let query = Query::<Order>::new().filter(|o| {
        o.field("customer")
            .field("name")
            .eq("A")
            .and(o.field("customer").field("rating").ge(1))
    });

    let rendered = db.session.render(&query).unwrap();
    assert_eq!(rendered.sql.matches("JOIN").count(), 1, "got {}", rendered.sql);

    let orders = db.session.list(query).unwrap();
    let mut totals: Vec<i64> = orders.iter().map(|o| o.total).collect();
    totals.sort();
    assert_eq!(totals, vec![10, 20]);
}

#[test]
fn test_skip_take_returns_the_requested_window() {
    let db = TestDb::new();
    db.seed();
    let by_name = || Query::<Customer>::new().order_by(|c| c.field("name").expr());

    let page = db.session.list(by_name().skip(1).take(2)).unwrap();
    assert_eq!(names(&page), vec!["B", "C"]);

    // Collection joins repeat rows; the window still counts customers
    let page = db
        .session
        .list(by_name().skip(0).take(2).load(|c| c.field("orders")))
        .unwrap();
    assert_eq!(names(&page), vec!["A", "B"]);
    assert_eq!(page[0].orders.len().unwrap(), 2);
    assert_eq!(page[1].orders.len().unwrap(), 1);

    let tail = db.session.list(by_name().skip(4).take(3)).unwrap();
    assert_eq!(names(&tail), vec!["E"]);
}

#[test]
fn test_null_comparisons_render_is_null() {
    let db = TestDb::new();
    db.seed();
    {
        let mut anonymous = Customer::default();
        let mut uow = db.session.unit_of_work();
        uow.save(&mut anonymous);
        uow.commit().unwrap();
    }

    let missing = Query::<Customer>::new().filter(|c| c.field("name").eq(Expr::null()));
    let rendered = db.session.render(&missing).unwrap();
    assert!(rendered.sql.contains(r#"a0."NAME" IS NULL"#), "got {}", rendered.sql);
    assert!(!rendered.sql.contains("= NULL"));
    assert_eq!(db.session.list(missing).unwrap().len(), 1);

    let present = Query::<Customer>::new().filter(|c| c.field("name").ne(Expr::null()));
    let rendered = db.session.render(&present).unwrap();
    assert!(rendered.sql.contains("IS NOT NULL"), "got {}", rendered.sql);
    assert_eq!(db.session.count(&present).unwrap(), 5);
}

#[test]
fn test_pattern_filters() {
    let db = TestDb::new();
    db.seed();

    let starts = Query::<Customer>::new().filter(|c| c.field("name").starts_with("A"));
    assert_eq!(db.session.count(&starts).unwrap(), 1);

    let one_of = Query::<Customer>::new().filter(|c| c.field("name").in_list(vec!["B", "D", "Z"]));
    assert_eq!(db.session.count(&one_of).unwrap(), 2);
}

#[test]
fn test_count_and_aggregates() {
    let db = TestDb::new();
    db.seed();
    let orders = Query::<Order>::new();

    assert_eq!(db.session.count(&orders).unwrap(), 3);
    let sum = db
        .session
        .aggregate(&orders, AggregateFn::Sum, |o| o.field("total").expr())
        .unwrap();
    assert_eq!(sum, Value::Int(60));
    let max = db
        .session
        .aggregate(
            &Query::<Customer>::new(),
            AggregateFn::Max,
            |c| c.field("rating").expr(),
        )
        .unwrap();
    assert_eq!(max, Value::Int(5));
}

#[test]
fn test_statement_then_grouped_projection() {
    let db = TestDb::new();
    db.seed();

    let affected = db
        .session
        .execute(
            Query::<Order>::new()
                .filter(|o| o.field("total").gt(15))
                .update(|_| vec![("status", Expr::val(1i64))]),
        )
        .unwrap();
    assert_eq!(affected, 2);

    let rows = db
        .session
        .project(
            Query::<Order>::new()
                .group_by(|o| vec![o.field("status").expr()])
                .select(|g| {
                    Projection::new()
                        .column("status", g.key(0))
                        .column("orders", g.count())
                }),
        )
        .unwrap();
    let mut counts: Vec<(Value, Value)> = rows
        .iter()
        .map(|r| (r.get("status").cloned().unwrap(), r.get("orders").cloned().unwrap()))
        .collect();
    counts.sort_by_key(|(status, _)| match status {
        Value::Int(i) => *i,
        _ => -1,
    });
    assert_eq!(
        counts,
        vec![(Value::Int(0), Value::Int(1)), (Value::Int(1), Value::Int(2))]
    );
}

#[test]
fn test_select_reference_flattens_to_targets() {
    let db = TestDb::new();
    db.seed();

    let customers = db
        .session
        .list(
            Query::<Order>::new()
                .filter(|o| o.field("total").gt(15))
                .select_reference::<Customer>(|o| o.field("customer")),
        )
        .unwrap();

    let mut found = names(&customers);
    found.sort();
    assert_eq!(found, vec!["A", "B"]);
}

#[test]
fn test_paginated_projection_with_tied_order_keys_respects_take() {
    let db = TestDb::new();
    db.seed();
    // Every seeded order has the same status, so the order key alone ties.
    let page = || {
        Query::<Customer>::new()
            .select_many::<Order>(|c| c.field("orders"))
            .order_by(|o| o.field("status").expr())
            .select(|o| Projection::new().column("total", o.field("total")))
    };

    let first = db.session.project(page().take(1)).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].get("total"), Some(&Value::Int(10)));

    let rest = db.session.project(page().skip(1).take(5)).unwrap();
    let totals: Vec<Value> = rest.iter().filter_map(|r| r.get("total").cloned()).collect();
    assert_eq!(totals, vec![Value::Int(20), Value::Int(30)]);

    assert_eq!(db.session.count_rows(&page().take(2)).unwrap(), 2);
}

#[test]
fn test_filter_after_pagination_is_rejected() {
    let db = TestDb::new();

    let err = db
        .session
        .list(
            Query::<Customer>::new()
                .take(2)
                .filter(|c| c.field("rating").gt(1)),
        )
        .unwrap_err();

    assert!(err.is_unsupported_query(), "got {:?}", err);
}
