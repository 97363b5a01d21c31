use std::sync::Arc;

use super::*;
use crate::ast::{BinaryOp, JoinKind, NodeKind};
use crate::errors::OrmError;
use crate::mapping::ConventionMapping;
use crate::model::EntityType;
use crate::query::{Projection, Query};
use crate::test_model::{Customer, Order};

fn translate<T>(query: Query<T>) -> Translation {
    let mapping = ConventionMapping::new();
    translate_query(&mapping, query.def()).unwrap()
}

fn request(translation: &Translation) -> &crate::ast::Request {
    translation.ast.request(translation.root).unwrap()
}

fn joins(translation: &Translation) -> Vec<&crate::ast::Join> {
    request(translation)
        .joins
        .iter()
        .map(|j| translation.ast.join(*j).unwrap())
        .collect()
}

#[test]
fn test_collection_count_becomes_correlated_subquery() {
    let t = translate(
        Query::<Customer>::new()
            .filter(|c| c.field("name").is_not_null().and(c.field("orders").count().eq(4))),
    );
    assert!(joins(&t).is_empty(), "no join may survive the extraction");
    let filter = request(&t).filter.unwrap();
    assert!(matches!(
        t.ast.kind(filter),
        NodeKind::Binary {
            op: BinaryOp::And,
            ..
        }
    ));
    assert_eq!(
        t.ast.describe(t.root),
        "(select (select ^a0.ID a0.NAME a0.RATING a0.ADDRESS) (from CUSTOMER a0) \
         (where (AND (<> a0.NAME NULL) (= (scalar (select (select (count *)) (from ORDER a2) \
         (where (= a2.FK_CUSTOMER a0.ID)))) 4))))"
    );
    assert_eq!(t.shape, ResultShape::Entities(Customer::entity_meta()));
}

#[test]
fn test_same_reference_path_reuses_one_join() {
    let t = translate(Query::<Order>::new().filter(|o| {
        o.field("customer")
            .field("name")
            .eq("acme")
            .and(o.field("customer").field("rating").gt(3))
    }));
    let joins = joins(&t);
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].shares, 2);
    assert_eq!(joins[0].kind, JoinKind::Inner);
    assert!(!joins[0].multiplies);
}

#[test]
fn test_navigation_inside_or_is_left_join() {
    let t = translate(
        Query::<Order>::new()
            .filter(|o| o.field("customer").field("name").eq("acme").or(o.field("total").gt(5))),
    );
    assert_eq!(joins(&t)[0].kind, JoinKind::Left);

    let t = translate(
        Query::<Order>::new()
            .filter(|o| o.field("total").gt(5))
            .filter(|o| o.field("customer").field("name").eq("acme")),
    );
    assert_eq!(joins(&t)[0].kind, JoinKind::Inner);
}

#[test]
fn test_reference_in_scalar_position_compares_foreign_key() {
    let t = translate(Query::<Order>::new().filter(|o| o.field("customer").eq(7)));
    assert!(joins(&t).is_empty());
    let filter = request(&t).filter.unwrap();
    assert_eq!(t.ast.describe(filter), "(= a0.FK_CUSTOMER 7)");
}

#[test]
fn test_collection_in_scalar_position_is_unsupported() {
    let mapping = ConventionMapping::new();
    let query = Query::<Customer>::new().filter(|c| c.field("orders").eq(1));
    let err = translate_query(&mapping, query.def()).unwrap_err();
    assert!(err.is_unsupported_query(), "unexpected error: {}", err);
    assert!(err.to_string().contains("orders"));
}

#[test]
fn test_group_filter_becomes_having() {
    let mapping = ConventionMapping::new();
    let projected = Query::<Order>::new()
        .group_by(|o| vec![o.field("status").expr()])
        .filter(|g| g.count().gt(1))
        .select(|g| Projection::new().column("status", g.key(0)).column("n", g.count()));
    let t = translate_query(&mapping, projected.def()).unwrap();
    let r = request(&t);
    assert!(r.filter.is_none());
    assert_eq!(t.ast.describe(r.having.unwrap()), "(> (count *) 1)");
    assert_eq!(r.group_by.len(), 1);
    assert_eq!(
        t.shape,
        ResultShape::Rows(vec!["status".to_string(), "n".to_string()])
    );
}

#[test]
fn test_group_without_select_is_unsupported() {
    let mapping = ConventionMapping::new();
    let grouped = Query::<Order>::new().group_by(|o| vec![o.field("status").expr()]);
    let err = translate_query(&mapping, &grouped.into_def()).unwrap_err();
    assert!(err.is_unsupported_query());
}

#[test]
fn test_filter_after_take_is_unsupported() {
    let mapping = ConventionMapping::new();
    let query = Query::<Customer>::new()
        .take(3)
        .filter(|c| c.field("rating").gt(1));
    let err = translate_query(&mapping, query.def()).unwrap_err();
    assert!(matches!(
        err,
        OrmError::Translation(TranslationError::UnsupportedQueryShape(_))
    ));
}

#[test]
fn test_pagination_adds_implicit_id_order() {
    let t = translate(Query::<Customer>::new().skip(10).take(5));
    let r = request(&t);
    assert_eq!((r.skip, r.take), (Some(10), Some(5)));
    assert_eq!(r.order_by.len(), 1);
    assert_eq!(t.ast.describe(r.order_by[0]), "a0.ID");
}

#[test]
fn test_skip_take_compose_like_linq() {
    let t = translate(
        Query::<Customer>::new()
            .order_by(|c| c.field("name").expr())
            .take(10)
            .skip(3)
            .take(20),
    );
    let r = request(&t);
    assert_eq!((r.skip, r.take), (Some(3), Some(7)));
    let order: Vec<String> = r.order_by.iter().map(|o| t.ast.describe(*o)).collect();
    assert_eq!(order, vec!["a0.NAME", "a0.ID"]);
}

#[test]
fn test_paginated_projection_ends_order_with_element_id() {
    let mapping = ConventionMapping::new();
    let projected = Query::<Customer>::new()
        .select_many::<Order>(|c| c.field("orders"))
        .order_by(|o| o.field("status").expr())
        .select(|o| Projection::new().column("total", o.field("total")))
        .take(1);
    let t = translate_query(&mapping, projected.def()).unwrap();
    let r = request(&t);
    let order: Vec<String> = r.order_by.iter().map(|o| t.ast.describe(*o)).collect();
    assert_eq!(order, vec!["a1.STATUS", "a1.ID"]);
    assert_eq!(r.take, Some(1));
}

#[test]
fn test_paginated_distinct_projection_orders_by_projected_columns() {
    let mapping = ConventionMapping::new();
    let projected = Query::<Order>::new()
        .order_by(|o| o.field("status").expr())
        .select(|o| {
            Projection::new()
                .column("status", o.field("status"))
                .column("total", o.field("total"))
        })
        .distinct()
        .skip(1);
    let t = translate_query(&mapping, projected.def()).unwrap();
    let order: Vec<String> = request(&t)
        .order_by
        .iter()
        .map(|o| t.ast.describe(*o))
        .collect();
    assert_eq!(order, vec!["a0.STATUS", "a0.TOTAL"]);
}

#[test]
fn test_paginated_groups_end_order_with_group_keys() {
    let mapping = ConventionMapping::new();
    let projected = Query::<Order>::new()
        .group_by(|o| vec![o.field("status").expr()])
        .select(|g| Projection::new().column("status", g.key(0)).column("orders", g.count()))
        .take(2);
    let t = translate_query(&mapping, projected.def()).unwrap();
    let order: Vec<String> = request(&t)
        .order_by
        .iter()
        .map(|o| t.ast.describe(*o))
        .collect();
    assert_eq!(order, vec!["a0.STATUS"]);
}

#[test]
fn test_order_by_replaces_then_by_extends() {
    let t = translate(
        Query::<Customer>::new()
            .order_by(|c| c.field("rating").expr())
            .order_by_desc(|c| c.field("name").expr())
            .then_by(|c| c.field("address").expr()),
    );
    let order: Vec<String> = request(&t)
        .order_by
        .iter()
        .map(|o| t.ast.describe(*o))
        .collect();
    assert_eq!(order, vec!["a0.NAME desc", "a0.ADDRESS"]);
}

#[test]
fn test_eager_collection_adds_left_join_run_and_tie_breaker() {
    let t = translate(Query::<Customer>::new().load(|c| c.field("orders")));
    let joins = joins(&t);
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].kind, JoinKind::Left);
    assert!(joins[0].multiplies);

    let r = request(&t);
    let infos: Vec<_> = r
        .select
        .iter()
        .map(|s| t.ast.select_info(*s).unwrap())
        .collect();
    assert_eq!(infos.len(), 4 + 5);
    assert!(infos[0].starts_new_element && infos[0].origin.is_none());
    assert!(infos[4].starts_new_element);
    let orders = Customer::entity_meta().field("orders").unwrap().index;
    assert_eq!(
        infos[4].origin,
        Some(crate::ast::SelectOrigin {
            parent_run: 0,
            field: orders
        })
    );
    let order: Vec<String> = r.order_by.iter().map(|o| t.ast.describe(*o)).collect();
    assert_eq!(order, vec!["a0.ID"]);
    assert!(t.loads.get("orders").is_some());
}

#[test]
fn test_load_path_through_scalar_is_rejected() {
    let mapping = ConventionMapping::new();
    let query = Query::<Order>::new().load(|o| o.field("total"));
    assert!(matches!(
        translate_query(&mapping, query.def()),
        Err(OrmError::Mapping(MappingError::NotANavigation { .. }))
    ));
    let query = Query::<Order>::new().load(|o| o.field("missing"));
    assert!(matches!(
        translate_query(&mapping, query.def()),
        Err(OrmError::Mapping(MappingError::UnknownField { .. }))
    ));
}

#[test]
fn test_select_reference_forces_inner_join() {
    let t = translate(
        Query::<Order>::new()
            .filter(|o| o.field("customer").field("name").eq("x").or(o.field("total").gt(1)))
            .select_reference::<Customer>(|o| o.field("customer")),
    );
    let joins = joins(&t);
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].kind, JoinKind::Inner);
    assert_eq!(t.shape, ResultShape::Entities(Customer::entity_meta()));
    let first = t.ast.select_info(request(&t).select[0]).unwrap();
    assert_eq!(t.ast.describe(first.expr), "a1.ID");
}

#[test]
fn test_select_many_flattens_collection() {
    let t = translate(
        Query::<Customer>::new()
            .filter(|c| c.field("rating").gt(2))
            .select_many::<Order>(|c| c.field("orders"))
            .filter(|o| o.field("total").gt(100)),
    );
    let joins = joins(&t);
    assert_eq!(joins.len(), 1);
    assert!(joins[0].multiplies);
    assert_eq!(
        t.ast.describe(request(&t).filter.unwrap()),
        "(AND (> a0.RATING 2) (> a1.TOTAL 100))"
    );
    assert_eq!(t.shape, ResultShape::Entities(Order::entity_meta()));
}

#[test]
fn test_select_many_requires_collection() {
    let mapping = ConventionMapping::new();
    let query = Query::<Order>::new().select_many::<Customer>(|o| o.field("customer"));
    assert!(matches!(
        translate_query(&mapping, query.def()),
        Err(OrmError::Mapping(MappingError::NotACollection { .. }))
    ));
}

#[test]
fn test_all_is_negated_exists_of_negated_predicate() {
    let t = translate(
        Query::<Customer>::new().filter(|c| c.field("orders").all(|o| o.field("total").gt(0))),
    );
    assert_eq!(
        t.ast.describe(request(&t).filter.unwrap()),
        "(not (exists (select (select 1) (from ORDER a2) \
         (where (AND (= a2.FK_CUSTOMER a0.ID) (not (> a2.TOTAL 0)))))))"
    );
}

#[test]
fn test_first_of_collection_is_single_row_subquery() {
    let mapping = ConventionMapping::new();
    let projected = Query::<Customer>::new().select(|c| {
        Projection::new().column(
            "latest",
            c.field("orders")
                .first_by(|o| o.field("id").expr(), crate::ast::Direction::Descending)
                .field("total"),
        )
    });
    let t = translate_query(&mapping, projected.def()).unwrap();
    let info = t.ast.select_info(request(&t).select[0]).unwrap();
    let NodeKind::Unary { operand, .. } = t.ast.kind(info.expr) else {
        panic!("expected a scalar subquery, got {}", t.ast.describe(info.expr));
    };
    let sub = t.ast.request(*operand).unwrap();
    assert!(sub.single_row);
    assert_eq!(
        t.ast.describe(*operand),
        "(select (select a2.TOTAL) (from ORDER a2) (where (= a2.FK_CUSTOMER a0.ID)) (order a2.ID desc))"
    );
}

#[test]
fn test_nested_query_source_is_correlated() {
    let t = translate(Query::<Customer>::new().filter(|c| {
        let c = *c;
        Expr::exists_in(
            Query::<Order>::new().filter(move |o| o.field("customer").eq(c.field("id"))),
        )
    }));
    assert_eq!(
        t.ast.describe(request(&t).filter.unwrap()),
        "(exists (select (select 1) (from ORDER a1) (where (= a1.FK_CUSTOMER a0.ID))))"
    );
}

#[test]
fn test_pattern_predicates_use_like_with_concatenation() {
    let t = translate(Query::<Customer>::new().filter(|c| c.field("name").starts_with("Ac")));
    assert_eq!(
        t.ast.describe(request(&t).filter.unwrap()),
        "(LIKE a0.NAME (|| 'Ac' '%'))"
    );
    let t = translate(Query::<Customer>::new().filter(|c| c.field("name").contains("m")));
    assert_eq!(
        t.ast.describe(request(&t).filter.unwrap()),
        "(LIKE a0.NAME (|| (|| '%' 'm') '%'))"
    );
}

#[test]
fn test_in_list() {
    let t = translate(Query::<Customer>::new().filter(|c| c.field("rating").in_list([1, 2])));
    assert_eq!(
        t.ast.describe(request(&t).filter.unwrap()),
        "(in a0.RATING [1 2])"
    );
    let empty: Vec<i64> = Vec::new();
    let t = translate(Query::<Customer>::new().filter(move |c| c.field("rating").in_list(empty)));
    assert_eq!(t.ast.describe(request(&t).filter.unwrap()), "(= 1 0)");
}

#[test]
fn test_constant_subtrees_are_folded() {
    let t = translate(
        Query::<Customer>::new().filter(|c| c.field("rating").gt(Expr::val(2).mul(3))),
    );
    assert_eq!(t.ast.describe(request(&t).filter.unwrap()), "(> a0.RATING 6)");
}

#[test]
fn test_computed_property_needs_a_fragment() {
    let mapping = ConventionMapping::new();
    let query = Query::<Customer>::new().filter(|c| c.field("display_name").eq("x"));
    assert!(matches!(
        translate_query(&mapping, query.def()),
        Err(OrmError::Mapping(MappingError::UnresolvedComputed { .. }))
    ));

    mapping
        .register_computed(
            Customer::entity_meta(),
            "display_name",
            Arc::new(|ast: &mut Ast, alias: NodeId| {
                let name = ast.column(alias, "NAME");
                let address = ast.column(alias, "ADDRESS");
                ast.binary(BinaryOp::Concat, name, address)
            }),
        )
        .unwrap();
    let t = translate_query(&mapping, query.def()).unwrap();
    assert_eq!(
        t.ast.describe(request(&t).filter.unwrap()),
        "(= (|| a0.NAME a0.ADDRESS) 'x')"
    );
    // the computed column joins the select list after the stored scalars
    assert_eq!(request(&t).select.len(), 5);
}

#[test]
fn test_update_statement() {
    let mapping = ConventionMapping::new();
    let statement = Query::<Customer>::new()
        .filter(|c| c.field("rating").lt(2))
        .update(|c| vec![("rating", Expr::val(0)), ("name", c.field("address").expr())]);
    let t = translate_statement(&mapping, statement.def()).unwrap();
    assert_eq!(t.shape, ResultShape::Affected);
    assert_eq!(
        t.ast.describe(t.root),
        "(update (from CUSTOMER a0) (where (< a0.RATING 2)) (set RATING=0 NAME=a0.ADDRESS))"
    );
}

#[test]
fn test_count_of_paginated_query_wraps_subquery() {
    let mapping = ConventionMapping::new();
    let query = Query::<Customer>::new().skip(2);
    let t = translate_count(&mapping, query.def()).unwrap();
    assert_eq!(t.shape, ResultShape::Scalar);
    let r = request(&t);
    let from = t.ast.alias(r.from.unwrap()).unwrap();
    assert!(matches!(from.source, AliasSource::Subquery(_)));

    let t = translate_count(&mapping, Query::<Customer>::new().def()).unwrap();
    assert_eq!(
        t.ast.describe(t.root),
        "(select (select (count *)) (from CUSTOMER a0))"
    );
}

#[test]
fn test_aggregate_requires_selector() {
    let mapping = ConventionMapping::new();
    let query = Query::<Order>::new();
    let t = translate_aggregate(
        &mapping,
        query.def(),
        AggregateFn::Sum,
        &query.var().field("total").expr(),
    )
    .unwrap();
    assert_eq!(
        t.ast.describe(t.root),
        "(select (select (sum a0.TOTAL)) (from ORDER a0))"
    );
}
