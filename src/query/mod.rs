//! Declarative query builder
//!
//! ```ignore
//! let query = Query::<Customer>::new()
//!     .filter(|c| c.field("name").is_not_null().and(c.field("orders").count().eq(4)))
//!     .order_by(|c| c.field("name").expr())
//!     .skip(10)
//!     .take(5)
//!     .load(|c| c.field("orders"));
//! let customers = session.list(query)?;
//! ```
//!
//! A builder call appends one [`QueryOp`] to an untyped [`QueryDef`]; the
//! translator interprets the op list in order.

use std::marker::PhantomData;

use crate::ast::AggregateFn;
use crate::model::{EntityMeta, EntityType, Value};

pub mod expr;
pub mod loading;

pub use crate::ast::Direction;
pub use expr::{CollectionSource, Expr, Path, PathStep, PatternKind, Var};
pub use loading::{LoadMode, LoadTree, LoadingPropertyInfo};

#[derive(Debug, Clone)]
pub enum QueryOp {
    Filter(Expr),
    OrderBy {
        key: Expr,
        direction: Direction,
        /// `then_by`: extends instead of replacing the current order
        then: bool,
    },
    Skip(u64),
    Take(u64),
    Distinct,
    GroupBy(Vec<Expr>),
    Select(Projection),
    SelectReference {
        path: Path,
        element: Var,
    },
    SelectMany {
        path: Path,
        element: Var,
    },
    Load {
        path: Path,
        mode: LoadMode,
    },
    /// Directives forwarded from an owning query to a deferred one
    LoadTree(LoadTree),
    Update(Vec<(&'static str, Expr)>),
    Delete,
    InsertInto {
        target: &'static EntityMeta,
        assignments: Vec<(&'static str, Expr)>,
    },
}

/// Untyped query definition: a root entity type, its variable and the op list.
#[derive(Debug, Clone)]
pub struct QueryDef {
    pub meta: &'static EntityMeta,
    pub var: Var,
    pub ops: Vec<QueryOp>,
}

impl QueryDef {
    pub fn new(meta: &'static EntityMeta) -> Self {
        QueryDef {
            meta,
            var: Var::new(),
            ops: Vec::new(),
        }
    }

    /// Rows of `meta` whose `id_field` is one of `ids`.
    pub fn by_ids(meta: &'static EntityMeta, id_field: &'static str, ids: Vec<Value>) -> Self {
        let mut def = QueryDef::new(meta);
        let filter = def.var.field(id_field).in_list(ids);
        def.ops.push(QueryOp::Filter(filter));
        def
    }

    /// Variable the last op leaves in scope.
    pub fn current_var(&self) -> Var {
        self.ops
            .iter()
            .rev()
            .find_map(|op| match op {
                QueryOp::SelectReference { element, .. } | QueryOp::SelectMany { element, .. } => {
                    Some(*element)
                }
                _ => None,
            })
            .unwrap_or(self.var)
    }
}

/// Named result shape of a projection.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    pub columns: Vec<(String, Expr)>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: impl Into<String>, expr: impl Into<Expr>) -> Self {
        self.columns.push((name.into(), expr.into()));
        self
    }
}

/// Typed query over entities of `T`.
#[derive(Debug, Clone)]
pub struct Query<T> {
    def: QueryDef,
    var: Var,
    _marker: PhantomData<fn() -> T>,
}

impl<T: EntityType> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EntityType> Query<T> {
    pub fn new() -> Self {
        let def = QueryDef::new(T::entity_meta());
        let var = def.var;
        Query {
            def,
            var,
            _marker: PhantomData,
        }
    }
}

impl<T> Query<T> {
    fn push(mut self, op: QueryOp) -> Self {
        self.def.ops.push(op);
        self
    }

    fn retype<U>(self, element: Var) -> Query<U> {
        Query {
            def: self.def,
            var: element,
            _marker: PhantomData,
        }
    }

    /// Variable bound to the current element.
    pub fn var(&self) -> Var {
        self.var
    }

    pub fn def(&self) -> &QueryDef {
        &self.def
    }

    pub fn into_def(self) -> QueryDef {
        self.def
    }

    pub fn filter(self, predicate: impl FnOnce(&Var) -> Expr) -> Self {
        let predicate = predicate(&self.var);
        self.push(QueryOp::Filter(predicate))
    }

    fn order(self, key: impl FnOnce(&Var) -> Expr, direction: Direction, then: bool) -> Self {
        let key = key(&self.var);
        self.push(QueryOp::OrderBy {
            key,
            direction,
            then,
        })
    }

    pub fn order_by(self, key: impl FnOnce(&Var) -> Expr) -> Self {
        self.order(key, Direction::Ascending, false)
    }

    pub fn order_by_desc(self, key: impl FnOnce(&Var) -> Expr) -> Self {
        self.order(key, Direction::Descending, false)
    }

    pub fn then_by(self, key: impl FnOnce(&Var) -> Expr) -> Self {
        self.order(key, Direction::Ascending, true)
    }

    pub fn then_by_desc(self, key: impl FnOnce(&Var) -> Expr) -> Self {
        self.order(key, Direction::Descending, true)
    }

    pub fn skip(self, count: u64) -> Self {
        self.push(QueryOp::Skip(count))
    }

    pub fn take(self, count: u64) -> Self {
        self.push(QueryOp::Take(count))
    }

    pub fn distinct(self) -> Self {
        self.push(QueryOp::Distinct)
    }

    pub fn group_by(self, keys: impl FnOnce(&Var) -> Vec<Expr>) -> Grouped {
        let keys = keys(&self.var);
        let var = self.var;
        Grouped {
            def: self.push(QueryOp::GroupBy(keys)).def,
            group: Group { var },
        }
    }

    pub fn select(self, shape: impl FnOnce(&Var) -> Projection) -> Projected {
        let projection = shape(&self.var);
        Projected {
            def: self.push(QueryOp::Select(projection)).def,
        }
    }

    /// Continues with the target of a single navigation (inner join).
    pub fn select_reference<U: EntityType>(self, path: impl FnOnce(&Var) -> Path) -> Query<U> {
        let path = path(&self.var);
        let element = Var::new();
        self.push(QueryOp::SelectReference { path, element })
            .retype(element)
    }

    /// Continues with the flattened members of a collection navigation.
    pub fn select_many<U: EntityType>(self, path: impl FnOnce(&Var) -> Path) -> Query<U> {
        let path = path(&self.var);
        let element = Var::new();
        self.push(QueryOp::SelectMany { path, element }).retype(element)
    }

    fn load_with(self, path: impl FnOnce(&Var) -> Path, mode: LoadMode) -> Self {
        let path = path(&self.var);
        self.push(QueryOp::Load { path, mode })
    }

    /// Joins the navigation path into the same statement.
    pub fn load(self, path: impl FnOnce(&Var) -> Path) -> Self {
        self.load_with(path, LoadMode::Eager)
    }

    pub fn load_lazy(self, path: impl FnOnce(&Var) -> Path) -> Self {
        self.load_with(path, LoadMode::Lazy)
    }

    pub fn load_batch(self, path: impl FnOnce(&Var) -> Path) -> Self {
        self.load_with(path, LoadMode::Batch)
    }

    pub fn load_tree(self, tree: LoadTree) -> Self {
        if tree.is_empty() {
            return self;
        }
        self.push(QueryOp::LoadTree(tree))
    }

    /// `UPDATE` every matching row; assignments name fields of the current element.
    pub fn update(self, assignments: impl FnOnce(&Var) -> Vec<(&'static str, Expr)>) -> Statement {
        let assignments = assignments(&self.var);
        Statement {
            def: self.push(QueryOp::Update(assignments)).def,
        }
    }

    pub fn delete(self) -> Statement {
        Statement {
            def: self.push(QueryOp::Delete).def,
        }
    }

    /// `INSERT INTO U (...) SELECT ...` over the matching rows.
    pub fn insert_into<U: EntityType>(
        self,
        assignments: impl FnOnce(&Var) -> Vec<(&'static str, Expr)>,
    ) -> Statement {
        let assignments = assignments(&self.var);
        Statement {
            def: self
                .push(QueryOp::InsertInto {
                    target: U::entity_meta(),
                    assignments,
                })
                .def,
        }
    }
}

/// Handle on the groups of a grouped query.
#[derive(Debug, Clone, Copy)]
pub struct Group {
    var: Var,
}

impl Group {
    pub fn key(&self, index: usize) -> Expr {
        Expr::GroupKey(index)
    }

    pub fn count(&self) -> Expr {
        Expr::Aggregate {
            func: AggregateFn::Count,
            operand: None,
        }
    }

    fn aggregate(&self, func: AggregateFn, selector: impl FnOnce(&Var) -> Expr) -> Expr {
        Expr::Aggregate {
            func,
            operand: Some(Box::new(selector(&self.var))),
        }
    }

    pub fn sum(&self, selector: impl FnOnce(&Var) -> Expr) -> Expr {
        self.aggregate(AggregateFn::Sum, selector)
    }

    pub fn min(&self, selector: impl FnOnce(&Var) -> Expr) -> Expr {
        self.aggregate(AggregateFn::Min, selector)
    }

    pub fn max(&self, selector: impl FnOnce(&Var) -> Expr) -> Expr {
        self.aggregate(AggregateFn::Max, selector)
    }

    pub fn average(&self, selector: impl FnOnce(&Var) -> Expr) -> Expr {
        self.aggregate(AggregateFn::Average, selector)
    }
}

/// A query after `group_by`; filters become `HAVING`.
#[derive(Debug, Clone)]
pub struct Grouped {
    def: QueryDef,
    group: Group,
}

impl Grouped {
    pub fn filter(mut self, predicate: impl FnOnce(&Group) -> Expr) -> Self {
        let predicate = predicate(&self.group);
        self.def.ops.push(QueryOp::Filter(predicate));
        self
    }

    pub fn select(mut self, shape: impl FnOnce(&Group) -> Projection) -> Projected {
        let projection = shape(&self.group);
        self.def.ops.push(QueryOp::Select(projection));
        Projected { def: self.def }
    }

    pub fn into_def(self) -> QueryDef {
        self.def
    }
}

/// A query producing named rows.
#[derive(Debug, Clone)]
pub struct Projected {
    def: QueryDef,
}

impl Projected {
    pub fn distinct(mut self) -> Self {
        self.def.ops.push(QueryOp::Distinct);
        self
    }

    pub fn skip(mut self, count: u64) -> Self {
        self.def.ops.push(QueryOp::Skip(count));
        self
    }

    pub fn take(mut self, count: u64) -> Self {
        self.def.ops.push(QueryOp::Take(count));
        self
    }

    /// Appends a raw op; shapes the translator rejects surface at execution.
    pub fn with_op(mut self, op: QueryOp) -> Self {
        self.def.ops.push(op);
        self
    }

    pub fn def(&self) -> &QueryDef {
        &self.def
    }

    pub fn into_def(self) -> QueryDef {
        self.def
    }
}

/// A persistence statement (update, delete or insert-select).
#[derive(Debug, Clone)]
pub struct Statement {
    def: QueryDef,
}

impl Statement {
    pub fn def(&self) -> &QueryDef {
        &self.def
    }

    pub fn into_def(self) -> QueryDef {
        self.def
    }
}
