//! Expression combinators
//!
//! Expressions are plain data built from [`Var`] and [`Path`] combinators; the
//! translator turns them into AST nodes. Field names are checked against entity
//! metadata at translation time.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::ast::{AggregateFn, BinaryOp, Direction, VarId};
use crate::model::Value;

use super::QueryDef;

static NEXT_VAR: AtomicU32 = AtomicU32::new(1);

/// A query variable: the element a query (or a collection lambda) ranges over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var(VarId);

impl Var {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Var(VarId(NEXT_VAR.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn id(&self) -> VarId {
        self.0
    }

    pub fn field(&self, name: &'static str) -> Path {
        Path {
            var: *self,
            steps: vec![PathStep::Field(name)],
        }
    }
}

#[derive(Debug, Clone)]
pub enum PathStep {
    Field(&'static str),
    /// First member of the preceding collection, optionally ordered
    First {
        element: Var,
        order: Vec<(Expr, Direction)>,
    },
}

/// A variable followed by property steps, e.g. `o.customer.name`.
#[derive(Debug, Clone)]
pub struct Path {
    pub var: Var,
    pub steps: Vec<PathStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    StartsWith,
    EndsWith,
    Contains,
}

/// Source of a collection predicate or aggregate.
#[derive(Debug, Clone)]
pub enum CollectionSource {
    Navigation(Path),
    Query(Box<QueryDef>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Constant(Value),
    Property(Path),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Pattern {
        kind: PatternKind,
        operand: Box<Expr>,
        pattern: Box<Expr>,
    },
    InList {
        operand: Box<Expr>,
        values: Vec<Value>,
    },
    /// Aggregate over the current group; `None` operand counts rows
    Aggregate {
        func: AggregateFn,
        operand: Option<Box<Expr>>,
    },
    /// The i-th `group_by` key
    GroupKey(usize),
    CollectionAggregate {
        source: CollectionSource,
        element: Var,
        func: AggregateFn,
        selector: Option<Box<Expr>>,
        predicate: Option<Box<Expr>>,
    },
    Exists {
        source: CollectionSource,
        element: Var,
        predicate: Option<Box<Expr>>,
        negate: bool,
    },
}

impl Expr {
    pub fn val(value: impl Into<Value>) -> Expr {
        Expr::Constant(value.into())
    }

    pub fn null() -> Expr {
        Expr::Constant(Value::Null)
    }

    /// `CASE WHEN condition THEN then ELSE otherwise END`
    pub fn when(condition: Expr, then: impl Into<Expr>, otherwise: impl Into<Expr>) -> Expr {
        Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then.into()),
            otherwise: Box::new(otherwise.into()),
        }
    }

    /// True when some element of `query` exists (the query may reference outer variables).
    pub fn exists_in<T>(query: super::Query<T>) -> Expr {
        let element = query.var();
        Expr::Exists {
            source: CollectionSource::Query(Box::new(query.into_def())),
            element,
            predicate: None,
            negate: false,
        }
    }

    /// Number of elements of `query`.
    pub fn count_in<T>(query: super::Query<T>) -> Expr {
        let element = query.var();
        Expr::CollectionAggregate {
            source: CollectionSource::Query(Box::new(query.into_def())),
            element,
            func: AggregateFn::Count,
            selector: None,
            predicate: None,
        }
    }

    fn binary(self, op: BinaryOp, rhs: impl Into<Expr>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(rhs.into()),
        }
    }

    pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ge, rhs)
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Or, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn neg(self) -> Expr {
        Expr::Negate(Box::new(self))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Add, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Sub, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Mul, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn div(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Div, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn rem(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Mod, rhs)
    }

    pub fn concat(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Concat, rhs)
    }

    pub fn is_null(self) -> Expr {
        self.eq(Expr::null())
    }

    pub fn is_not_null(self) -> Expr {
        self.ne(Expr::null())
    }

    fn pattern(self, kind: PatternKind, pattern: impl Into<Expr>) -> Expr {
        Expr::Pattern {
            kind,
            operand: Box::new(self),
            pattern: Box::new(pattern.into()),
        }
    }

    pub fn starts_with(self, pattern: impl Into<Expr>) -> Expr {
        self.pattern(PatternKind::StartsWith, pattern)
    }

    pub fn ends_with(self, pattern: impl Into<Expr>) -> Expr {
        self.pattern(PatternKind::EndsWith, pattern)
    }

    pub fn contains(self, pattern: impl Into<Expr>) -> Expr {
        self.pattern(PatternKind::Contains, pattern)
    }

    /// Membership in a constant list (`IN`).
    pub fn in_list<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::InList {
            operand: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant(_))
    }
}

impl From<Path> for Expr {
    fn from(path: Path) -> Self {
        Expr::Property(path)
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Constant(value)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Constant(v.into())
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Constant(v.into())
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::Constant(v.into())
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Expr::Constant(v.into())
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Expr::Constant(v.into())
    }
}

impl From<String> for Expr {
    fn from(v: String) -> Self {
        Expr::Constant(v.into())
    }
}

impl Path {
    pub fn field(mut self, name: &'static str) -> Path {
        self.steps.push(PathStep::Field(name));
        self
    }

    /// First member of this collection.
    pub fn first(mut self) -> Path {
        self.steps.push(PathStep::First {
            element: Var::new(),
            order: Vec::new(),
        });
        self
    }

    /// First member of this collection under the given order.
    pub fn first_by(mut self, key: impl FnOnce(&Var) -> Expr, direction: Direction) -> Path {
        let element = Var::new();
        let order = vec![(key(&element), direction)];
        self.steps.push(PathStep::First { element, order });
        self
    }

    /// Field names of the path, `None` when it contains a first-of-collection hop.
    pub fn field_names(&self) -> Option<Vec<&'static str>> {
        self.steps
            .iter()
            .map(|s| match s {
                PathStep::Field(name) => Some(*name),
                PathStep::First { .. } => None,
            })
            .collect()
    }

    pub fn expr(self) -> Expr {
        Expr::Property(self)
    }

    fn aggregate(
        self,
        func: AggregateFn,
        selector: Option<Expr>,
        predicate: Option<Expr>,
        element: Var,
    ) -> Expr {
        Expr::CollectionAggregate {
            source: CollectionSource::Navigation(self),
            element,
            func,
            selector: selector.map(Box::new),
            predicate: predicate.map(Box::new),
        }
    }

    pub fn count(self) -> Expr {
        self.aggregate(AggregateFn::Count, None, None, Var::new())
    }

    pub fn count_where(self, predicate: impl FnOnce(&Var) -> Expr) -> Expr {
        let element = Var::new();
        let predicate = predicate(&element);
        self.aggregate(AggregateFn::Count, None, Some(predicate), element)
    }

    fn aggregate_of(self, func: AggregateFn, selector: impl FnOnce(&Var) -> Expr) -> Expr {
        let element = Var::new();
        let selector = selector(&element);
        self.aggregate(func, Some(selector), None, element)
    }

    pub fn sum(self, selector: impl FnOnce(&Var) -> Expr) -> Expr {
        self.aggregate_of(AggregateFn::Sum, selector)
    }

    pub fn min(self, selector: impl FnOnce(&Var) -> Expr) -> Expr {
        self.aggregate_of(AggregateFn::Min, selector)
    }

    pub fn max(self, selector: impl FnOnce(&Var) -> Expr) -> Expr {
        self.aggregate_of(AggregateFn::Max, selector)
    }

    pub fn average(self, selector: impl FnOnce(&Var) -> Expr) -> Expr {
        self.aggregate_of(AggregateFn::Average, selector)
    }

    pub fn any(self) -> Expr {
        Expr::Exists {
            source: CollectionSource::Navigation(self),
            element: Var::new(),
            predicate: None,
            negate: false,
        }
    }

    pub fn any_where(self, predicate: impl FnOnce(&Var) -> Expr) -> Expr {
        let element = Var::new();
        let predicate = predicate(&element);
        Expr::Exists {
            source: CollectionSource::Navigation(self),
            element,
            predicate: Some(Box::new(predicate)),
            negate: false,
        }
    }

    /// Every member satisfies `predicate` (vacuously true for an empty collection).
    pub fn all(self, predicate: impl FnOnce(&Var) -> Expr) -> Expr {
        let element = Var::new();
        let predicate = predicate(&element).not();
        Expr::Exists {
            source: CollectionSource::Navigation(self),
            element,
            predicate: Some(Box::new(predicate)),
            negate: true,
        }
    }

    pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
        self.expr().eq(rhs)
    }

    pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
        self.expr().ne(rhs)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        self.expr().lt(rhs)
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        self.expr().le(rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        self.expr().gt(rhs)
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        self.expr().ge(rhs)
    }

    pub fn is_null(self) -> Expr {
        self.expr().is_null()
    }

    pub fn is_not_null(self) -> Expr {
        self.expr().is_not_null()
    }

    pub fn starts_with(self, pattern: impl Into<Expr>) -> Expr {
        self.expr().starts_with(pattern)
    }

    pub fn ends_with(self, pattern: impl Into<Expr>) -> Expr {
        self.expr().ends_with(pattern)
    }

    pub fn contains(self, pattern: impl Into<Expr>) -> Expr {
        self.expr().contains(pattern)
    }

    pub fn in_list<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        self.expr().in_list(values)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(self, rhs: impl Into<Expr>) -> Expr {
        self.expr().add(rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(self, rhs: impl Into<Expr>) -> Expr {
        self.expr().sub(rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(self, rhs: impl Into<Expr>) -> Expr {
        self.expr().mul(rhs)
    }

    pub fn concat(self, rhs: impl Into<Expr>) -> Expr {
        self.expr().concat(rhs)
    }
}
