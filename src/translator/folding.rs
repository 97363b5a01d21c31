//! Host-side constant folding
//!
//! Sub-trees made only of constants are evaluated once, bottom-up, before
//! translation. Anything touching a property, an aggregate or a NULL constant is
//! left for the database so three-valued logic stays intact.

use crate::ast::BinaryOp;
use crate::model::Value;
use crate::query::Expr;

pub fn fold(expr: &Expr) -> Expr {
    match expr {
        Expr::Binary { op, left, right } => {
            let left = fold(left);
            let right = fold(right);
            if let (Expr::Constant(a), Expr::Constant(b)) = (&left, &right) {
                if let Some(value) = evaluate(*op, a, b) {
                    return Expr::Constant(value);
                }
            }
            Expr::Binary {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        Expr::Not(inner) => match fold(inner) {
            Expr::Constant(Value::Bool(b)) => Expr::Constant(Value::Bool(!b)),
            other => Expr::Not(Box::new(other)),
        },
        Expr::Negate(inner) => match fold(inner) {
            Expr::Constant(Value::Int(i)) if i != i64::MIN => Expr::Constant(Value::Int(-i)),
            Expr::Constant(Value::Float(f)) => Expr::Constant(Value::Float(-f)),
            other => Expr::Negate(Box::new(other)),
        },
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => match fold(condition) {
            Expr::Constant(Value::Bool(true)) => fold(then),
            Expr::Constant(Value::Bool(false)) => fold(otherwise),
            condition => Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(fold(then)),
                otherwise: Box::new(fold(otherwise)),
            },
        },
        Expr::Pattern {
            kind,
            operand,
            pattern,
        } => Expr::Pattern {
            kind: *kind,
            operand: Box::new(fold(operand)),
            pattern: Box::new(fold(pattern)),
        },
        Expr::InList { operand, values } => Expr::InList {
            operand: Box::new(fold(operand)),
            values: values.clone(),
        },
        Expr::Aggregate { func, operand } => Expr::Aggregate {
            func: *func,
            operand: operand.as_ref().map(|o| Box::new(fold(o))),
        },
        Expr::CollectionAggregate {
            source,
            element,
            func,
            selector,
            predicate,
        } => Expr::CollectionAggregate {
            source: source.clone(),
            element: *element,
            func: *func,
            selector: selector.as_ref().map(|s| Box::new(fold(s))),
            predicate: predicate.as_ref().map(|p| Box::new(fold(p))),
        },
        Expr::Exists {
            source,
            element,
            predicate,
            negate,
        } => Expr::Exists {
            source: source.clone(),
            element: *element,
            predicate: predicate.as_ref().map(|p| Box::new(fold(p))),
            negate: *negate,
        },
        Expr::Constant(_) | Expr::Property(_) | Expr::GroupKey(_) => expr.clone(),
    }
}

fn evaluate(op: BinaryOp, a: &Value, b: &Value) -> Option<Value> {
    use Value::*;
    match (op, a, b) {
        (BinaryOp::And, Bool(x), Bool(y)) => Some(Bool(*x && *y)),
        (BinaryOp::Or, Bool(x), Bool(y)) => Some(Bool(*x || *y)),
        (BinaryOp::Concat, Text(x), Text(y)) => Some(Text(format!("{}{}", x, y))),
        (BinaryOp::Add, Int(x), Int(y)) => x.checked_add(*y).map(Int),
        (BinaryOp::Sub, Int(x), Int(y)) => x.checked_sub(*y).map(Int),
        (BinaryOp::Mul, Int(x), Int(y)) => x.checked_mul(*y).map(Int),
        (BinaryOp::Div, Int(x), Int(y)) => x.checked_div(*y).map(Int),
        (BinaryOp::Mod, Int(x), Int(y)) => x.checked_rem(*y).map(Int),
        (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div, _, _) => {
            let (x, y) = (a.as_f64()?, b.as_f64()?);
            match op {
                BinaryOp::Add => Some(Float(x + y)),
                BinaryOp::Sub => Some(Float(x - y)),
                BinaryOp::Mul => Some(Float(x * y)),
                BinaryOp::Div if y != 0.0 => Some(Float(x / y)),
                _ => None,
            }
        }
        (op, a, b) if op.is_comparison() && op != BinaryOp::Like => compare(op, a, b).map(Bool),
        _ => None,
    }
}

fn compare(op: BinaryOp, a: &Value, b: &Value) -> Option<bool> {
    use std::cmp::Ordering;
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?)?,
    };
    Some(match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::Ne => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Ge => ordering != Ordering::Less,
        _ => return None,
    })
}
