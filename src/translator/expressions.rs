//! Expression translation
//!
//! Maps [`Expr`] trees onto AST nodes of the current request. Collection
//! aggregates, `any`/`all` and first-of-collection hops become correlated
//! sub-requests extracted from a navigation join.

use std::collections::HashMap;

use crate::ast::{
    AggregateFn, AliasSource, BinaryOp, Direction, NodeId, SelectInfo, StatementKind, Token,
    UnaryOp,
};
use crate::errors::{OrmError, Result};
use crate::mapping;
use crate::mapping::errors::MappingError;
use crate::model::{EntityMeta, FieldKind};
use crate::query::{CollectionSource, Expr, Path, PathStep, PatternKind, QueryDef, QueryOp, Var};

use super::errors::unsupported;
use super::folding::fold;
use super::navigation::JoinUse;
use super::Translator;

impl Translator<'_> {
    pub(super) fn translate_expr(&mut self, expr: &Expr) -> Result<NodeId> {
        match expr {
            Expr::Constant(value) => Ok(self.ast.constant(value.clone())),
            Expr::Property(path) => self.translate_path(path),
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let saved = std::mem::replace(&mut self.in_or, true);
                let operands = self.translate_pair(left, right);
                self.in_or = saved;
                let (left, right) = operands?;
                Ok(self.ast.binary(BinaryOp::Or, left, right))
            }
            Expr::Binary { op, left, right } => {
                let (left, right) = self.translate_pair(left, right)?;
                Ok(self.ast.binary(*op, left, right))
            }
            Expr::Not(inner) => {
                let inner = self.translate_expr(inner)?;
                Ok(self.ast.unary(UnaryOp::Not, inner))
            }
            Expr::Negate(inner) => {
                let inner = self.translate_expr(inner)?;
                Ok(self.ast.unary(UnaryOp::Negate, inner))
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.translate_expr(condition)?;
                let then = self.translate_expr(then)?;
                let otherwise = self.translate_expr(otherwise)?;
                Ok(self.ast.conditional(condition, then, otherwise))
            }
            Expr::Pattern {
                kind,
                operand,
                pattern,
            } => {
                let operand = self.translate_expr(operand)?;
                let pattern = self.translate_expr(pattern)?;
                let like = match kind {
                    PatternKind::StartsWith => {
                        let wildcard = self.ast.constant("%");
                        self.ast.binary(BinaryOp::Concat, pattern, wildcard)
                    }
                    PatternKind::EndsWith => {
                        let wildcard = self.ast.constant("%");
                        self.ast.binary(BinaryOp::Concat, wildcard, pattern)
                    }
                    PatternKind::Contains => {
                        let lead = self.ast.constant("%");
                        let head = self.ast.binary(BinaryOp::Concat, lead, pattern);
                        let trail = self.ast.constant("%");
                        self.ast.binary(BinaryOp::Concat, head, trail)
                    }
                };
                Ok(self.ast.binary(BinaryOp::Like, operand, like))
            }
            Expr::InList { operand, values } => {
                if values.is_empty() {
                    // Nothing is a member of the empty list.
                    let one = self.ast.constant(1i64);
                    let zero = self.ast.constant(0i64);
                    return Ok(self.ast.binary(BinaryOp::Eq, one, zero));
                }
                let operand = self.translate_expr(operand)?;
                let values = values
                    .iter()
                    .map(|v| self.ast.constant(v.clone()))
                    .collect();
                Ok(self.ast.in_list(operand, values))
            }
            Expr::Aggregate { func, operand } => {
                if self.group_keys.is_none() {
                    return Err(unsupported(format!("{} outside group_by", func.sql_name())).into());
                }
                let operand = match operand {
                    Some(operand) => self.translate_expr(operand)?,
                    None => self.ast.identifier("*"),
                };
                Ok(self.ast.unary(UnaryOp::Aggregate(*func), operand))
            }
            Expr::GroupKey(index) => {
                let key = self
                    .group_keys
                    .as_ref()
                    .and_then(|keys| keys.get(*index))
                    .copied()
                    .ok_or_else(|| unsupported(format!("group key {} outside group_by", index)))?;
                let mut remap = HashMap::new();
                Ok(self.ast.copy_subtree(key, &mut remap))
            }
            Expr::CollectionAggregate {
                source,
                element,
                func,
                selector,
                predicate,
            } => {
                let sub = self.open_source(source, *element)?;
                self.enter(sub);
                let saved = std::mem::replace(&mut self.in_or, false);
                let filled =
                    self.fill_aggregate(sub, *func, selector.as_deref(), predicate.as_deref());
                self.in_or = saved;
                self.leave();
                filled?;
                Ok(self.ast.unary(UnaryOp::Subquery, sub))
            }
            Expr::Exists {
                source,
                element,
                predicate,
                negate,
            } => {
                let sub = self.open_source(source, *element)?;
                self.enter(sub);
                let saved = std::mem::replace(&mut self.in_or, false);
                let filled = self.fill_exists(sub, predicate.as_deref());
                self.in_or = saved;
                self.leave();
                filled?;
                let exists = self.ast.unary(UnaryOp::Exists, sub);
                if *negate {
                    Ok(self.ast.unary(UnaryOp::Not, exists))
                } else {
                    Ok(exists)
                }
            }
        }
    }

    fn translate_pair(&mut self, left: &Expr, right: &Expr) -> Result<(NodeId, NodeId)> {
        let left = self.translate_expr(left)?;
        let right = self.translate_expr(right)?;
        Ok((left, right))
    }

    /// Property path in scalar position. A path ending in a single navigation
    /// compares by foreign key; collections are only valid inside aggregates.
    pub(super) fn translate_path(&mut self, path: &Path) -> Result<NodeId> {
        let hop = path
            .steps
            .iter()
            .position(|s| matches!(s, PathStep::First { .. }));
        match hop {
            Some(0) => Err(unsupported("first() must follow a collection navigation").into()),
            Some(hop) => self.translate_first(path, hop),
            None => {
                let names = field_names(&path.steps[..])?;
                match names.split_last() {
                    Some((last, prefix)) => {
                        let (alias, meta) = self.follow_references(path.var, prefix)?;
                        self.member_access(alias, meta, last)
                    }
                    None => {
                        let alias = self.var_alias(path.var)?;
                        let meta = self.alias_meta(alias)?;
                        let id = self.mapping.id_column(meta)?;
                        Ok(self.ast.column(alias, id))
                    }
                }
            }
        }
    }

    pub(super) fn member_access(
        &mut self,
        alias: NodeId,
        meta: &'static EntityMeta,
        name: &str,
    ) -> Result<NodeId> {
        let field = mapping::field_of(meta, name)?;
        match field.kind {
            FieldKind::Collection { .. } => Err(unsupported(format!(
                "collection navigation '{}' in scalar position",
                name
            ))
            .into()),
            FieldKind::Scalar { .. } if field.computed => {
                let fragment = self.mapping.computed_fragment(meta, field).ok_or_else(|| {
                    MappingError::UnresolvedComputed {
                        entity: meta.name.to_string(),
                        field: name.to_string(),
                    }
                })?;
                Ok(fragment(&mut self.ast, alias))
            }
            FieldKind::Scalar { .. } | FieldKind::Reference { .. } => {
                let column = self.mapping.column_name(meta, field);
                Ok(self.ast.column(alias, column))
            }
        }
    }

    /// `path.steps[..hop]` names a collection; `steps[hop]` picks its first
    /// member and the remaining steps read from it inside a single-row sub-request.
    fn translate_first(&mut self, path: &Path, hop: usize) -> Result<NodeId> {
        let names = field_names(&path.steps[..hop])?;
        let PathStep::First { element, order } = &path.steps[hop] else {
            return Err(unsupported("first() must follow a collection navigation").into());
        };
        let rest = Path {
            var: *element,
            steps: path.steps[hop + 1..].to_vec(),
        };
        if rest.steps.is_empty() {
            return Err(unsupported("first() without a member access in scalar position").into());
        }

        let (sub, target) = self.extract_collection(path.var, &names)?;
        self.bind_element(sub, *element)?;
        self.enter(sub);
        let saved = std::mem::replace(&mut self.in_or, false);
        let filled = self.fill_first(sub, target, order, &rest);
        self.in_or = saved;
        self.leave();
        filled?;
        if let Some(request) = self.ast.request_mut(sub) {
            request.single_row = true;
        }
        Ok(self.ast.unary(UnaryOp::Subquery, sub))
    }

    fn fill_first(
        &mut self,
        sub: NodeId,
        target: &'static EntityMeta,
        order: &[(Expr, Direction)],
        rest: &Path,
    ) -> Result<()> {
        for (key, direction) in order {
            let key = self.translate_expr(&fold(key))?;
            self.ast.push_order(sub, key, *direction);
        }
        if order.is_empty() {
            let alias = self.from_alias(sub)?;
            let id = self.mapping.id_column(target)?;
            let column = self.ast.column(alias, id);
            self.ast.push_order(sub, column, Direction::Ascending);
        }
        let value = self.translate_path(rest)?;
        self.ast.push_select(sub, SelectInfo::expr(value));
        Ok(())
    }

    fn fill_aggregate(
        &mut self,
        sub: NodeId,
        func: AggregateFn,
        selector: Option<&Expr>,
        predicate: Option<&Expr>,
    ) -> Result<()> {
        if let Some(predicate) = predicate {
            let predicate = self.translate_expr(predicate)?;
            self.ast.and_where(sub, predicate);
        }
        let operand = match (func, selector) {
            (_, Some(selector)) => self.translate_expr(selector)?,
            (AggregateFn::Count, None) => self.ast.identifier("*"),
            (func, None) => {
                return Err(unsupported(format!("{} without a selector", func.sql_name())).into())
            }
        };
        let aggregate = self.ast.unary(UnaryOp::Aggregate(func), operand);
        self.ast.push_select(sub, SelectInfo::expr(aggregate));
        Ok(())
    }

    fn fill_exists(&mut self, sub: NodeId, predicate: Option<&Expr>) -> Result<()> {
        if let Some(predicate) = predicate {
            let predicate = self.translate_expr(predicate)?;
            self.ast.and_where(sub, predicate);
        }
        let one = self.ast.identifier("1");
        self.ast.push_select(sub, SelectInfo::expr(one));
        Ok(())
    }

    /// Correlated sub-request ranging over `source` with `element` bound to its rows.
    fn open_source(&mut self, source: &CollectionSource, element: Var) -> Result<NodeId> {
        match source {
            CollectionSource::Navigation(path) => {
                let names = field_names(&path.steps)?;
                let (sub, _) = self.extract_collection(path.var, &names)?;
                self.bind_element(sub, element)?;
                Ok(sub)
            }
            CollectionSource::Query(def) => self.open_query_source(def),
        }
    }

    /// Joins the collection `var.names` and immediately turns the join into a
    /// correlated sub-request of the current request.
    fn extract_collection(
        &mut self,
        var: Var,
        names: &[&'static str],
    ) -> Result<(NodeId, &'static EntityMeta)> {
        let Some((collection, prefix)) = names.split_last() else {
            return Err(unsupported("collection source without a navigation").into());
        };
        let (owner_alias, owner) = self.follow_references(var, prefix)?;
        let field = mapping::field_of(owner, collection)?;
        let FieldKind::Collection { target } = field.kind else {
            return Err(MappingError::NotACollection {
                entity: owner.name.to_string(),
                field: collection.to_string(),
            }
            .into());
        };
        let token = Token::Navigation(var.id(), names.to_vec());
        let (_, join) = self.navigate(owner_alias, owner, field, token, JoinUse::Predicate)?;
        let sub = self.ast.extract_join_to_sub_request(self.current, join)?;
        Ok((sub, target()))
    }

    fn bind_element(&mut self, sub: NodeId, element: Var) -> Result<()> {
        let alias = self.from_alias(sub)?;
        self.ast.add_equivalent(alias, Token::Var(element.id()));
        Ok(())
    }

    fn from_alias(&self, request: NodeId) -> Result<NodeId> {
        self.ast
            .request(request)
            .and_then(|r| r.from)
            .ok_or_else(|| unsupported(format!("request {} has no from alias", request)).into())
    }

    /// A nested query used as a collection: a fresh request correlated through
    /// whatever outer variables its filters mention.
    fn open_query_source(&mut self, def: &QueryDef) -> Result<NodeId> {
        self.mapping.id_field(def.meta)?;
        let sub = self.ast.new_request(StatementKind::Select);
        self.ast.set_parent(sub, Some(self.current));
        let alias = self.ast.new_alias(
            AliasSource::Table(self.mapping.table_name(def.meta)),
            Some(def.meta),
        );
        self.ast.add_equivalent(alias, Token::Var(def.var.id()));
        self.ast.set_from(sub, alias);

        self.enter(sub);
        let saved = std::mem::replace(&mut self.in_or, false);
        let applied = self.apply_source_ops(alias, def);
        self.in_or = saved;
        self.leave();
        applied?;
        Ok(sub)
    }

    fn apply_source_ops(&mut self, root_alias: NodeId, def: &QueryDef) -> Result<()> {
        let mut alias = root_alias;
        let mut meta = def.meta;
        let mut var = def.var;
        for op in &def.ops {
            match op {
                QueryOp::Filter(predicate) => {
                    let predicate = self.translate_expr(&fold(predicate))?;
                    self.ast.and_where(self.current, predicate);
                }
                QueryOp::SelectReference { path, element }
                | QueryOp::SelectMany { path, element } => {
                    let many = matches!(op, QueryOp::SelectMany { .. });
                    if path.var != var {
                        return Err(
                            unsupported("nested query path must start at its element").into(),
                        );
                    }
                    let names = field_names(&path.steps)?;
                    let (next, target) = self.navigate_required(alias, meta, var, &names, many)?;
                    self.ast.add_equivalent(next, Token::Var(element.id()));
                    alias = next;
                    meta = target;
                    var = *element;
                }
                // Neither order nor load directives change membership.
                QueryOp::OrderBy { .. } | QueryOp::Load { .. } | QueryOp::LoadTree(_) => {}
                other => {
                    return Err(unsupported(format!(
                        "{} in a nested query source",
                        op_name(other)
                    ))
                    .into())
                }
            }
        }
        Ok(())
    }
}

fn field_names(steps: &[PathStep]) -> Result<Vec<&'static str>> {
    steps
        .iter()
        .map(|step| match step {
            PathStep::Field(name) => Ok(*name),
            PathStep::First { .. } => Err(OrmError::from(unsupported(
                "first() inside a navigation source",
            ))),
        })
        .collect()
}

fn op_name(op: &QueryOp) -> &'static str {
    match op {
        QueryOp::Filter(_) => "filter",
        QueryOp::OrderBy { .. } => "order_by",
        QueryOp::Skip(_) => "skip",
        QueryOp::Take(_) => "take",
        QueryOp::Distinct => "distinct",
        QueryOp::GroupBy(_) => "group_by",
        QueryOp::Select(_) => "select",
        QueryOp::SelectReference { .. } => "select_reference",
        QueryOp::SelectMany { .. } => "select_many",
        QueryOp::Load { .. } | QueryOp::LoadTree(_) => "load",
        QueryOp::Update(_) => "update",
        QueryOp::Delete => "delete",
        QueryOp::InsertInto { .. } => "insert_into",
    }
}
