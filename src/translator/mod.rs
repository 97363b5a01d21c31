//! Query translation
//!
//! Interprets the op list of a [`QueryDef`] in order and builds one [`Ast`]:
//! a root request plus correlated sub-requests for collection predicates,
//! collection aggregates, first-of-collection hops and nested query sources.
//!
//! The translator keeps an explicit stack of requests under construction.
//! `current` is the request new joins, filters and select entries attach to;
//! entering a sub-request pushes the outer one.

use log::debug;

use crate::ast::{
    AggregateFn, AliasSource, Ast, NodeId, NodeKind, SelectInfo, StatementKind, Token, UnaryOp,
};
use crate::errors::Result;
use crate::mapping::errors::MappingError;
use crate::mapping::{self, MappingPolicy};
use crate::model::{EntityMeta, FieldKind};
use crate::query::{Expr, LoadMode, LoadTree, Path, QueryDef, QueryOp, Var};

pub mod errors;
mod expressions;
pub mod folding;
mod navigation;
mod select;

use errors::unsupported;
pub use errors::TranslationError;

/// What the rows of a translated statement mean.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultShape {
    /// Entity column runs described by the select entries
    Entities(&'static EntityMeta),
    /// Named projection columns
    Rows(Vec<String>),
    /// One value in the first column of the first row
    Scalar,
    /// Affected row count
    Affected,
}

#[derive(Debug)]
pub struct Translation {
    pub ast: Ast,
    pub root: NodeId,
    pub shape: ResultShape,
    /// Load directives left for materialization
    pub loads: LoadTree,
}

/// Element currently ranged over by the pipeline and what has been applied so far.
#[derive(Debug)]
struct Scope {
    meta: &'static EntityMeta,
    var: Var,
    alias: NodeId,
    root_alias: NodeId,
    grouped: bool,
    paginated: bool,
    projected: Option<Vec<String>>,
    skip: Option<u64>,
    take: Option<u64>,
    loads: LoadTree,
    statement: Option<StatementKind>,
}

pub struct Translator<'m> {
    mapping: &'m dyn MappingPolicy,
    ast: Ast,
    root: NodeId,
    current: NodeId,
    outer: Vec<NodeId>,
    in_or: bool,
    /// Translated `group_by` keys of the root request, `None` before grouping
    group_keys: Option<Vec<NodeId>>,
}

/// Entity query: rows materialize into `def`'s element type.
pub fn translate_query(mapping: &dyn MappingPolicy, def: &QueryDef) -> Result<Translation> {
    let (mut translator, mut scope) = Translator::start(mapping, def)?;
    translator.apply_all(&mut scope, &def.ops)?;
    translator.finish_select(scope)
}

/// `SELECT COUNT(*)` over the query's elements.
pub fn translate_count(mapping: &dyn MappingPolicy, def: &QueryDef) -> Result<Translation> {
    translate_scalar(mapping, def, AggregateFn::Count, None)
}

/// Terminal aggregate of `selector` over the query's elements.
pub fn translate_aggregate(
    mapping: &dyn MappingPolicy,
    def: &QueryDef,
    func: AggregateFn,
    selector: &Expr,
) -> Result<Translation> {
    translate_scalar(mapping, def, func, Some(selector))
}

/// Update, delete or insert-select statement.
pub fn translate_statement(mapping: &dyn MappingPolicy, def: &QueryDef) -> Result<Translation> {
    let (mut translator, mut scope) = Translator::start(mapping, def)?;
    translator.apply_all(&mut scope, &def.ops)?;
    if scope.statement.is_none() {
        return Err(unsupported("statement without update, delete or insert_into").into());
    }
    let root = translator.root;
    Ok(Translation {
        ast: translator.ast,
        root,
        shape: ResultShape::Affected,
        loads: LoadTree::new(),
    })
}

fn translate_scalar(
    mapping: &dyn MappingPolicy,
    def: &QueryDef,
    func: AggregateFn,
    selector: Option<&Expr>,
) -> Result<Translation> {
    let (mut translator, mut scope) = Translator::start(mapping, def)?;
    translator.apply_all(&mut scope, &def.ops)?;
    if scope.statement.is_some() {
        return Err(unsupported("aggregate over a persistence statement").into());
    }
    if scope.grouped && scope.projected.is_none() {
        return Err(unsupported("group_by without select").into());
    }
    if selector.is_none() && func != AggregateFn::Count {
        return Err(unsupported(format!("{} without a selector", func.sql_name())).into());
    }

    let wrap = scope.paginated
        || scope.projected.is_some()
        || translator.ast.request(translator.root).map(|r| r.distinct).unwrap_or(false);
    if !wrap {
        let operand = match selector {
            Some(selector) => translator.translate_expr(&folding::fold(selector))?,
            None => translator.ast.identifier("*"),
        };
        let aggregate = translator.ast.unary(UnaryOp::Aggregate(func), operand);
        let root = translator.root;
        translator.ast.push_select(root, SelectInfo::expr(aggregate));
        return Ok(translator.into_translation(ResultShape::Scalar, LoadTree::new()));
    }

    // The paginated or projected rows become a derived table the aggregate reads.
    let inner = translator.root;
    let value_column = match (&scope.projected, selector) {
        (Some(_), Some(_)) => {
            return Err(unsupported("aggregate selector over a projection").into());
        }
        (Some(_), None) => None,
        (None, Some(selector)) => {
            let value = translator.translate_expr(&folding::fold(selector))?;
            translator.ast.push_select(inner, SelectInfo::labeled(value, "v"));
            Some("v")
        }
        (None, None) => {
            let id = translator.mapping.id_column(scope.meta)?;
            let value = translator.ast.column(scope.alias, id);
            translator.ast.push_select(inner, SelectInfo::labeled(value, "v"));
            None
        }
    };
    translator.apply_window(&mut scope)?;

    let outer = translator.ast.new_request(StatementKind::Select);
    let derived = translator.ast.new_alias(AliasSource::Subquery(inner), None);
    translator.ast.set_parent(inner, Some(derived));
    translator.ast.set_from(outer, derived);
    let operand = match value_column {
        Some(column) => translator.ast.column(derived, column),
        None => translator.ast.identifier("*"),
    };
    let aggregate = translator.ast.unary(UnaryOp::Aggregate(func), operand);
    translator.ast.push_select(outer, SelectInfo::expr(aggregate));
    translator.root = outer;
    Ok(translator.into_translation(ResultShape::Scalar, LoadTree::new()))
}

impl<'m> Translator<'m> {
    fn start(mapping: &'m dyn MappingPolicy, def: &QueryDef) -> Result<(Self, Scope)> {
        mapping.id_field(def.meta)?;
        let mut ast = Ast::new();
        let root = ast.new_request(StatementKind::Select);
        let alias = ast.new_alias(
            AliasSource::Table(mapping.table_name(def.meta)),
            Some(def.meta),
        );
        ast.add_equivalent(alias, Token::Var(def.var.id()));
        ast.set_from(root, alias);
        let translator = Translator {
            mapping,
            ast,
            root,
            current: root,
            outer: Vec::new(),
            in_or: false,
            group_keys: None,
        };
        let scope = Scope {
            meta: def.meta,
            var: def.var,
            alias,
            root_alias: alias,
            grouped: false,
            paginated: false,
            projected: None,
            skip: None,
            take: None,
            loads: LoadTree::new(),
            statement: None,
        };
        Ok((translator, scope))
    }

    fn into_translation(self, shape: ResultShape, loads: LoadTree) -> Translation {
        Translation {
            ast: self.ast,
            root: self.root,
            shape,
            loads,
        }
    }

    /// Makes `request` current until the matching [`leave`](Self::leave).
    fn enter(&mut self, request: NodeId) {
        self.outer.push(self.current);
        self.current = request;
    }

    fn leave(&mut self) {
        if let Some(outer) = self.outer.pop() {
            self.current = outer;
        }
    }

    fn apply_all(&mut self, scope: &mut Scope, ops: &[QueryOp]) -> Result<()> {
        for op in ops {
            if scope.statement.is_some() {
                return Err(unsupported("operator after a persistence statement").into());
            }
            self.apply(scope, op)?;
        }
        Ok(())
    }

    fn apply(&mut self, scope: &mut Scope, op: &QueryOp) -> Result<()> {
        match op {
            QueryOp::Filter(predicate) => {
                if scope.paginated || scope.projected.is_some() {
                    return Err(unsupported("filter after skip/take or select").into());
                }
                let node = self.translate_expr(&folding::fold(predicate))?;
                if scope.grouped {
                    self.ast.and_having(self.current, node);
                } else {
                    self.ast.and_where(self.current, node);
                }
            }
            QueryOp::OrderBy {
                key,
                direction,
                then,
            } => {
                if scope.paginated || scope.projected.is_some() {
                    return Err(unsupported("order_by after skip/take or select").into());
                }
                if !then {
                    self.ast.clear_order(self.current);
                }
                let node = self.translate_expr(&folding::fold(key))?;
                self.ast.push_order(self.current, node, *direction);
            }
            QueryOp::Skip(count) => {
                scope.take = scope.take.map(|t| t.saturating_sub(*count));
                scope.skip = Some(scope.skip.unwrap_or(0).saturating_add(*count));
                scope.paginated = true;
            }
            QueryOp::Take(count) => {
                scope.take = Some(scope.take.map_or(*count, |t| t.min(*count)));
                scope.paginated = true;
            }
            QueryOp::Distinct => {
                if let Some(request) = self.ast.request_mut(self.current) {
                    request.distinct = true;
                }
            }
            QueryOp::GroupBy(keys) => {
                if scope.grouped || scope.paginated || scope.projected.is_some() {
                    return Err(unsupported("group_by after group_by, skip/take or select").into());
                }
                if !scope.loads.is_empty() {
                    return Err(unsupported("group_by on a query with load directives").into());
                }
                let mut translated = Vec::with_capacity(keys.len());
                for key in keys {
                    let node = self.translate_expr(&folding::fold(key))?;
                    self.ast.push_group_by(self.current, node);
                    translated.push(node);
                }
                self.group_keys = Some(translated);
                scope.grouped = true;
            }
            QueryOp::Select(projection) => {
                if scope.projected.is_some() {
                    return Err(unsupported("select after select").into());
                }
                if !scope.loads.is_empty() {
                    return Err(unsupported("load directives on a projection").into());
                }
                let mut names = Vec::with_capacity(projection.columns.len());
                for (name, expr) in &projection.columns {
                    let node = self.translate_expr(&folding::fold(expr))?;
                    self.ast
                        .push_select(self.current, SelectInfo::labeled(node, name.clone()));
                    names.push(name.clone());
                }
                scope.projected = Some(names);
            }
            QueryOp::SelectReference { path, element } => {
                self.rebind(scope, path, *element, false)?;
            }
            QueryOp::SelectMany { path, element } => {
                self.rebind(scope, path, *element, true)?;
            }
            QueryOp::Load { path, mode } => self.register_load(scope, path, *mode)?,
            QueryOp::LoadTree(tree) => {
                if scope.grouped || scope.projected.is_some() {
                    return Err(
                        unsupported("load directives on a grouped or projected query").into(),
                    );
                }
                scope.loads.merge(tree);
            }
            QueryOp::Update(assignments) => {
                self.begin_statement(scope, StatementKind::Update)?;
                let meta = scope.meta;
                for (field, value) in assignments {
                    self.assign(meta, field, value)?;
                }
            }
            QueryOp::Delete => self.begin_statement(scope, StatementKind::Delete)?,
            QueryOp::InsertInto {
                target,
                assignments,
            } => {
                self.begin_statement(scope, StatementKind::Insert)?;
                let table = self.mapping.table_name(target);
                if let Some(request) = self.ast.request_mut(self.root) {
                    request.target = Some(table);
                }
                for (field, value) in assignments {
                    self.assign(target, field, value)?;
                }
            }
        }
        Ok(())
    }

    /// `select_reference` / `select_many`: the navigated entity becomes the element.
    fn rebind(&mut self, scope: &mut Scope, path: &Path, element: Var, many: bool) -> Result<()> {
        let verb = if many { "select_many" } else { "select_reference" };
        if scope.grouped || scope.paginated || scope.projected.is_some() {
            return Err(unsupported(format!("{} after group_by, skip/take or select", verb)).into());
        }
        if !scope.loads.is_empty() {
            return Err(unsupported(format!("load directives before {}", verb)).into());
        }
        if path.var != scope.var {
            return Err(
                unsupported(format!("{} path must start at the query element", verb)).into(),
            );
        }
        let names = path
            .field_names()
            .ok_or_else(|| unsupported(format!("first() in a {} path", verb)))?;
        let (alias, meta) =
            self.navigate_required(scope.alias, scope.meta, path.var, &names, many)?;
        self.ast.add_equivalent(alias, Token::Var(element.id()));
        debug!("{} rebinds the element to {} ({})", verb, meta.name, alias);
        scope.alias = alias;
        scope.meta = meta;
        scope.var = element;
        Ok(())
    }

    fn register_load(&mut self, scope: &mut Scope, path: &Path, mode: LoadMode) -> Result<()> {
        if scope.grouped || scope.projected.is_some() {
            return Err(unsupported("load directives on a grouped or projected query").into());
        }
        if path.var != scope.var {
            return Err(unsupported("load path must start at the query element").into());
        }
        let names = path
            .field_names()
            .ok_or_else(|| unsupported("first() in a load path"))?;
        let mut meta = scope.meta;
        for name in &names {
            let field = mapping::field_of(meta, name)?;
            meta = match field.kind {
                FieldKind::Reference { target } | FieldKind::Collection { target } => target(),
                FieldKind::Scalar { .. } => {
                    return Err(MappingError::NotANavigation {
                        entity: meta.name.to_string(),
                        field: name.to_string(),
                    }
                    .into())
                }
            };
        }
        scope.loads.add(&names, mode);
        Ok(())
    }

    fn begin_statement(&mut self, scope: &mut Scope, kind: StatementKind) -> Result<()> {
        if scope.grouped || scope.paginated || scope.projected.is_some() {
            return Err(unsupported(format!(
                "{:?} statement after group_by, skip/take or select",
                kind
            ))
            .into());
        }
        if kind != StatementKind::Insert && scope.alias != scope.root_alias {
            return Err(unsupported(format!(
                "{:?} statement through select_reference or select_many",
                kind
            ))
            .into());
        }
        let key_column = match kind {
            StatementKind::Update | StatementKind::Delete => {
                Some(self.mapping.id_column(scope.meta)?)
            }
            _ => None,
        };
        if let Some(request) = self.ast.request_mut(self.root) {
            request.kind = kind;
            request.key_column = key_column;
        }
        scope.statement = Some(kind);
        Ok(())
    }

    /// One `column = value` assignment; values are translated without folding.
    fn assign(&mut self, meta: &'static EntityMeta, field: &str, value: &Expr) -> Result<()> {
        let descriptor = mapping::field_of(meta, field)?;
        if descriptor.is_collection() || descriptor.computed {
            return Err(unsupported(format!(
                "assignment to {}.{}",
                meta.name, descriptor.name
            ))
            .into());
        }
        let column = self.mapping.column_name(meta, descriptor);
        let node = self.translate_expr(value)?;
        self.ast.push_assignment(self.root, column, node);
        Ok(())
    }

    /// Writes skip/take onto the root request, adding an id order when none exists.
    /// Sets skip/take on the root and completes its order so that every
    /// ranked row is unique: group keys for grouped rows, the projected
    /// columns for distinct projections, otherwise the element id.
    fn apply_window(&mut self, scope: &mut Scope) -> Result<()> {
        if !scope.paginated {
            return Ok(());
        }
        let (has_order, distinct) = self
            .ast
            .request(self.root)
            .map(|r| (!r.order_by.is_empty(), r.distinct))
            .unwrap_or((false, false));
        if let Some(keys) = self.group_keys.clone() {
            for key in keys {
                self.push_order_copy(key);
            }
        } else if distinct && scope.projected.is_some() {
            let columns: Vec<NodeId> = self
                .ast
                .request(self.root)
                .map(|r| {
                    r.select
                        .iter()
                        .filter_map(|entry| self.ast.select_info(*entry))
                        .map(|info| info.expr)
                        .collect()
                })
                .unwrap_or_default();
            for column in columns {
                self.push_order_copy(column);
            }
        } else {
            if !has_order {
                debug!("pagination without an order: ordering by {} id", scope.meta.name);
            }
            self.push_id_tie_breaker(scope.alias, scope.meta)?;
        }
        if let Some(request) = self.ast.request_mut(self.root) {
            request.skip = scope.skip;
            request.take = scope.take;
        }
        Ok(())
    }

    /// Appends a copy of `expr` to the root order unless an equal key is present.
    fn push_order_copy(&mut self, expr: NodeId) {
        let key = self.ast.describe(expr);
        let present = self
            .ast
            .request(self.root)
            .map(|r| {
                r.order_by.iter().any(|order| match self.ast.kind(*order) {
                    NodeKind::OrderElement { expr, .. } => self.ast.describe(*expr) == key,
                    _ => false,
                })
            })
            .unwrap_or(false);
        if present {
            return;
        }
        let mut remap = std::collections::HashMap::new();
        let copy = self.ast.copy_subtree(expr, &mut remap);
        self.ast.push_order(self.root, copy, Default::default());
    }

    fn finish_select(mut self, mut scope: Scope) -> Result<Translation> {
        if scope.statement.is_some() {
            return Err(unsupported("persistence statement used as a query").into());
        }
        if scope.grouped && scope.projected.is_none() {
            return Err(unsupported("group_by without select").into());
        }
        self.apply_window(&mut scope)?;
        let shape = match scope.projected.take() {
            Some(names) => ResultShape::Rows(names),
            None => {
                self.push_entity_select(&scope)?;
                ResultShape::Entities(scope.meta)
            }
        };
        debug!(
            "translated {:?} query into {} nodes",
            shape_name(&shape),
            self.ast.len()
        );
        let loads = std::mem::take(&mut scope.loads);
        Ok(self.into_translation(shape, loads))
    }
}

fn shape_name(shape: &ResultShape) -> &'static str {
    match shape {
        ResultShape::Entities(_) => "entity",
        ResultShape::Rows(_) => "projection",
        ResultShape::Scalar => "scalar",
        ResultShape::Affected => "statement",
    }
}

#[cfg(test)]
mod tests;
