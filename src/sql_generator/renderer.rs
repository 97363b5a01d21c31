//! AST to SQL text
//!
//! [`SqlRenderer`] is a stack-based post-order visitor: every `visit_*` pops the
//! fragments of its children and pushes its own. Requests render their parts
//! in textual order themselves.
//!
//! Non-null constants never appear in the text. Each one is appended to the
//! parameter list and leaves a marker; [`SqlRenderer::finish`] replaces the
//! markers with the dialect's placeholders, re-sequencing the parameters into
//! textual order for positional dialects.

use std::collections::HashMap;

use log::debug;

use super::dialect::{Dialect, PaginationStrategy, Placeholders};
use super::errors::RenderError;
use super::RenderedSql;
use crate::ast::visitor::op_symbol;
use crate::ast::{
    AliasDefinition, AliasSource, Ast, BinaryOp, Direction, Join, JoinKind, NodeId, NodeKind,
    NodeVisitor, Request, SelectInfo, StatementKind, UnaryOp,
};
use crate::errors::{OrmError, Result};
use crate::mapping::errors::MappingError;
use crate::model::Value;

const MARK: char = '\u{1}';
const RANK_COLUMN: &str = "__RANK";
const RANKED_ALIAS: &str = "ranked";
const RANK_PREFIX: &str = "r_";

/// Renders the statement rooted at `root`.
pub fn render(dialect: &dyn Dialect, ast: &Ast, root: NodeId) -> Result<RenderedSql> {
    let mut renderer = SqlRenderer::new(dialect);
    let sql = renderer.render(ast, root)?;
    let rendered = renderer.finish(sql);
    debug!(
        "rendered {} statement with {} parameters",
        rendered.sql.split(' ').next().unwrap_or_default(),
        rendered.params.len()
    );
    Ok(rendered)
}

pub struct SqlRenderer<'d> {
    dialect: &'d dyn Dialect,
    stack: Vec<String>,
    params: Vec<Value>,
    /// Set while rendering the renamed copy of a request inside a rank subquery
    alias_prefix: Option<&'static str>,
    /// Aliases rendered as a bare table name (UPDATE/DELETE targets)
    qualifiers: HashMap<NodeId, String>,
    in_select_list: bool,
}

impl<'d> SqlRenderer<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        SqlRenderer {
            dialect,
            stack: Vec::new(),
            params: Vec::new(),
            alias_prefix: None,
            qualifiers: HashMap::new(),
            in_select_list: false,
        }
    }

    fn pop(&mut self) -> String {
        self.stack.pop().unwrap_or_default()
    }

    fn pop_n(&mut self, n: usize) -> Vec<String> {
        let at = self.stack.len().saturating_sub(n);
        self.stack.split_off(at)
    }

    /// Renders one subtree and returns its text.
    pub fn render(&mut self, ast: &Ast, id: NodeId) -> Result<String> {
        ast.accept(id, self)?;
        Ok(self.pop())
    }

    /// Replaces parameter markers with placeholders.
    pub fn finish(self, sql: String) -> RenderedSql {
        let positional = self.dialect.placeholders() == Placeholders::Positional;
        let mut text = String::with_capacity(sql.len());
        let mut params = Vec::new();
        for (i, part) in sql.split(MARK).enumerate() {
            if i % 2 == 0 {
                text.push_str(part);
                continue;
            }
            let Ok(number) = part.parse::<usize>() else {
                text.push_str(part);
                continue;
            };
            if positional {
                if let Some(value) = number.checked_sub(1).and_then(|i| self.params.get(i)) {
                    params.push(value.clone());
                }
                text.push_str(&self.dialect.placeholder(params.len()));
            } else {
                text.push_str(&self.dialect.placeholder(number));
            }
        }
        RenderedSql {
            sql: text,
            params: if positional { params } else { self.params },
        }
    }

    fn quote(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    fn alias_name(&self, ast: &Ast, alias: NodeId) -> String {
        if let Some(table) = self.qualifiers.get(&alias) {
            return table.clone();
        }
        let name = ast
            .alias(alias)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| format!("t{}", alias.0));
        match self.alias_prefix {
            Some(prefix) => format!("{}{}", prefix, name),
            None => name,
        }
    }

    fn unsupported_pagination(&self, reason: &str) -> OrmError {
        RenderError::UnsupportedPagination {
            dialect: self.dialect.kind().to_string(),
            reason: reason.to_string(),
        }
        .into()
    }

    fn render_select(&mut self, ast: &Ast, id: NodeId, request: &Request) -> Result<String> {
        if !request.is_paginated() {
            let items = self.select_items(ast, request, false)?;
            let mut sql = self.select_body(ast, request, &items, None)?;
            sql.push_str(&self.order_clause(ast, request)?);
            if request.single_row {
                sql.push_str(" LIMIT 1");
            }
            return Ok(sql);
        }
        match self.dialect.pagination(ast.has_multiplying_joins(id)) {
            PaginationStrategy::LimitOffset => {
                let items = self.select_items(ast, request, false)?;
                let mut sql = self.select_body(ast, request, &items, None)?;
                sql.push_str(&self.order_clause(ast, request)?);
                sql.push_str(&self.dialect.limit_offset(request.skip, request.take));
                Ok(sql)
            }
            PaginationStrategy::DenseRank => self.render_dense_rank(ast, request),
            PaginationStrategy::CorrelatedCount => self.render_correlated_rank(ast, request),
        }
    }

    /// Select list entries; `numbered` relabels them `c0, c1, ...` for a derived table.
    fn select_items(
        &mut self,
        ast: &Ast,
        request: &Request,
        numbered: bool,
    ) -> Result<Vec<String>> {
        let mut items = Vec::with_capacity(request.select.len());
        for (i, entry) in request.select.iter().enumerate() {
            let info = ast
                .select_info(*entry)
                .ok_or_else(|| RenderError::UnexpectedNode(ast.describe(*entry)))?;
            self.in_select_list = true;
            let rendered = self.render(ast, info.expr);
            self.in_select_list = false;
            let expr = rendered?;
            items.push(match (numbered, &info.label) {
                (true, _) => format!("{} AS {}", expr, self.quote(&format!("c{}", i))),
                (false, Some(label)) => format!("{} AS {}", expr, self.quote(label)),
                (false, None) => expr,
            });
        }
        if items.is_empty() {
            items.push("*".to_string());
        }
        Ok(items)
    }

    /// `SELECT items FROM ... [WHERE] [GROUP BY] [HAVING]`
    fn select_body(
        &mut self,
        ast: &Ast,
        request: &Request,
        items: &[String],
        extra_condition: Option<String>,
    ) -> Result<String> {
        let from = request.from.ok_or(RenderError::MissingFrom)?;
        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if request.distinct { "DISTINCT " } else { "" },
            items.join(", "),
            self.render(ast, from)?
        );
        for join in &request.joins {
            sql.push(' ');
            sql.push_str(&self.render(ast, *join)?);
        }
        let mut conditions = Vec::new();
        if let Some(filter) = request.filter {
            conditions.push(self.render(ast, filter)?);
        }
        conditions.extend(extra_condition);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if !request.group_by.is_empty() {
            let mut keys = Vec::with_capacity(request.group_by.len());
            for key in &request.group_by {
                keys.push(self.render(ast, *key)?);
            }
            sql.push_str(" GROUP BY ");
            sql.push_str(&keys.join(", "));
        }
        if let Some(having) = request.having {
            sql.push_str(" HAVING ");
            sql.push_str(&self.render(ast, having)?);
        }
        Ok(sql)
    }

    fn order_clause(&mut self, ast: &Ast, request: &Request) -> Result<String> {
        if request.order_by.is_empty() {
            return Ok(String::new());
        }
        let mut elements = Vec::with_capacity(request.order_by.len());
        for order in &request.order_by {
            elements.push(self.render(ast, *order)?);
        }
        Ok(format!(" ORDER BY {}", elements.join(", ")))
    }

    /// Order targets of a rank strategy: plain columns only.
    fn rank_keys(&self, ast: &Ast, request: &Request) -> Result<Vec<(NodeId, Direction)>> {
        if request.order_by.is_empty() {
            return Err(self.unsupported_pagination("ranking requires an order"));
        }
        request
            .order_by
            .iter()
            .map(|order| match ast.kind(*order) {
                NodeKind::OrderElement { expr, direction } => match ast.kind(*expr) {
                    NodeKind::ColumnAccess { .. } => Ok((*expr, *direction)),
                    _ => Err(MappingError::UnsupportedPaginationOrder(ast.describe(*expr)).into()),
                },
                _ => Err(RenderError::UnexpectedNode(ast.describe(*order)).into()),
            })
            .collect()
    }

    /// `SELECT c0, ... FROM (SELECT ..., DENSE_RANK() OVER (ORDER BY ...) AS __RANK ...) ranked
    ///  WHERE __RANK > skip AND __RANK <= skip + take ORDER BY __RANK`
    fn render_dense_rank(&mut self, ast: &Ast, request: &Request) -> Result<String> {
        let keys = self.rank_keys(ast, request)?;
        let mut order = Vec::with_capacity(keys.len());
        for (key, direction) in keys {
            let column = self.render(ast, key)?;
            order.push(match direction {
                Direction::Ascending => column,
                Direction::Descending => format!("{} DESC", column),
            });
        }
        let mut items = self.select_items(ast, request, true)?;
        let rank = self.quote(RANK_COLUMN);
        items.push(format!("DENSE_RANK() OVER (ORDER BY {}) AS {}", order.join(", "), rank));
        let inner = self.select_body(ast, request, &items, None)?;

        let outer: Vec<String> = request
            .select
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let column = format!("{}.{}", RANKED_ALIAS, self.quote(&format!("c{}", i)));
                match ast.select_info(*entry).and_then(|info| info.label.as_deref()) {
                    Some(label) => format!("{} AS {}", column, self.quote(label)),
                    None => column,
                }
            })
            .collect();
        let ranked = format!("{}.{}", RANKED_ALIAS, rank);
        let skip = request.skip.unwrap_or(0);
        let mut bounds = vec![format!("{} > {}", ranked, skip)];
        if let Some(take) = request.take {
            bounds.push(format!("{} <= {}", ranked, skip.saturating_add(take)));
        }
        Ok(format!(
            "SELECT {} FROM ({}) {} WHERE {} ORDER BY {}",
            outer.join(", "),
            inner,
            RANKED_ALIAS,
            bounds.join(" AND "),
            ranked
        ))
    }

    /// Rank = number of distinct elements strictly preceding the row in the
    /// requested order, counted by a correlated copy of the same request.
    fn render_correlated_rank(&mut self, ast: &Ast, request: &Request) -> Result<String> {
        if !request.group_by.is_empty() || request.distinct {
            return Err(self.unsupported_pagination("ranking grouped or distinct rows"));
        }
        let keys = self.rank_keys(ast, request)?;
        let element_id = request
            .select
            .iter()
            .filter_map(|entry| ast.select_info(*entry))
            .find(|info| info.starts_new_element)
            .map(|info| info.expr);

        let mut outer_keys = Vec::with_capacity(keys.len());
        for (key, _) in &keys {
            outer_keys.push(self.render(ast, *key)?);
        }
        let saved = self.alias_prefix.replace(RANK_PREFIX);
        let counted = self.rank_subquery(ast, request, &keys, &outer_keys, element_id);
        self.alias_prefix = saved;
        let counted = counted?;

        let skip = request.skip.unwrap_or(0);
        let bound = match request.take {
            Some(0) => "1 = 0".to_string(),
            Some(take) => format!(
                "{} BETWEEN {} AND {}",
                counted,
                skip,
                skip.saturating_add(take) - 1
            ),
            None => format!("{} >= {}", counted, skip),
        };
        let items = self.select_items(ast, request, false)?;
        let mut sql = self.select_body(ast, request, &items, Some(bound))?;
        sql.push_str(&self.order_clause(ast, request)?);
        Ok(sql)
    }

    fn rank_subquery(
        &mut self,
        ast: &Ast,
        request: &Request,
        keys: &[(NodeId, Direction)],
        outer_keys: &[String],
        element_id: Option<NodeId>,
    ) -> Result<String> {
        let count = match element_id {
            Some(id) => format!("COUNT(DISTINCT {})", self.render(ast, id)?),
            None => "COUNT(*)".to_string(),
        };
        let mut inner_keys = Vec::with_capacity(keys.len());
        for (key, _) in keys {
            inner_keys.push(self.render(ast, *key)?);
        }
        let mut alternatives = Vec::with_capacity(keys.len());
        for (i, (_, direction)) in keys.iter().enumerate() {
            let mut terms: Vec<String> = (0..i)
                .map(|j| format!("{} = {}", inner_keys[j], outer_keys[j]))
                .collect();
            let op = match direction {
                Direction::Ascending => "<",
                Direction::Descending => ">",
            };
            terms.push(format!("{} {} {}", inner_keys[i], op, outer_keys[i]));
            alternatives.push(format!("({})", terms.join(" AND ")));
        }
        let precedes = format!("({})", alternatives.join(" OR "));
        let body = self.select_body(
            ast,
            &Request {
                distinct: false,
                group_by: Vec::new(),
                having: None,
                ..request.clone()
            },
            &[count],
            Some(precedes),
        )?;
        Ok(format!("({})", body))
    }

    fn dml_target(&self, ast: &Ast, request: &Request) -> Result<(NodeId, String)> {
        let from = request.from.ok_or(RenderError::MissingFrom)?;
        match ast.alias(from).map(|a| &a.source) {
            Some(AliasSource::Table(table)) => Ok((from, self.quote(table))),
            _ => Err(RenderError::UnsupportedStatement {
                dialect: self.dialect.kind().to_string(),
                reason: format!("{:?} of a derived table", request.kind),
            }
            .into()),
        }
    }

    /// `WHERE` of an update or delete. Joined filters restrict by key instead.
    fn dml_condition(&mut self, ast: &Ast, from: NodeId, request: &Request) -> Result<String> {
        if request.joins.is_empty() {
            return match request.filter {
                Some(filter) => Ok(format!(" WHERE {}", self.render(ast, filter)?)),
                None => Ok(String::new()),
            };
        }
        let key = request.key_column.as_deref().ok_or_else(|| RenderError::UnsupportedStatement {
            dialect: self.dialect.kind().to_string(),
            reason: "joined update or delete without a key column".to_string(),
        })?;
        let qualifier = self.qualifiers.remove(&from);
        let selected = format!("{}.{}", self.alias_name(ast, from), self.quote(key));
        let sub = self.select_body(ast, request, &[selected], None);
        if let Some(qualifier) = qualifier {
            self.qualifiers.insert(from, qualifier);
        }
        let mut sub = sub?;
        if self.dialect.wraps_self_subquery() {
            sub = format!("SELECT {} FROM ({}) keyed", self.quote(key), sub);
        }
        Ok(format!(" WHERE {} IN ({})", self.quote(key), sub))
    }

    fn render_update(&mut self, ast: &Ast, request: &Request) -> Result<String> {
        let (from, table) = self.dml_target(ast, request)?;
        self.qualifiers.insert(from, table.clone());
        let result = self.update_body(ast, from, &table, request);
        self.qualifiers.remove(&from);
        result
    }

    fn update_body(
        &mut self,
        ast: &Ast,
        from: NodeId,
        table: &str,
        request: &Request,
    ) -> Result<String> {
        if request.assignments.is_empty() {
            return Err(RenderError::UnsupportedStatement {
                dialect: self.dialect.kind().to_string(),
                reason: "update without assignments".to_string(),
            }
            .into());
        }
        let mut sets = Vec::with_capacity(request.assignments.len());
        for assignment in &request.assignments {
            sets.push(self.render(ast, *assignment)?);
        }
        let condition = self.dml_condition(ast, from, request)?;
        Ok(format!("UPDATE {} SET {}{}", table, sets.join(", "), condition))
    }

    fn render_delete(&mut self, ast: &Ast, request: &Request) -> Result<String> {
        let (from, table) = self.dml_target(ast, request)?;
        self.qualifiers.insert(from, table.clone());
        let condition = self.dml_condition(ast, from, request);
        self.qualifiers.remove(&from);
        Ok(format!("DELETE FROM {}{}", table, condition?))
    }

    fn render_insert(&mut self, ast: &Ast, request: &Request) -> Result<String> {
        let target = request
            .target
            .as_deref()
            .ok_or(RenderError::MissingInsertTarget)?;
        let mut columns = Vec::with_capacity(request.assignments.len());
        let mut values = Vec::with_capacity(request.assignments.len());
        for assignment in &request.assignments {
            match ast.kind(*assignment) {
                NodeKind::UpdateOrInsertInfo { column, value } => {
                    columns.push(self.quote(column));
                    values.push(self.render(ast, *value)?);
                }
                _ => return Err(RenderError::UnexpectedNode(ast.describe(*assignment)).into()),
            }
        }
        let mut sql = format!("INSERT INTO {}", self.quote(target));
        match request.from {
            Some(_) if columns.is_empty() => {
                return Err(RenderError::UnsupportedStatement {
                    dialect: self.dialect.kind().to_string(),
                    reason: "insert-select without assignments".to_string(),
                }
                .into())
            }
            Some(_) => {
                let select = self.select_body(ast, request, &values, None)?;
                sql.push_str(&format!(" ({}) {}", columns.join(", "), select));
            }
            None if columns.is_empty() => {
                sql.push(' ');
                sql.push_str(self.dialect.empty_insert());
            }
            None => {
                sql.push_str(&format!(
                    " ({}) VALUES ({})",
                    columns.join(", "),
                    values.join(", ")
                ));
            }
        }
        if let Some(column) = &request.returning {
            if let Some(suffix) = self.dialect.returning(column) {
                sql.push_str(&suffix);
            }
        }
        Ok(sql)
    }
}

impl NodeVisitor for SqlRenderer<'_> {
    type Error = OrmError;

    fn visit_request(&mut self, ast: &Ast, id: NodeId, request: &Request) -> Result<()> {
        // Constants of a nested request are not select-list constants of the outer one.
        let saved = std::mem::replace(&mut self.in_select_list, false);
        let sql = match request.kind {
            StatementKind::Select => self.render_select(ast, id, request),
            StatementKind::Update => self.render_update(ast, request),
            StatementKind::Delete => self.render_delete(ast, request),
            StatementKind::Insert => self.render_insert(ast, request),
        };
        self.in_select_list = saved;
        self.stack.push(sql?);
        Ok(())
    }

    fn visit_alias(&mut self, ast: &Ast, id: NodeId, alias: &AliasDefinition) -> Result<()> {
        let name = self.alias_name(ast, id);
        let text = match &alias.source {
            AliasSource::Table(table) => format!("{} {}", self.quote(table), name),
            AliasSource::Subquery(_) => format!("({}) {}", self.pop(), name),
        };
        self.stack.push(text);
        Ok(())
    }

    fn visit_column(&mut self, ast: &Ast, _id: NodeId, alias: NodeId, column: &str) -> Result<()> {
        let text = format!("{}.{}", self.alias_name(ast, alias), self.quote(column));
        self.stack.push(text);
        Ok(())
    }

    fn visit_identifier(&mut self, _ast: &Ast, _id: NodeId, name: &str) -> Result<()> {
        self.stack.push(name.to_string());
        Ok(())
    }

    fn visit_constant(&mut self, _ast: &Ast, _id: NodeId, value: &Value) -> Result<()> {
        if value.is_null() {
            self.stack.push("NULL".to_string());
            return Ok(());
        }
        self.params.push(value.clone());
        let mut text = format!("{}{}{}", MARK, self.params.len(), MARK);
        if self.in_select_list {
            if let Some(cast) = self.dialect.select_constant_cast(value) {
                text.push_str(cast);
            }
        }
        self.stack.push(text);
        Ok(())
    }

    fn visit_binary(
        &mut self,
        ast: &Ast,
        _id: NodeId,
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    ) -> Result<()> {
        // Right operand was visited first, so the left one is on top.
        let left_sql = self.pop();
        let right_sql = self.pop();
        let is_null = |node: NodeId| matches!(ast.kind(node), NodeKind::Constant(Value::Null));
        let text = match op {
            BinaryOp::Eq | BinaryOp::Ne if is_null(left) || is_null(right) => {
                let operand = if is_null(right) { left_sql } else { right_sql };
                let not = if op == BinaryOp::Ne { "NOT " } else { "" };
                format!("{} IS {}NULL", operand, not)
            }
            BinaryOp::Concat => self.dialect.concat(&left_sql, &right_sql),
            op if op.is_comparison() => format!("{} {} {}", left_sql, op_symbol(op), right_sql),
            op => format!("({} {} {})", left_sql, op_symbol(op), right_sql),
        };
        self.stack.push(text);
        Ok(())
    }

    fn visit_unary(
        &mut self,
        _ast: &Ast,
        _id: NodeId,
        op: UnaryOp,
        _operand: NodeId,
    ) -> Result<()> {
        let operand = self.pop();
        let text = match op {
            UnaryOp::Not => format!("NOT ({})", operand),
            UnaryOp::Negate => format!("-({})", operand),
            UnaryOp::Exists => format!("EXISTS ({})", operand),
            UnaryOp::Subquery => format!("({})", operand),
            UnaryOp::Aggregate(func) => format!("{}({})", func.sql_name(), operand),
        };
        self.stack.push(text);
        Ok(())
    }

    fn visit_in(
        &mut self,
        _ast: &Ast,
        _id: NodeId,
        _operand: NodeId,
        values: &[NodeId],
    ) -> Result<()> {
        let values = self.pop_n(values.len());
        let operand = self.pop();
        self.stack
            .push(format!("{} IN ({})", operand, values.join(", ")));
        Ok(())
    }

    fn visit_conditional(&mut self, _ast: &Ast, _id: NodeId) -> Result<()> {
        let otherwise = self.pop();
        let then = self.pop();
        let condition = self.pop();
        self.stack.push(format!(
            "CASE WHEN {} THEN {} ELSE {} END",
            condition, then, otherwise
        ));
        Ok(())
    }

    fn visit_join(&mut self, _ast: &Ast, _id: NodeId, join: &Join) -> Result<()> {
        let condition = self.pop();
        let alias = self.pop();
        let kind = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        self.stack
            .push(format!("{} {} ON {}", kind, alias, condition));
        Ok(())
    }

    fn visit_order(&mut self, _ast: &Ast, _id: NodeId, direction: Direction) -> Result<()> {
        let expr = self.pop();
        self.stack.push(match direction {
            Direction::Ascending => expr,
            Direction::Descending => format!("{} DESC", expr),
        });
        Ok(())
    }

    fn visit_select_info(&mut self, _ast: &Ast, _id: NodeId, info: &SelectInfo) -> Result<()> {
        let expr = self.pop();
        let text = match &info.label {
            Some(label) => format!("{} AS {}", expr, self.quote(label)),
            None => expr,
        };
        self.stack.push(text);
        Ok(())
    }

    fn visit_assignment(&mut self, _ast: &Ast, _id: NodeId, column: &str) -> Result<()> {
        let value = self.pop();
        let text = format!("{} = {}", self.quote(column), value);
        self.stack.push(text);
        Ok(())
    }
}
