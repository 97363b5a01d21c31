//! Relational statement graph
//!
//! Nodes live in an arena owned by [`Ast`] and are addressed by [`NodeId`]. Every
//! node keeps one non-owning parent link, maintained by the constructors and the
//! request mutators in [`request`]. Alias references held by `ColumnAccess` and
//! `Join` are plain ids, not ownership edges.

use std::fmt;

use crate::model::{EntityMeta, Value};

pub mod request;
pub mod visitor;

pub use visitor::NodeVisitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a query variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub u32);

/// What an alias stands for, from the query's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A query variable bound directly to the alias
    Var(VarId),
    /// A variable followed by a chain of navigation properties
    Navigation(VarId, Vec<&'static str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Like,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::Like
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateFn {
    pub fn sql_name(self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
            AggregateFn::Average => "AVG",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    /// `EXISTS (request)`
    Exists,
    /// Scalar `(request)`
    Subquery,
    Aggregate(AggregateFn),
}

/// One statement.
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: StatementKind,
    pub from: Option<NodeId>,
    pub joins: Vec<NodeId>,
    pub filter: Option<NodeId>,
    pub group_by: Vec<NodeId>,
    pub having: Option<NodeId>,
    pub order_by: Vec<NodeId>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    /// Scalar sub-requests fetching the first row only
    pub single_row: bool,
    pub distinct: bool,
    pub select: Vec<NodeId>,
    pub assignments: Vec<NodeId>,
    /// Table written by insert statements
    pub target: Option<String>,
    /// Column whose generated value an insert hands back
    pub returning: Option<String>,
    /// Id column of the table an update or delete writes
    pub key_column: Option<String>,
}

impl Request {
    pub fn new(kind: StatementKind) -> Self {
        Request {
            kind,
            from: None,
            joins: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            skip: None,
            take: None,
            single_row: false,
            distinct: false,
            select: Vec::new(),
            assignments: Vec::new(),
            target: None,
            returning: None,
            key_column: None,
        }
    }

    pub fn is_paginated(&self) -> bool {
        self.skip.is_some() || self.take.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum AliasSource {
    Table(String),
    Subquery(NodeId),
}

#[derive(Debug, Clone)]
pub struct AliasDefinition {
    pub name: String,
    pub source: AliasSource,
    /// Append-only
    pub equivalents: Vec<Token>,
    pub meta: Option<&'static EntityMeta>,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub alias: NodeId,
    pub condition: NodeId,
    pub kind: JoinKind,
    /// Number of accesses sharing this join
    pub shares: u32,
    /// Collection join: one owner row per member
    pub multiplies: bool,
}

/// Mapped property a select entry populates.
#[derive(Debug, Clone, Copy)]
pub struct PropertyRef {
    pub meta: &'static EntityMeta,
    pub field: usize,
}

/// Where a joined sub-object's column run attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOrigin {
    pub parent_run: usize,
    pub field: usize,
}

#[derive(Debug, Clone)]
pub struct SelectInfo {
    pub expr: NodeId,
    pub property: Option<PropertyRef>,
    pub starts_new_element: bool,
    pub origin: Option<SelectOrigin>,
    pub label: Option<String>,
}

impl SelectInfo {
    pub fn expr(expr: NodeId) -> Self {
        SelectInfo {
            expr,
            property: None,
            starts_new_element: false,
            origin: None,
            label: None,
        }
    }

    pub fn labeled(expr: NodeId, label: impl Into<String>) -> Self {
        SelectInfo {
            label: Some(label.into()),
            ..SelectInfo::expr(expr)
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Request(Request),
    AliasDefinition(AliasDefinition),
    ColumnAccess { alias: NodeId, column: String },
    Identifier(String),
    Constant(Value),
    Binary { op: BinaryOp, left: NodeId, right: NodeId },
    Unary { op: UnaryOp, operand: NodeId },
    In { operand: NodeId, values: Vec<NodeId> },
    Conditional { condition: NodeId, then: NodeId, otherwise: NodeId },
    Join(Join),
    OrderElement { expr: NodeId, direction: Direction },
    SelectInfo(SelectInfo),
    UpdateOrInsertInfo { column: String, value: NodeId },
}

impl NodeKind {
    /// Owned children in declared visit order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Request(r) => {
                let mut children = Vec::new();
                children.extend(r.select.iter().copied());
                children.extend(r.from);
                children.extend(r.joins.iter().copied());
                children.extend(r.filter);
                children.extend(r.group_by.iter().copied());
                children.extend(r.having);
                children.extend(r.order_by.iter().copied());
                children.extend(r.assignments.iter().copied());
                children
            }
            NodeKind::AliasDefinition(a) => match a.source {
                AliasSource::Subquery(sub) => vec![sub],
                AliasSource::Table(_) => Vec::new(),
            },
            NodeKind::Binary { left, right, .. } => vec![*right, *left],
            NodeKind::Unary { operand, .. } => vec![*operand],
            NodeKind::In { operand, values } => {
                let mut children = vec![*operand];
                children.extend(values.iter().copied());
                children
            }
            NodeKind::Conditional {
                condition,
                then,
                otherwise,
            } => vec![*condition, *then, *otherwise],
            NodeKind::Join(j) => vec![j.alias, j.condition],
            NodeKind::OrderElement { expr, .. } => vec![*expr],
            NodeKind::SelectInfo(s) => vec![s.expr],
            NodeKind::UpdateOrInsertInfo { value, .. } => vec![*value],
            NodeKind::ColumnAccess { .. } | NodeKind::Identifier(_) | NodeKind::Constant(_) => {
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

/// Arena of one statement graph. Each translation builds its own.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Node>,
    next_alias: usize,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a node and claims its children.
    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        let children = kind.children();
        self.nodes.push(Node { parent: None, kind });
        for child in children {
            self.set_parent(child, Some(id));
        }
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.0].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub(crate) fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        self.nodes[id.0].parent = parent;
    }

    pub fn request(&self, id: NodeId) -> Option<&Request> {
        match self.kind(id) {
            NodeKind::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn request_mut(&mut self, id: NodeId) -> Option<&mut Request> {
        match self.kind_mut(id) {
            NodeKind::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn alias(&self, id: NodeId) -> Option<&AliasDefinition> {
        match self.kind(id) {
            NodeKind::AliasDefinition(a) => Some(a),
            _ => None,
        }
    }

    pub fn join(&self, id: NodeId) -> Option<&Join> {
        match self.kind(id) {
            NodeKind::Join(j) => Some(j),
            _ => None,
        }
    }

    pub fn join_mut(&mut self, id: NodeId) -> Option<&mut Join> {
        match self.kind_mut(id) {
            NodeKind::Join(j) => Some(j),
            _ => None,
        }
    }

    pub fn select_info(&self, id: NodeId) -> Option<&SelectInfo> {
        match self.kind(id) {
            NodeKind::SelectInfo(s) => Some(s),
            _ => None,
        }
    }

    pub fn new_request(&mut self, kind: StatementKind) -> NodeId {
        self.add(NodeKind::Request(Request::new(kind)))
    }

    /// New alias named `a<n>`, unique within this arena.
    pub fn new_alias(&mut self, source: AliasSource, meta: Option<&'static EntityMeta>) -> NodeId {
        let name = format!("a{}", self.next_alias);
        self.next_alias += 1;
        self.add(NodeKind::AliasDefinition(AliasDefinition {
            name,
            source,
            equivalents: Vec::new(),
            meta,
        }))
    }

    pub fn add_equivalent(&mut self, alias: NodeId, token: Token) {
        if let NodeKind::AliasDefinition(a) = self.kind_mut(alias) {
            if !a.equivalents.contains(&token) {
                a.equivalents.push(token);
            }
        }
    }

    pub fn constant(&mut self, value: impl Into<Value>) -> NodeId {
        self.add(NodeKind::Constant(value.into()))
    }

    pub fn column(&mut self, alias: NodeId, column: impl Into<String>) -> NodeId {
        self.add(NodeKind::ColumnAccess {
            alias,
            column: column.into(),
        })
    }

    pub fn identifier(&mut self, name: impl Into<String>) -> NodeId {
        self.add(NodeKind::Identifier(name.into()))
    }

    pub fn binary(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> NodeId {
        self.add(NodeKind::Binary { op, left, right })
    }

    pub fn unary(&mut self, op: UnaryOp, operand: NodeId) -> NodeId {
        self.add(NodeKind::Unary { op, operand })
    }

    pub fn in_list(&mut self, operand: NodeId, values: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::In { operand, values })
    }

    pub fn conditional(&mut self, condition: NodeId, then: NodeId, otherwise: NodeId) -> NodeId {
        self.add(NodeKind::Conditional {
            condition,
            then,
            otherwise,
        })
    }

    /// First request found walking up from `node` (exclusive).
    pub fn enclosing_request(&self, node: NodeId) -> Option<NodeId> {
        let mut current = self.parent(node);
        while let Some(id) = current {
            if self.request(id).is_some() {
                return Some(id);
            }
            current = self.parent(id);
        }
        None
    }

    /// Deep copy of a subtree. Column accesses to aliases in `remap` are redirected;
    /// aliases defined inside the subtree get fresh names.
    pub fn copy_subtree(
        &mut self,
        node: NodeId,
        remap: &mut std::collections::HashMap<NodeId, NodeId>,
    ) -> NodeId {
        let kind = self.kind(node).clone();
        let copied = match kind {
            NodeKind::ColumnAccess { alias, column } => NodeKind::ColumnAccess {
                alias: remap.get(&alias).copied().unwrap_or(alias),
                column,
            },
            NodeKind::Identifier(_) | NodeKind::Constant(_) => kind,
            NodeKind::Binary { op, left, right } => NodeKind::Binary {
                op,
                left: self.copy_subtree(left, remap),
                right: self.copy_subtree(right, remap),
            },
            NodeKind::Unary { op, operand } => NodeKind::Unary {
                op,
                operand: self.copy_subtree(operand, remap),
            },
            NodeKind::In { operand, values } => NodeKind::In {
                operand: self.copy_subtree(operand, remap),
                values: values
                    .into_iter()
                    .map(|v| self.copy_subtree(v, remap))
                    .collect(),
            },
            NodeKind::Conditional {
                condition,
                then,
                otherwise,
            } => NodeKind::Conditional {
                condition: self.copy_subtree(condition, remap),
                then: self.copy_subtree(then, remap),
                otherwise: self.copy_subtree(otherwise, remap),
            },
            NodeKind::OrderElement { expr, direction } => NodeKind::OrderElement {
                expr: self.copy_subtree(expr, remap),
                direction,
            },
            NodeKind::SelectInfo(mut info) => {
                info.expr = self.copy_subtree(info.expr, remap);
                NodeKind::SelectInfo(info)
            }
            NodeKind::UpdateOrInsertInfo { column, value } => NodeKind::UpdateOrInsertInfo {
                column,
                value: self.copy_subtree(value, remap),
            },
            NodeKind::AliasDefinition(def) => {
                let source = match def.source {
                    AliasSource::Subquery(sub) => {
                        AliasSource::Subquery(self.copy_subtree(sub, remap))
                    }
                    table => table,
                };
                let copy = self.new_alias(source, def.meta);
                remap.insert(node, copy);
                return copy;
            }
            NodeKind::Join(join) => {
                let alias = self.copy_subtree(join.alias, remap);
                let condition = self.copy_subtree(join.condition, remap);
                NodeKind::Join(Join {
                    alias,
                    condition,
                    ..join
                })
            }
            NodeKind::Request(request) => {
                // Aliases first so every expression below sees the remapped names
                let from = request.from.map(|f| self.copy_subtree(f, remap));
                let joins: Vec<NodeId> = request
                    .joins
                    .iter()
                    .map(|j| self.copy_subtree(*j, remap))
                    .collect();
                let mut copy_all = |ast: &mut Ast, ids: &[NodeId]| -> Vec<NodeId> {
                    ids.iter().map(|id| ast.copy_subtree(*id, remap)).collect()
                };
                let select = copy_all(self, &request.select);
                let group_by = copy_all(self, &request.group_by);
                let order_by = copy_all(self, &request.order_by);
                let assignments = copy_all(self, &request.assignments);
                let filter = request.filter.map(|f| self.copy_subtree(f, remap));
                let having = request.having.map(|h| self.copy_subtree(h, remap));
                NodeKind::Request(Request {
                    from,
                    joins,
                    filter,
                    group_by,
                    having,
                    order_by,
                    select,
                    assignments,
                    ..request
                })
            }
        };
        self.add(copied)
    }

    /// Double dispatch into `visitor`.
    ///
    /// Expressions are visited post-order (binary operands right to left).
    /// Requests hand control to [`NodeVisitor::visit_request`], which visits its
    /// parts in textual order.
    pub fn accept<V: NodeVisitor + ?Sized>(
        &self,
        id: NodeId,
        visitor: &mut V,
    ) -> Result<(), V::Error> {
        match self.kind(id) {
            NodeKind::Request(request) => visitor.visit_request(self, id, request),
            NodeKind::AliasDefinition(alias) => {
                if let AliasSource::Subquery(sub) = alias.source {
                    self.accept(sub, visitor)?;
                }
                visitor.visit_alias(self, id, alias)
            }
            NodeKind::ColumnAccess { alias, column } => {
                visitor.visit_column(self, id, *alias, column)
            }
            NodeKind::Identifier(name) => visitor.visit_identifier(self, id, name),
            NodeKind::Constant(value) => visitor.visit_constant(self, id, value),
            NodeKind::Binary { op, left, right } => {
                self.accept(*right, visitor)?;
                self.accept(*left, visitor)?;
                visitor.visit_binary(self, id, *op, *left, *right)
            }
            NodeKind::Unary { op, operand } => {
                self.accept(*operand, visitor)?;
                visitor.visit_unary(self, id, *op, *operand)
            }
            NodeKind::In { operand, values } => {
                self.accept(*operand, visitor)?;
                for value in values {
                    self.accept(*value, visitor)?;
                }
                visitor.visit_in(self, id, *operand, values)
            }
            NodeKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                self.accept(*condition, visitor)?;
                self.accept(*then, visitor)?;
                self.accept(*otherwise, visitor)?;
                visitor.visit_conditional(self, id)
            }
            NodeKind::Join(join) => {
                self.accept(join.alias, visitor)?;
                self.accept(join.condition, visitor)?;
                visitor.visit_join(self, id, join)
            }
            NodeKind::OrderElement { expr, direction } => {
                self.accept(*expr, visitor)?;
                visitor.visit_order(self, id, *direction)
            }
            NodeKind::SelectInfo(info) => {
                self.accept(info.expr, visitor)?;
                visitor.visit_select_info(self, id, info)
            }
            NodeKind::UpdateOrInsertInfo { column, value } => {
                self.accept(*value, visitor)?;
                visitor.visit_assignment(self, id, column)
            }
        }
    }

    /// Compact s-expression of a subtree, for logs and assertions.
    pub fn describe(&self, id: NodeId) -> String {
        let mut printer = visitor::Printer::default();
        match self.accept(id, &mut printer) {
            Ok(()) => printer.finish(),
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_add_sets_parent_links() {
        let mut ast = Ast::new();
        let alias = ast.new_alias(AliasSource::Table("CUSTOMER".into()), None);
        let col = ast.column(alias, "NAME");
        let value = ast.constant("x");
        let eq = ast.binary(BinaryOp::Eq, col, value);
        assert_eq!(ast.parent(col), Some(eq));
        assert_eq!(ast.parent(value), Some(eq));
        assert_eq!(ast.parent(eq), None);
        // alias references are not ownership edges
        assert_eq!(ast.parent(alias), None);
    }

    #[test]
    fn test_alias_names_are_unique() {
        let mut ast = Ast::new();
        let a = ast.new_alias(AliasSource::Table("A".into()), None);
        let b = ast.new_alias(AliasSource::Table("B".into()), None);
        assert_eq!(ast.alias(a).unwrap().name, "a0");
        assert_eq!(ast.alias(b).unwrap().name, "a1");
    }

    #[test]
    fn test_copy_subtree_remaps_aliases() {
        let mut ast = Ast::new();
        let outer = ast.new_alias(AliasSource::Table("CUSTOMER".into()), None);
        let inner = ast.new_alias(AliasSource::Table("ORDER".into()), None);
        let fk = ast.column(inner, "FK_CUSTOMER");
        let id = ast.column(outer, "ID");
        let cond = ast.binary(BinaryOp::Eq, fk, id);

        let copy_alias = ast.new_alias(AliasSource::Table("ORDER".into()), None);
        let mut remap = HashMap::from([(inner, copy_alias)]);
        let copy = ast.copy_subtree(cond, &mut remap);

        assert_ne!(copy, cond);
        assert_eq!(ast.describe(copy), "(= a2.FK_CUSTOMER a0.ID)");
        assert_eq!(ast.describe(cond), "(= a1.FK_CUSTOMER a0.ID)");
    }

    #[test]
    fn test_enclosing_request() {
        let mut ast = Ast::new();
        let outer = ast.new_request(StatementKind::Select);
        let inner = ast.new_request(StatementKind::Select);
        let exists = ast.unary(UnaryOp::Exists, inner);
        ast.and_where(outer, exists);
        assert_eq!(ast.enclosing_request(inner), Some(outer));
        assert_eq!(ast.enclosing_request(outer), None);
    }
}
