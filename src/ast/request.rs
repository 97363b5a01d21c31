//! Request mutators and alias resolution.
//!
//! Every mutator that attaches a node to a request also sets the node's parent
//! link, so the one-parent invariant holds at every step of translation.

use log::debug;
use std::collections::HashMap;

use crate::sql_generator::errors::RenderError;

use super::{
    AliasSource, Ast, BinaryOp, Direction, Join, JoinKind, NodeId, NodeKind, SelectInfo, Token,
};

impl Ast {
    fn with_request<R>(&mut self, request: NodeId, f: impl FnOnce(&mut super::Request) -> R) -> R {
        match self.request_mut(request) {
            Some(r) => f(r),
            None => panic!("node {} is not a request", request),
        }
    }

    pub(crate) fn set_from(&mut self, request: NodeId, alias: NodeId) {
        self.with_request(request, |r| r.from = Some(alias));
        self.set_parent(alias, Some(request));
    }

    /// Appends a join sharing count 1.
    pub(crate) fn push_join(
        &mut self,
        request: NodeId,
        alias: NodeId,
        condition: NodeId,
        kind: JoinKind,
        multiplies: bool,
    ) -> NodeId {
        let join = self.add(NodeKind::Join(Join {
            alias,
            condition,
            kind,
            shares: 1,
            multiplies,
        }));
        self.with_request(request, |r| r.joins.push(join));
        self.set_parent(join, Some(request));
        join
    }

    /// Another access reuses `join`.
    pub(crate) fn share_join(&mut self, join: NodeId) {
        if let Some(j) = self.join_mut(join) {
            j.shares += 1;
        }
    }

    /// Drops one share of `join`; at zero the join leaves its request.
    pub(crate) fn release_join(&mut self, join: NodeId) {
        let remaining = match self.join_mut(join) {
            Some(j) => {
                j.shares = j.shares.saturating_sub(1);
                j.shares
            }
            None => return,
        };
        if remaining == 0 {
            if let Some(owner) = self.parent(join) {
                self.with_request(owner, |r| r.joins.retain(|j| *j != join));
            }
            self.set_parent(join, None);
        }
    }

    /// ANDs `predicate` into the request's WHERE clause.
    pub(crate) fn and_where(&mut self, request: NodeId, predicate: NodeId) {
        let combined = match self.request(request).and_then(|r| r.filter) {
            Some(existing) => self.binary(BinaryOp::And, existing, predicate),
            None => predicate,
        };
        self.with_request(request, |r| r.filter = Some(combined));
        self.set_parent(combined, Some(request));
    }

    pub(crate) fn and_having(&mut self, request: NodeId, predicate: NodeId) {
        let combined = match self.request(request).and_then(|r| r.having) {
            Some(existing) => self.binary(BinaryOp::And, existing, predicate),
            None => predicate,
        };
        self.with_request(request, |r| r.having = Some(combined));
        self.set_parent(combined, Some(request));
    }

    pub(crate) fn push_group_by(&mut self, request: NodeId, expr: NodeId) {
        self.with_request(request, |r| r.group_by.push(expr));
        self.set_parent(expr, Some(request));
    }

    pub(crate) fn push_order(
        &mut self,
        request: NodeId,
        expr: NodeId,
        direction: Direction,
    ) -> NodeId {
        let order = self.add(NodeKind::OrderElement { expr, direction });
        self.with_request(request, |r| r.order_by.push(order));
        self.set_parent(order, Some(request));
        order
    }

    pub(crate) fn clear_order(&mut self, request: NodeId) {
        let removed = self.with_request(request, |r| std::mem::take(&mut r.order_by));
        for order in removed {
            self.set_parent(order, None);
        }
    }

    /// Appends a select entry and returns its column position.
    pub(crate) fn push_select(&mut self, request: NodeId, info: SelectInfo) -> usize {
        let node = self.add(NodeKind::SelectInfo(info));
        let position = self.with_request(request, |r| {
            r.select.push(node);
            r.select.len() - 1
        });
        self.set_parent(node, Some(request));
        position
    }

    pub(crate) fn push_assignment(
        &mut self,
        request: NodeId,
        column: impl Into<String>,
        value: NodeId,
    ) {
        let node = self.add(NodeKind::UpdateOrInsertInfo {
            column: column.into(),
            value,
        });
        self.with_request(request, |r| r.assignments.push(node));
        self.set_parent(node, Some(request));
    }

    /// Aliases declared directly by a request: its from alias, then its joins.
    pub fn request_aliases(&self, request: NodeId) -> Vec<NodeId> {
        let Some(r) = self.request(request) else {
            return Vec::new();
        };
        let mut aliases: Vec<NodeId> = r.from.into_iter().collect();
        aliases.extend(r.joins.iter().filter_map(|j| self.join(*j).map(|j| j.alias)));
        aliases
    }

    /// Alias whose equivalents contain `token`, searching `request` and then its
    /// ancestors so correlated sub-requests see outer bindings.
    pub fn get_alias_for(&self, request: NodeId, token: &Token) -> Option<NodeId> {
        let mut current = Some(request);
        while let Some(req) = current {
            let found = self.request_aliases(req).into_iter().find(|alias| {
                self.alias(*alias)
                    .map(|a| a.equivalents.contains(token))
                    .unwrap_or(false)
            });
            if found.is_some() {
                return found;
            }
            current = self.enclosing_request(req);
        }
        None
    }

    /// Join introducing `alias`, if the alias came from a join.
    pub fn join_of(&self, alias: NodeId) -> Option<NodeId> {
        self.parent(alias).filter(|p| self.join(*p).is_some())
    }

    /// True when any join of the request multiplies owner rows.
    pub fn has_multiplying_joins(&self, request: NodeId) -> bool {
        self.request(request)
            .map(|r| {
                r.joins
                    .iter()
                    .any(|j| self.join(*j).map(|j| j.multiplies).unwrap_or(false))
            })
            .unwrap_or(false)
    }

    /// Turns a join into a correlated sub-request bound by the join condition.
    ///
    /// The sub-request selects from a copy of the joined alias and filters on the
    /// join condition remapped onto that copy; outer aliases in the condition
    /// keep pointing at the outer request. The join loses one share and is removed
    /// at zero. The sub-request's parent is `request` until the caller embeds it.
    pub(crate) fn extract_join_to_sub_request(
        &mut self,
        request: NodeId,
        join: NodeId,
    ) -> Result<NodeId, RenderError> {
        let Some(Join {
            alias, condition, ..
        }) = self.join(join).cloned()
        else {
            return Err(RenderError::UnexpectedNode(self.describe(join)));
        };
        let (source, meta, name) = match self.alias(alias) {
            Some(def) => (def.source.clone(), def.meta, def.name.clone()),
            None => return Err(RenderError::UnexpectedNode(self.describe(alias))),
        };

        let sub = self.new_request(super::StatementKind::Select);
        self.set_parent(sub, Some(request));
        let source = match source {
            AliasSource::Subquery(inner) => {
                let mut remap = HashMap::new();
                AliasSource::Subquery(self.copy_subtree(inner, &mut remap))
            }
            table => table,
        };
        let copy = self.new_alias(source, meta);
        self.set_from(sub, copy);

        let mut remap = HashMap::from([(alias, copy)]);
        let bound = self.copy_subtree(condition, &mut remap);
        self.and_where(sub, bound);

        self.release_join(join);
        debug!(
            "extracted join {} ({}) into correlated sub-request {}",
            join, name, sub
        );
        Ok(sub)
    }
}
