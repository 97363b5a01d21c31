//! Entity select lists
//!
//! One column run per materialized object: the id (flagged as starting a new
//! element), the stored scalars, computed properties that have a fragment, the
//! foreign keys, then recursively one run per eager navigation. Materialization
//! reads runs strictly left to right.

use crate::ast::{Direction, NodeId, NodeKind, PropertyRef, SelectInfo, SelectOrigin, Token, VarId};
use crate::errors::Result;
use crate::mapping::{self, ColumnKind};
use crate::model::EntityMeta;
use crate::query::{LoadMode, LoadTree};

use super::navigation::JoinUse;
use super::{Scope, Translator};

impl Translator<'_> {
    pub(super) fn push_entity_select(&mut self, scope: &Scope) -> Result<()> {
        let mut runs = 0;
        self.push_run(
            scope.alias,
            scope.meta,
            &scope.loads,
            None,
            &mut runs,
            (scope.var.id(), Vec::new()),
        )?;
        if scope.paginated || self.ast.has_multiplying_joins(self.root) {
            self.push_id_tie_breaker(scope.alias, scope.meta)?;
        }
        Ok(())
    }

    fn push_run(
        &mut self,
        alias: NodeId,
        meta: &'static EntityMeta,
        loads: &LoadTree,
        origin: Option<SelectOrigin>,
        runs: &mut usize,
        path: (VarId, Vec<&'static str>),
    ) -> Result<()> {
        let run = *runs;
        *runs += 1;
        let request = self.root;

        let columns = self.mapping.mapped_columns(meta)?;
        let (keys, stored): (Vec<_>, Vec<_>) = columns
            .iter()
            .partition(|c| matches!(c.kind, ColumnKind::ForeignKey { .. }));
        for (i, column) in stored.iter().enumerate() {
            let expr = self.ast.column(alias, column.column.clone());
            self.ast.push_select(
                request,
                SelectInfo {
                    expr,
                    property: Some(PropertyRef {
                        meta,
                        field: column.field,
                    }),
                    starts_new_element: i == 0,
                    origin: if i == 0 { origin } else { None },
                    label: None,
                },
            );
        }
        for field in meta.fields.iter().filter(|f| f.computed) {
            // Computed properties without a fragment stay at their default.
            if let Some(fragment) = self.mapping.computed_fragment(meta, field) {
                let expr = fragment(&mut self.ast, alias);
                self.ast.push_select(
                    request,
                    SelectInfo {
                        property: Some(PropertyRef {
                            meta,
                            field: field.index,
                        }),
                        ..SelectInfo::expr(expr)
                    },
                );
            }
        }
        for column in keys {
            let expr = self.ast.column(alias, column.column.clone());
            self.ast.push_select(
                request,
                SelectInfo {
                    property: Some(PropertyRef {
                        meta,
                        field: column.field,
                    }),
                    ..SelectInfo::expr(expr)
                },
            );
        }

        for node in loads.children.iter().filter(|n| n.mode == LoadMode::Eager) {
            let field = mapping::field_of(meta, node.property)?;
            let Some(target) = field.kind.target() else {
                continue;
            };
            let mut child_path = path.1.clone();
            child_path.push(node.property);
            let token = Token::Navigation(path.0, child_path.clone());
            let (child_alias, _) = self.navigate(alias, meta, field, token, JoinUse::Eager)?;
            self.push_run(
                child_alias,
                target,
                &node.children,
                Some(SelectOrigin {
                    parent_run: run,
                    field: field.index,
                }),
                runs,
                (path.0, child_path),
            )?;
        }
        Ok(())
    }

    /// Appends `ORDER BY <element id>` unless the order already ends with it,
    /// keeping rows of one element contiguous.
    pub(super) fn push_id_tie_breaker(
        &mut self,
        alias: NodeId,
        meta: &'static EntityMeta,
    ) -> Result<()> {
        let id = self.mapping.id_column(meta)?;
        let last = self
            .ast
            .request(self.root)
            .and_then(|r| r.order_by.last().copied());
        let already = last
            .and_then(|order| match self.ast.kind(order) {
                NodeKind::OrderElement { expr, .. } => Some(*expr),
                _ => None,
            })
            .map(|expr| {
                matches!(self.ast.kind(expr),
                    NodeKind::ColumnAccess { alias: a, column } if *a == alias && *column == id)
            })
            .unwrap_or(false);
        if !already {
            let column = self.ast.column(alias, id);
            self.ast.push_order(self.root, column, Direction::Ascending);
        }
        Ok(())
    }
}
