//! Navigation joins
//!
//! Every navigation step is keyed by a [`Token::Navigation`] (variable plus
//! field path). A second access with the same token reuses the alias and bumps
//! the join's share count instead of adding a join. Joins created while
//! translating either side of an `OR` are LEFT joins so a missing related row
//! cannot eliminate the owner row.

use log::debug;

use crate::ast::{AliasSource, JoinKind, NodeId, Token};
use crate::errors::Result;
use crate::mapping::errors::MappingError;
use crate::mapping;
use crate::model::{EntityMeta, FieldDescriptor, FieldKind};
use crate::query::Var;

use super::errors::unsupported;
use super::Translator;

/// How an access uses a navigation join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum JoinUse {
    /// Predicate or scalar access: INNER, LEFT inside a disjunction
    Predicate,
    /// The element itself moves along the navigation: always INNER
    Required,
    /// Eager load: LEFT so owners without related rows survive
    Eager,
}

impl Translator<'_> {
    /// Alias bound to `var`, searched from the current request outwards.
    pub(super) fn var_alias(&self, var: Var) -> Result<NodeId> {
        self.ast
            .get_alias_for(self.current, &Token::Var(var.id()))
            .ok_or_else(|| unsupported(format!("variable {:?} is not in scope", var.id())).into())
    }

    pub(super) fn alias_meta(&self, alias: NodeId) -> Result<&'static EntityMeta> {
        self.ast
            .alias(alias)
            .and_then(|a| a.meta)
            .ok_or_else(|| unsupported(format!("alias {} is not bound to an entity", alias)).into())
    }

    /// Joins `owner_alias.field` into the current request, or reuses the join
    /// already registered for `token`. Returns the target alias and its join.
    pub(super) fn navigate(
        &mut self,
        owner_alias: NodeId,
        owner: &'static EntityMeta,
        field: &'static FieldDescriptor,
        token: Token,
        usage: JoinUse,
    ) -> Result<(NodeId, NodeId)> {
        if let Some(alias) = self.ast.get_alias_for(self.current, &token) {
            if let Some(join) = self.ast.join_of(alias) {
                self.ast.share_join(join);
                if usage == JoinUse::Required {
                    if let Some(j) = self.ast.join_mut(join) {
                        j.kind = JoinKind::Inner;
                    }
                }
                debug!("reusing join {} for {}.{}", join, owner.name, field.name);
                return Ok((alias, join));
            }
        }

        let nav = mapping::navigation_join(self.mapping, owner, field)?;
        let table = self.mapping.table_name(nav.target);
        let alias = self.ast.new_alias(AliasSource::Table(table), Some(nav.target));
        self.ast.add_equivalent(alias, token);
        let condition = mapping::join_condition(&mut self.ast, owner_alias, alias, &nav);
        let kind = match usage {
            JoinUse::Required => JoinKind::Inner,
            JoinUse::Eager => JoinKind::Left,
            JoinUse::Predicate if self.in_or => JoinKind::Left,
            JoinUse::Predicate => JoinKind::Inner,
        };
        let join = self
            .ast
            .push_join(self.current, alias, condition, kind, nav.collection);
        debug!(
            "joined {}.{} as {:?} join {}",
            owner.name, field.name, kind, join
        );
        Ok((alias, join))
    }

    /// Follows the single-navigation steps `names` from `var`, joining as needed.
    pub(super) fn follow_references(
        &mut self,
        var: Var,
        names: &[&'static str],
    ) -> Result<(NodeId, &'static EntityMeta)> {
        let mut alias = self.var_alias(var)?;
        let mut meta = self.alias_meta(alias)?;
        for (i, name) in names.iter().enumerate() {
            let field = mapping::field_of(meta, name)?;
            let target = match field.kind {
                FieldKind::Reference { target } => target(),
                FieldKind::Collection { .. } => {
                    return Err(unsupported(format!(
                        "collection navigation '{}' in scalar position",
                        name
                    ))
                    .into())
                }
                FieldKind::Scalar { .. } => {
                    return Err(MappingError::NotANavigation {
                        entity: meta.name.to_string(),
                        field: name.to_string(),
                    }
                    .into())
                }
            };
            let token = Token::Navigation(var.id(), names[..=i].to_vec());
            let (next, _) = self.navigate(alias, meta, field, token, JoinUse::Predicate)?;
            alias = next;
            meta = target;
        }
        Ok((alias, meta))
    }

    /// Walks `names` from `alias` with required (INNER) joins. Collection steps
    /// are only allowed when `many` is set, and then the last step must be one.
    pub(super) fn navigate_required(
        &mut self,
        mut alias: NodeId,
        mut meta: &'static EntityMeta,
        var: Var,
        names: &[&'static str],
        many: bool,
    ) -> Result<(NodeId, &'static EntityMeta)> {
        for (i, name) in names.iter().enumerate() {
            let field = mapping::field_of(meta, name)?;
            let last = i + 1 == names.len();
            let target = match field.kind {
                FieldKind::Reference { target } => {
                    if many && last {
                        return Err(MappingError::NotACollection {
                            entity: meta.name.to_string(),
                            field: name.to_string(),
                        }
                        .into());
                    }
                    target()
                }
                FieldKind::Collection { target } => {
                    if !many {
                        return Err(unsupported(format!(
                            "collection navigation '{}' in select_reference",
                            name
                        ))
                        .into());
                    }
                    target()
                }
                FieldKind::Scalar { .. } => {
                    return Err(MappingError::NotANavigation {
                        entity: meta.name.to_string(),
                        field: name.to_string(),
                    }
                    .into())
                }
            };
            let token = Token::Navigation(var.id(), names[..=i].to_vec());
            let (next, _) = self.navigate(alias, meta, field, token, JoinUse::Required)?;
            alias = next;
            meta = target;
        }
        Ok((alias, meta))
    }
}
