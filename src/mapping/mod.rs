//! SQL mapping policy
//!
//! Resolves entity types and fields to tables, columns and join conditions.
//! [`ConventionMapping`] is the default policy:
//! - tables: type name in `SNAKE_CASE` upper (`OrderLine` → `ORDER_LINE`)
//! - scalar columns: field name in `SNAKE_CASE` upper
//! - single navigation columns: `FK_` + field name
//! - id property: the field named `id`
//! - collection foreign key: explicit inverse, else the child's only reference
//!   back to the owner type, else `FK_<OWNER_TABLE>` on the child table

use log::debug;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::ast::{Ast, BinaryOp, NodeId};
use crate::model::{EntityMeta, FieldDescriptor, FieldKind, ValueType};

pub mod errors;
pub mod naming;

use errors::MappingError;
pub use naming::to_snake_upper;

/// Hand-built resolved form of a computed property: receives the alias the
/// owning entity is bound to and returns the expression node.
pub type ComputedFragment = Arc<dyn Fn(&mut Ast, NodeId) -> NodeId + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    Id { value_type: ValueType },
    Scalar { value_type: ValueType, nullable: bool },
    ForeignKey { target: &'static EntityMeta },
}

/// One stored column of an entity table, in field order.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedColumn {
    pub field: usize,
    pub name: &'static str,
    pub column: String,
    pub kind: ColumnKind,
}

impl MappedColumn {
    pub fn is_id(&self) -> bool {
        matches!(self.kind, ColumnKind::Id { .. })
    }
}

/// Foreign key of a collection navigation, on the child table.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    /// Child reference field mapped to the same column, if any
    pub child_field: Option<usize>,
}

/// Join descriptor of one navigation step: `target.target_column = owner.owner_column`.
#[derive(Debug, Clone)]
pub struct NavigationJoin {
    pub target: &'static EntityMeta,
    pub owner_column: String,
    pub target_column: String,
    pub collection: bool,
}

pub trait MappingPolicy {
    fn table_name(&self, meta: &EntityMeta) -> String;

    /// Column of a scalar or single-navigation field.
    fn column_name(&self, meta: &EntityMeta, field: &FieldDescriptor) -> String;

    fn id_field(&self, meta: &'static EntityMeta) -> Result<&'static FieldDescriptor, MappingError>;

    fn collection_foreign_key(
        &self,
        owner: &'static EntityMeta,
        field: &'static FieldDescriptor,
    ) -> Result<ForeignKey, MappingError>;

    fn register_computed(
        &self,
        meta: &'static EntityMeta,
        field: &str,
        fragment: ComputedFragment,
    ) -> Result<(), MappingError>;

    fn computed_fragment(
        &self,
        meta: &EntityMeta,
        field: &FieldDescriptor,
    ) -> Option<ComputedFragment>;

    /// Stored columns of `meta`: id first, then scalars, then foreign keys.
    fn mapped_columns(
        &self,
        meta: &'static EntityMeta,
    ) -> Result<Arc<Vec<MappedColumn>>, MappingError>;

    fn id_column(&self, meta: &'static EntityMeta) -> Result<String, MappingError> {
        let id = self.id_field(meta)?;
        Ok(self.column_name(meta, id))
    }
}

pub fn field_of(
    meta: &'static EntityMeta,
    name: &str,
) -> Result<&'static FieldDescriptor, MappingError> {
    meta.field(name).ok_or_else(|| MappingError::UnknownField {
        entity: meta.name.to_string(),
        field: name.to_string(),
    })
}

/// Builds the column list of `meta` through `policy`.
pub fn build_mapped_columns(
    policy: &dyn MappingPolicy,
    meta: &'static EntityMeta,
) -> Result<Vec<MappedColumn>, MappingError> {
    let id = policy.id_field(meta)?;
    let id_type = match id.kind {
        FieldKind::Scalar { value_type, .. } => value_type,
        _ => return Err(MappingError::MissingIdProperty(meta.name.to_string())),
    };
    let mut columns = vec![MappedColumn {
        field: id.index,
        name: id.name,
        column: policy.column_name(meta, id),
        kind: ColumnKind::Id { value_type: id_type },
    }];
    for field in meta.fields.iter().filter(|f| f.index != id.index && !f.computed) {
        if let FieldKind::Scalar {
            value_type,
            nullable,
        } = field.kind
        {
            columns.push(MappedColumn {
                field: field.index,
                name: field.name,
                column: policy.column_name(meta, field),
                kind: ColumnKind::Scalar {
                    value_type,
                    nullable,
                },
            });
        }
    }
    for field in meta.fields.iter().filter(|f| !f.computed) {
        if let FieldKind::Reference { target } = field.kind {
            columns.push(MappedColumn {
                field: field.index,
                name: field.name,
                column: policy.column_name(meta, field),
                kind: ColumnKind::ForeignKey { target: target() },
            });
        }
    }
    Ok(columns)
}

/// Join descriptor for navigating `owner.field`.
pub fn navigation_join(
    policy: &dyn MappingPolicy,
    owner: &'static EntityMeta,
    field: &'static FieldDescriptor,
) -> Result<NavigationJoin, MappingError> {
    match field.kind {
        FieldKind::Reference { target } => {
            let target = target();
            Ok(NavigationJoin {
                target,
                owner_column: policy.column_name(owner, field),
                target_column: policy.id_column(target)?,
                collection: false,
            })
        }
        FieldKind::Collection { target } => {
            let target = target();
            let fk = policy.collection_foreign_key(owner, field)?;
            Ok(NavigationJoin {
                target,
                owner_column: policy.id_column(owner)?,
                target_column: fk.column,
                collection: true,
            })
        }
        FieldKind::Scalar { .. } => Err(MappingError::NotANavigation {
            entity: owner.name.to_string(),
            field: field.name.to_string(),
        }),
    }
}

/// `target_alias.target_column = owner_alias.owner_column`
pub fn join_condition(
    ast: &mut Ast,
    owner_alias: NodeId,
    target_alias: NodeId,
    join: &NavigationJoin,
) -> NodeId {
    let target = ast.column(target_alias, join.target_column.clone());
    let owner = ast.column(owner_alias, join.owner_column.clone());
    ast.binary(BinaryOp::Eq, target, owner)
}

/// Default naming conventions with a per-type column cache.
#[derive(Default)]
pub struct ConventionMapping {
    computed: RwLock<HashMap<(TypeId, &'static str), ComputedFragment>>,
    columns: RwLock<HashMap<TypeId, Arc<Vec<MappedColumn>>>>,
}

impl ConventionMapping {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MappingPolicy for ConventionMapping {
    fn table_name(&self, meta: &EntityMeta) -> String {
        to_snake_upper(meta.name)
    }

    fn column_name(&self, _meta: &EntityMeta, field: &FieldDescriptor) -> String {
        match field.kind {
            FieldKind::Reference { .. } => naming::foreign_key_column(field.name),
            _ => to_snake_upper(field.name),
        }
    }

    fn id_field(
        &self,
        meta: &'static EntityMeta,
    ) -> Result<&'static FieldDescriptor, MappingError> {
        meta.fields
            .iter()
            .find(|f| f.name == "id" && f.is_scalar())
            .ok_or_else(|| MappingError::MissingIdProperty(meta.name.to_string()))
    }

    fn collection_foreign_key(
        &self,
        owner: &'static EntityMeta,
        field: &'static FieldDescriptor,
    ) -> Result<ForeignKey, MappingError> {
        let child = match field.kind {
            FieldKind::Collection { target } => target(),
            _ => {
                return Err(MappingError::NotACollection {
                    entity: owner.name.to_string(),
                    field: field.name.to_string(),
                })
            }
        };

        if let Some(inverse) = field.inverse {
            let back = field_of(child, inverse)?;
            if !back.is_reference() {
                return Err(MappingError::NotANavigation {
                    entity: child.name.to_string(),
                    field: inverse.to_string(),
                });
            }
            return Ok(ForeignKey {
                column: self.column_name(child, back),
                child_field: Some(back.index),
            });
        }

        let backs: Vec<&FieldDescriptor> = child
            .fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Reference { target } if target() == owner))
            .collect();
        match backs.as_slice() {
            [back] => Ok(ForeignKey {
                column: self.column_name(child, back),
                child_field: Some(back.index),
            }),
            [] => Ok(ForeignKey {
                column: format!("FK_{}", self.table_name(owner)),
                child_field: None,
            }),
            _ => Err(MappingError::AmbiguousInverse {
                entity: owner.name.to_string(),
                field: field.name.to_string(),
                owner: owner.name.to_string(),
            }),
        }
    }

    fn register_computed(
        &self,
        meta: &'static EntityMeta,
        field: &str,
        fragment: ComputedFragment,
    ) -> Result<(), MappingError> {
        let descriptor = field_of(meta, field)?;
        let mut computed = self.computed.write().unwrap_or_else(|e| e.into_inner());
        computed.insert((meta.type_id, descriptor.name), fragment);
        debug!("registered computed fragment for {}.{}", meta.name, field);
        Ok(())
    }

    fn computed_fragment(
        &self,
        meta: &EntityMeta,
        field: &FieldDescriptor,
    ) -> Option<ComputedFragment> {
        let computed = self.computed.read().unwrap_or_else(|e| e.into_inner());
        computed.get(&(meta.type_id, field.name)).cloned()
    }

    fn mapped_columns(
        &self,
        meta: &'static EntityMeta,
    ) -> Result<Arc<Vec<MappedColumn>>, MappingError> {
        {
            let cache = self.columns.read().unwrap_or_else(|e| e.into_inner());
            if let Some(columns) = cache.get(&meta.type_id) {
                return Ok(Arc::clone(columns));
            }
        }
        let built = Arc::new(build_mapped_columns(self, meta)?);
        let mut cache = self.columns.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(cache.entry(meta.type_id).or_insert(built)))
    }
}
