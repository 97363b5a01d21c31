//! Schema DDL
//!
//! Columns come from the mapping policy's column list: the id becomes the
//! identity primary key, scalars are `NOT NULL` unless nullable, single
//! navigations carry an inline `REFERENCES`. A collection navigation whose
//! foreign key the child does not map itself is added to the child table by a
//! deferred `ALTER TABLE`, since the child may not exist yet.

use log::debug;

use super::dialect::Dialect;
use crate::errors::Result;
use crate::mapping::{ColumnKind, MappingPolicy};
use crate::model::{EntityMeta, ValueType};

/// DDL of one entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDdl {
    pub create: String,
    /// `ALTER TABLE` statements on child tables, run after every create
    pub deferred: Vec<String>,
}

pub struct DdlRenderer<'a> {
    dialect: &'a dyn Dialect,
    mapping: &'a dyn MappingPolicy,
}

impl<'a> DdlRenderer<'a> {
    pub fn new(dialect: &'a dyn Dialect, mapping: &'a dyn MappingPolicy) -> Self {
        DdlRenderer { dialect, mapping }
    }

    fn id_type(&self, meta: &'static EntityMeta) -> Result<ValueType> {
        let columns = self.mapping.mapped_columns(meta)?;
        Ok(columns
            .iter()
            .find_map(|c| match c.kind {
                ColumnKind::Id { value_type } => Some(value_type),
                _ => None,
            })
            .unwrap_or(ValueType::Int))
    }

    fn references(&self, target: &'static EntityMeta) -> Result<String> {
        Ok(format!(
            "{} REFERENCES {} ({})",
            self.dialect.key_type(self.id_type(target)?),
            self.dialect.quote(&self.mapping.table_name(target)),
            self.dialect.quote(&self.mapping.id_column(target)?)
        ))
    }

    pub fn create_table(&self, meta: &'static EntityMeta) -> Result<TableDdl> {
        let table = self.dialect.quote(&self.mapping.table_name(meta));
        let mut definitions = Vec::new();
        for column in self.mapping.mapped_columns(meta)?.iter() {
            let name = self.dialect.quote(&column.column);
            definitions.push(match &column.kind {
                ColumnKind::Id { value_type } => self.dialect.identity_column(&name, *value_type),
                ColumnKind::Scalar {
                    value_type,
                    nullable,
                } => format!(
                    "{} {}{}",
                    name,
                    self.dialect.column_type(*value_type),
                    if *nullable { "" } else { " NOT NULL" }
                ),
                ColumnKind::ForeignKey { target } => {
                    format!("{} {}", name, self.references(*target)?)
                }
            });
        }

        let mut deferred = Vec::new();
        for field in meta.fields.iter().filter(|f| f.is_collection()) {
            let Some(child) = field.kind.target() else {
                continue;
            };
            let key = self.mapping.collection_foreign_key(meta, field)?;
            if key.child_field.is_some() {
                continue;
            }
            deferred.push(format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                self.dialect.quote(&self.mapping.table_name(child)),
                self.dialect.quote(&key.column),
                self.references(meta)?
            ));
        }

        Ok(TableDdl {
            create: format!("CREATE TABLE {} ({})", table, definitions.join(", ")),
            deferred,
        })
    }

    /// Every `CREATE TABLE`, referenced tables first where possible, followed by
    /// every deferred `ALTER TABLE`.
    pub fn schema(&self, metas: &[&'static EntityMeta]) -> Result<Vec<String>> {
        let ordered = self.creation_order(metas)?;
        let mut creates = Vec::with_capacity(ordered.len());
        let mut alters = Vec::new();
        for meta in ordered {
            let ddl = self.create_table(meta)?;
            creates.push(ddl.create);
            alters.extend(ddl.deferred);
        }
        debug!(
            "schema: {} tables, {} deferred foreign keys",
            creates.len(),
            alters.len()
        );
        creates.extend(alters);
        Ok(creates)
    }

    /// Depth-first order placing reference targets before their owners.
    /// Cycles keep registration order.
    fn creation_order(&self, metas: &[&'static EntityMeta]) -> Result<Vec<&'static EntityMeta>> {
        fn visit(
            ddl: &DdlRenderer<'_>,
            meta: &'static EntityMeta,
            metas: &[&'static EntityMeta],
            visiting: &mut Vec<&'static EntityMeta>,
            ordered: &mut Vec<&'static EntityMeta>,
        ) -> Result<()> {
            if ordered.contains(&meta) || visiting.contains(&meta) {
                return Ok(());
            }
            visiting.push(meta);
            for column in ddl.mapping.mapped_columns(meta)?.iter() {
                if let ColumnKind::ForeignKey { target } = column.kind {
                    if metas.contains(&target) {
                        visit(ddl, target, metas, visiting, ordered)?;
                    }
                }
            }
            visiting.pop();
            ordered.push(meta);
            Ok(())
        }

        let mut ordered = Vec::with_capacity(metas.len());
        let mut visiting = Vec::new();
        for meta in metas {
            visit(self, *meta, metas, &mut visiting, &mut ordered)?;
        }
        Ok(ordered)
    }
}
