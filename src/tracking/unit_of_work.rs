//! Transactional unit of work
//!
//! `save` queues an object graph; `commit` writes every queued graph inside
//! one transaction, depth first: single navigations before their owner (their
//! ids become its foreign keys), collection members after it with the owning
//! foreign key forced to the owner's id. An object with a default id is
//! inserted and receives the generated id; any other object is updated with
//! the columns that changed since its snapshot. Each object is written at
//! most once per commit.
//!
//! When anything fails the transaction is rolled back and the ids generated
//! during the commit are reset on the in-memory objects.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use log::{debug, info};

use super::{reference_id, walk, walk_mut, Snapshot};
use crate::ast::{AliasSource, Ast, BinaryOp, StatementKind};
use crate::errors::Result;
use crate::execution::{Connection, ExecutionContext, TransactionScope};
use crate::mapping::ColumnKind;
use crate::model::{DataError, Entity, EntityMeta, EntityType, FieldMut, FieldRef, Value};

/// Counts of what a commit wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl CommitSummary {
    pub fn statements(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

enum Operation<'a> {
    Save(&'a mut dyn Entity),
    Delete {
        meta: &'static EntityMeta,
        id: Value,
    },
}

pub struct UnitOfWork<'a> {
    ctx: Rc<ExecutionContext>,
    queue: Vec<Operation<'a>>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(ctx: Rc<ExecutionContext>) -> Self {
        UnitOfWork {
            ctx,
            queue: Vec::new(),
        }
    }

    /// Queues the graph rooted at `entity` for insert or update.
    pub fn save<T: EntityType>(&mut self, entity: &'a mut T) {
        self.queue.push(Operation::Save(entity));
    }

    pub fn save_dyn(&mut self, entity: &'a mut dyn Entity) {
        self.queue.push(Operation::Save(entity));
    }

    /// Queues a `DELETE` of the row behind `entity`.
    pub fn delete<T: EntityType>(&mut self, entity: &T) -> Result<()> {
        let meta = T::entity_meta();
        let id_field = self.ctx.mapping().id_field(meta)?;
        let id = (entity as &dyn Entity)
            .scalar(id_field.index)
            .filter(|id| id.id_key().is_some())
            .ok_or_else(|| DataError::NullIdentifier {
                entity: meta.name.to_string(),
            })?;
        self.queue.push(Operation::Delete { meta, id });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drops every queued operation without touching the database.
    pub fn rollback(&mut self) {
        self.queue.clear();
    }

    pub fn commit(&mut self) -> Result<CommitSummary> {
        let mut queue = std::mem::take(&mut self.queue);
        if queue.is_empty() {
            return Ok(CommitSummary::default());
        }

        let mut connection = self.ctx.open()?;
        let mut writer = GraphWriter::new(&self.ctx);
        let outcome = {
            let mut scope = TransactionScope::begin(connection.as_mut())?;
            match writer.run(scope.connection(), &mut queue) {
                Ok(()) => scope.commit(),
                Err(e) => Err(e),
            }
        };
        drop(connection);

        match outcome {
            Ok(()) => {
                writer.refresh_snapshots(&queue)?;
                info!(
                    "commit: {} inserted, {} updated, {} deleted",
                    writer.summary.inserted, writer.summary.updated, writer.summary.deleted
                );
                Ok(writer.summary)
            }
            Err(e) => {
                writer.restore_ids(&mut queue);
                Err(e)
            }
        }
    }
}

/// Foreign key a collection forces on its members.
struct OwnerLink {
    column: String,
    child_field: Option<usize>,
    owner_id: Value,
}

struct ColumnValue {
    column: String,
    field: Option<usize>,
    value: Value,
}

impl ColumnValue {
    fn changed_since(&self, snapshot: &Snapshot) -> bool {
        let previous = snapshot
            .link(&self.column)
            .cloned()
            .or_else(|| self.field.and_then(|field| snapshot.column_value(field)));
        previous.as_ref() != Some(&self.value)
    }
}

struct GraphWriter<'c> {
    ctx: &'c ExecutionContext,
    visited: HashSet<usize>,
    saved: HashSet<usize>,
    /// Previous id of every object inserted by this commit, by address
    generated: HashMap<usize, (usize, Value)>,
    links: HashMap<usize, Vec<(String, Value)>>,
    deleted: Vec<(&'static EntityMeta, Value)>,
    summary: CommitSummary,
}

impl<'c> GraphWriter<'c> {
    fn new(ctx: &'c ExecutionContext) -> Self {
        GraphWriter {
            ctx,
            visited: HashSet::new(),
            saved: HashSet::new(),
            generated: HashMap::new(),
            links: HashMap::new(),
            deleted: Vec::new(),
            summary: CommitSummary::default(),
        }
    }

    fn run(&mut self, conn: &mut dyn Connection, queue: &mut [Operation<'_>]) -> Result<()> {
        for operation in queue.iter_mut() {
            match operation {
                Operation::Save(entity) => self.save(conn, &mut **entity, None)?,
                Operation::Delete { meta, id } => self.delete(conn, *meta, id)?,
            }
        }
        Ok(())
    }

    fn save(
        &mut self,
        conn: &mut dyn Connection,
        entity: &mut dyn Entity,
        link: Option<OwnerLink>,
    ) -> Result<()> {
        let address = entity.address();
        if !self.visited.insert(address) {
            return Ok(());
        }
        let ctx = self.ctx;
        let mapping = ctx.mapping();
        let meta = entity.meta();
        let back_field = link.as_ref().and_then(|l| l.child_field);

        for field in meta.fields.iter().filter(|f| f.is_reference()) {
            // The owner is being written already
            if back_field == Some(field.index) {
                continue;
            }
            if let FieldMut::Reference(slot) = entity.field_mut(field.index) {
                if let Some(target) = slot.peek_mut() {
                    self.save(conn, target, None)?;
                }
            }
        }

        ctx.before_save(entity);
        let id_field = mapping.id_field(meta)?;
        let is_new = match entity.field_mut(id_field.index) {
            FieldMut::Scalar(slot) => slot.is_default(),
            _ => false,
        };
        let values = self.column_values(entity, link.as_ref())?;
        if is_new {
            self.insert(conn, entity, values)?;
        } else {
            self.update(conn, entity, values)?;
        }
        self.saved.insert(address);
        if let Some(link) = &link {
            self.links
                .insert(address, vec![(link.column.clone(), link.owner_id.clone())]);
        }
        ctx.after_save(entity);

        let owner_id = entity.scalar(id_field.index).unwrap_or(Value::Null);
        for field in meta.fields.iter().filter(|f| f.is_collection()) {
            let key = mapping.collection_foreign_key(meta, field)?;
            if let FieldMut::Collection(slot) = entity.field_mut(field.index) {
                for index in 0..slot.loaded_len() {
                    if let Some(member) = slot.item_mut(index) {
                        let link = OwnerLink {
                            column: key.column.clone(),
                            child_field: key.child_field,
                            owner_id: owner_id.clone(),
                        };
                        self.save(conn, member, Some(link))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Current values of every stored column but the id.
    fn column_values(
        &self,
        entity: &dyn Entity,
        link: Option<&OwnerLink>,
    ) -> Result<Vec<ColumnValue>> {
        let mapping = self.ctx.mapping();
        let mut values = Vec::new();
        for column in mapping.mapped_columns(entity.meta())?.iter() {
            let value = match column.kind {
                ColumnKind::Id { .. } => continue,
                ColumnKind::Scalar { .. } => entity.scalar(column.field).unwrap_or(Value::Null),
                ColumnKind::ForeignKey { .. } => match (link, entity.field(column.field)) {
                    (Some(link), _) if link.child_field == Some(column.field) => {
                        link.owner_id.clone()
                    }
                    (_, FieldRef::Reference(slot)) => {
                        reference_id(slot, mapping)?.unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                },
            };
            values.push(ColumnValue {
                column: column.column.clone(),
                field: Some(column.field),
                value,
            });
        }
        if let Some(link) = link.filter(|l| l.child_field.is_none()) {
            values.push(ColumnValue {
                column: link.column.clone(),
                field: None,
                value: link.owner_id.clone(),
            });
        }
        Ok(values)
    }

    fn insert(
        &mut self,
        conn: &mut dyn Connection,
        entity: &mut dyn Entity,
        values: Vec<ColumnValue>,
    ) -> Result<()> {
        let ctx = self.ctx;
        let mapping = ctx.mapping();
        let meta = entity.meta();
        let id_field = mapping.id_field(meta)?;
        let id_column = mapping.id_column(meta)?;

        let mut ast = Ast::new();
        let request = ast.new_request(StatementKind::Insert);
        for value in values {
            let constant = ast.constant(value.value);
            ast.push_assignment(request, value.column, constant);
        }
        if let Some(insert) = ast.request_mut(request) {
            insert.target = Some(mapping.table_name(meta));
            insert.returning = Some(id_column.clone());
        }
        let rendered = ctx.render_ast(&ast, request)?;

        let generated = if ctx.dialect().returning(&id_column).is_some() {
            conn.query_scalar(&rendered.sql, &rendered.params)?
        } else {
            conn.execute(&rendered.sql, &rendered.params)?;
            match ctx.dialect().generated_id_query() {
                Some(query) => conn.query_scalar(query, &[])?,
                None => Value::Null,
            }
        };
        if generated.is_null() {
            return Err(DataError::NullIdentifier {
                entity: meta.name.to_string(),
            }
            .into());
        }

        let previous = entity.scalar(id_field.index).unwrap_or(Value::Null);
        if let FieldMut::Scalar(slot) = entity.field_mut(id_field.index) {
            slot.set_value(generated.clone())?;
        }
        self.generated
            .insert(entity.address(), (id_field.index, previous));
        self.summary.inserted += 1;
        debug!("inserted {} {}", meta.name, generated);
        Ok(())
    }

    fn update(
        &mut self,
        conn: &mut dyn Connection,
        entity: &dyn Entity,
        values: Vec<ColumnValue>,
    ) -> Result<()> {
        let ctx = self.ctx;
        let mapping = ctx.mapping();
        let meta = entity.meta();
        let id_field = mapping.id_field(meta)?;
        let id = entity.scalar(id_field.index).unwrap_or(Value::Null);

        let changed: Vec<ColumnValue> = {
            let tracker = ctx.tracker().borrow();
            match id.id_key().and_then(|key| tracker.snapshot(meta, &key)) {
                Some(snapshot) => values
                    .into_iter()
                    .filter(|value| value.changed_since(snapshot))
                    .collect(),
                None => values,
            }
        };
        if changed.is_empty() {
            debug!("{} {} unchanged", meta.name, id);
            return Ok(());
        }

        let id_column = mapping.id_column(meta)?;
        let mut ast = Ast::new();
        let request = ast.new_request(StatementKind::Update);
        let alias = ast.new_alias(AliasSource::Table(mapping.table_name(meta)), Some(meta));
        ast.set_from(request, alias);
        for value in changed {
            let constant = ast.constant(value.value);
            ast.push_assignment(request, value.column, constant);
        }
        let key = ast.column(alias, id_column.clone());
        let id_value = ast.constant(id);
        let predicate = ast.binary(BinaryOp::Eq, key, id_value);
        ast.and_where(request, predicate);
        if let Some(update) = ast.request_mut(request) {
            update.key_column = Some(id_column);
        }
        let rendered = ctx.render_ast(&ast, request)?;
        conn.execute(&rendered.sql, &rendered.params)?;
        self.summary.updated += 1;
        Ok(())
    }

    fn delete(
        &mut self,
        conn: &mut dyn Connection,
        meta: &'static EntityMeta,
        id: &Value,
    ) -> Result<()> {
        let ctx = self.ctx;
        let mapping = ctx.mapping();
        let mut ast = Ast::new();
        let request = ast.new_request(StatementKind::Delete);
        let alias = ast.new_alias(AliasSource::Table(mapping.table_name(meta)), Some(meta));
        ast.set_from(request, alias);
        let id_column = mapping.id_column(meta)?;
        let key = ast.column(alias, id_column.clone());
        let id_value = ast.constant(id.clone());
        let predicate = ast.binary(BinaryOp::Eq, key, id_value);
        ast.and_where(request, predicate);
        if let Some(delete) = ast.request_mut(request) {
            delete.key_column = Some(id_column);
        }
        let rendered = ctx.render_ast(&ast, request)?;
        conn.execute(&rendered.sql, &rendered.params)?;
        self.deleted.push((meta, id.clone()));
        self.summary.deleted += 1;
        Ok(())
    }

    fn refresh_snapshots(&self, queue: &[Operation<'_>]) -> Result<()> {
        let mapping = self.ctx.mapping();
        let mut tracker = self.ctx.tracker().borrow_mut();
        for (meta, id) in &self.deleted {
            if let Some(key) = id.id_key() {
                tracker.forget(meta, &key);
            }
        }

        let mut seen = HashSet::new();
        for operation in queue {
            let Operation::Save(entity) = operation else {
                continue;
            };
            walk(&**entity, &mut seen, &mut |object| {
                if !self.saved.contains(&object.address()) {
                    return Ok(());
                }
                let meta = object.meta();
                let id_field = mapping.id_field(meta)?;
                if let Some(key) = object.scalar(id_field.index).and_then(|id| id.id_key()) {
                    let links = self.links.get(&object.address()).cloned().unwrap_or_default();
                    tracker.store(meta, key, Snapshot::take(object, mapping)?.with_links(links));
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn restore_ids(&self, queue: &mut [Operation<'_>]) {
        let mut seen = HashSet::new();
        for operation in queue.iter_mut() {
            let Operation::Save(entity) = operation else {
                continue;
            };
            walk_mut(&mut **entity, &mut seen, &mut |object| {
                let Some((field, previous)) = self.generated.get(&object.address()) else {
                    return;
                };
                if let FieldMut::Scalar(slot) = object.field_mut(*field) {
                    // The previous value came out of this slot
                    let _ = slot.set_value(previous.clone());
                }
            });
        }
        debug!("restored {} generated ids after rollback", self.generated.len());
    }
}
