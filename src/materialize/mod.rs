//! Object-graph materialization
//!
//! Rows of an entity query are read as column runs, one per object, in the
//! order the translator laid them out. A run starts at the entry flagged as
//! starting a new element (the object's id); its origin names the parent run
//! and the navigation field the object attaches to. Consecutive rows with the
//! same leading id build one root object. Collection members are
//! de-duplicated by id, since one member repeats across rows of deeper joins.
//!
//! Navigations that were not joined get wrapped according to their load
//! directive: a single-object loader for lazy, a shared per-run loader for
//! batch, nothing for undirected ones (reading those is a data error).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{BinaryOp, SelectOrigin};
use crate::errors::Result;
use crate::execution::ExecutionContext;
use crate::mapping::errors::MappingError;
use crate::model::{
    CollectionSlot, DataError, Entity, EntityMeta, FieldDescriptor, FieldMut, FieldRef, IdKey,
    ReferenceLoader, ReferenceSlot, Value,
};
use crate::query::{LoadMode, LoadTree};
use crate::translator::errors::unsupported;
use crate::translator::{ResultShape, Translation};

mod loaders;

pub use loaders::{BatchCollectionFetch, BatchLoader, CollectionFetch, SingleLoader};

/// Column run of one object within a row.
#[derive(Debug)]
struct Run {
    meta: &'static EntityMeta,
    origin: Option<SelectOrigin>,
    id_field: usize,
    id_position: usize,
    /// (row position, field index)
    columns: Vec<(usize, usize)>,
    loads: LoadTree,
}

pub struct Materializer {
    ctx: Rc<ExecutionContext>,
    runs: Vec<Run>,
    references: RefCell<HashMap<(usize, usize), Rc<BatchLoader>>>,
    collections: RefCell<HashMap<(usize, usize), Rc<BatchCollectionFetch>>>,
    roots: Vec<Box<dyn Entity>>,
    current: Option<IdKey>,
}

impl Materializer {
    pub fn new(ctx: Rc<ExecutionContext>, translation: &Translation) -> Result<Self> {
        if !matches!(translation.shape, ResultShape::Entities(_)) {
            return Err(unsupported("materializing rows that are not entities").into());
        }
        let request = translation
            .ast
            .request(translation.root)
            .ok_or_else(|| unsupported("translation root is not a request"))?;

        let mut runs: Vec<Run> = Vec::new();
        for (position, entry) in request.select.iter().enumerate() {
            let Some(info) = translation.ast.select_info(*entry) else {
                continue;
            };
            let Some(property) = info.property else {
                continue;
            };
            if info.starts_new_element {
                let loads = match info.origin {
                    None => translation.loads.clone(),
                    Some(origin) => {
                        let parent = runs
                            .get(origin.parent_run)
                            .ok_or_else(|| unsupported("object run before its parent"))?;
                        let name = parent.meta.fields[origin.field].name;
                        parent
                            .loads
                            .get(name)
                            .map(|node| node.children.clone())
                            .unwrap_or_default()
                    }
                };
                runs.push(Run {
                    meta: property.meta,
                    origin: info.origin,
                    id_field: property.field,
                    id_position: position,
                    columns: Vec::new(),
                    loads,
                });
            }
            let run = runs
                .last_mut()
                .ok_or_else(|| unsupported("select entry before the first object id"))?;
            run.columns.push((position, property.field));
        }
        if runs.is_empty() {
            return Err(unsupported("entity query without an object run").into());
        }

        Ok(Materializer {
            ctx,
            runs,
            references: RefCell::new(HashMap::new()),
            collections: RefCell::new(HashMap::new()),
            roots: Vec::new(),
            current: None,
        })
    }

    pub fn push_row(&mut self, row: &[Value]) -> Result<()> {
        let root_run = &self.runs[0];
        let key = column(row, root_run.id_position)?
            .id_key()
            .ok_or_else(|| DataError::NullIdentifier {
                entity: root_run.meta.name.to_string(),
            })?;
        if self.current.as_ref() != Some(&key) {
            let root = self.new_element(0, row)?;
            self.roots.push(root);
            self.current = Some(key);
        }
        if self.runs.len() == 1 {
            return Ok(());
        }

        let Some(mut root) = self.roots.pop() else {
            return Ok(());
        };
        let attached = self.attach_children(root.as_mut(), row);
        self.roots.push(root);
        attached
    }

    pub fn finish(self) -> Vec<Box<dyn Entity>> {
        self.roots
    }

    /// Locates or creates the object of every joined run in `row`.
    fn attach_children(&self, root: &mut dyn Entity, row: &[Value]) -> Result<()> {
        // Member index of each run's object within its parent navigation
        let mut located: Vec<Option<usize>> = vec![None; self.runs.len()];
        located[0] = Some(0);

        for (r, run) in self.runs.iter().enumerate().skip(1) {
            let Some(origin) = run.origin else {
                continue;
            };
            if located[origin.parent_run].is_none() {
                continue;
            }
            // Outer-joined navigation without a row
            let Some(key) = column(row, run.id_position)?.id_key() else {
                continue;
            };

            let existing = element(root, &self.runs, &located, origin.parent_run)
                .and_then(|parent| find_member(parent, origin.field, run.id_field, &key));
            let index = match existing {
                Some(index) => index,
                None => {
                    let child = self.new_element(r, row)?;
                    let parent = element_mut(root, &self.runs, &located, origin.parent_run)
                        .ok_or_else(|| unsupported("joined object without its parent"))?;
                    attach(parent, origin.field, child)?
                }
            };
            located[r] = Some(index);
        }
        Ok(())
    }

    fn new_element(&self, r: usize, row: &[Value]) -> Result<Box<dyn Entity>> {
        let run = &self.runs[r];
        let meta = run.meta;
        let mut entity = (meta.create)();

        for &(position, field) in &run.columns {
            let value = column(row, position)?.clone();
            let descriptor = &meta.fields[field];
            match entity.field_mut(field) {
                FieldMut::Scalar(slot) => {
                    slot.set_value(value).map_err(|e| match e {
                        DataError::UnexpectedNull => DataError::NullForNonNullable {
                            property: format!("{}.{}", meta.name, descriptor.name),
                        },
                        other => other,
                    })?;
                }
                FieldMut::Reference(slot) => self.bind_reference(r, descriptor, slot, value)?,
                FieldMut::Collection(_) => {}
            }
        }

        let id = column(row, run.id_position)?.clone();
        for descriptor in meta.fields.iter().filter(|f| f.is_collection()) {
            if let FieldMut::Collection(slot) = entity.field_mut(descriptor.index) {
                self.bind_collection(r, descriptor, slot, &id)?;
            }
        }
        Ok(entity)
    }

    fn bind_reference(
        &self,
        r: usize,
        descriptor: &'static FieldDescriptor,
        slot: &mut dyn ReferenceSlot,
        foreign_key: Value,
    ) -> Result<()> {
        if foreign_key.is_null() {
            slot.set_dyn(None)?;
            return Ok(());
        }
        let target = slot.target();
        match self.runs[r].loads.get(descriptor.name) {
            // Filled by the joined run
            Some(node) if node.mode == LoadMode::Eager => {}
            Some(node) if node.mode == LoadMode::Lazy => {
                let loader = SingleLoader::new(Rc::clone(&self.ctx), target, node.children.clone());
                slot.defer(foreign_key, Some(Rc::new(loader) as Rc<dyn ReferenceLoader>));
            }
            Some(node) => {
                let loader = Rc::clone(
                    self.references
                        .borrow_mut()
                        .entry((r, descriptor.index))
                        .or_insert_with(|| {
                            Rc::new(BatchLoader::new(
                                Rc::clone(&self.ctx),
                                target,
                                node.children.clone(),
                            ))
                        }),
                );
                loader.register(&foreign_key);
                slot.defer(foreign_key, Some(loader as Rc<dyn ReferenceLoader>));
            }
            None => slot.defer(foreign_key, None),
        }
        Ok(())
    }

    fn bind_collection(
        &self,
        r: usize,
        descriptor: &'static FieldDescriptor,
        slot: &mut dyn CollectionSlot,
        owner_id: &Value,
    ) -> Result<()> {
        let run = &self.runs[r];
        let Some(node) = run.loads.get(descriptor.name) else {
            slot.mark_unloaded();
            return Ok(());
        };
        match node.mode {
            LoadMode::Eager => slot.mark_loaded(),
            LoadMode::Lazy => {
                let fetch = CollectionFetch::new(
                    Rc::clone(&self.ctx),
                    run.meta,
                    descriptor,
                    node.children.clone(),
                )?;
                slot.defer(owner_id.clone(), Rc::new(fetch));
            }
            LoadMode::Batch => {
                let key = self.ctx.mapping().collection_foreign_key(run.meta, descriptor)?;
                if key.child_field.is_none() {
                    // Members cannot be grouped without a mapped back reference
                    let fetch = CollectionFetch::new(
                        Rc::clone(&self.ctx),
                        run.meta,
                        descriptor,
                        node.children.clone(),
                    )?;
                    slot.defer(owner_id.clone(), Rc::new(fetch));
                    return Ok(());
                }
                let fetch = {
                    let mut batches = self.collections.borrow_mut();
                    match batches.get(&(r, descriptor.index)) {
                        Some(fetch) => Rc::clone(fetch),
                        None => {
                            let fetch = Rc::new(BatchCollectionFetch::new(
                                Rc::clone(&self.ctx),
                                run.meta,
                                descriptor,
                                node.children.clone(),
                            )?);
                            batches.insert((r, descriptor.index), Rc::clone(&fetch));
                            fetch
                        }
                    }
                };
                fetch.register(owner_id);
                slot.defer(owner_id.clone(), fetch);
            }
        }
        Ok(())
    }
}

fn column(row: &[Value], position: usize) -> Result<&Value> {
    row.get(position).ok_or_else(|| {
        unsupported(format!(
            "row has {} columns, expected at least {}",
            row.len(),
            position + 1
        ))
        .into()
    })
}

fn id_key_of(entity: &dyn Entity, id_field: usize) -> Option<IdKey> {
    entity.scalar(id_field).and_then(|value| value.id_key())
}

fn find_member(parent: &dyn Entity, field: usize, id_field: usize, key: &IdKey) -> Option<usize> {
    match parent.field(field) {
        FieldRef::Reference(slot) => slot
            .peek()
            .flatten()
            .filter(|target| id_key_of(*target, id_field).as_ref() == Some(key))
            .map(|_| 0),
        FieldRef::Collection(slot) => slot
            .peek()?
            .iter()
            .position(|member| id_key_of(*member, id_field).as_ref() == Some(key)),
        FieldRef::Scalar(_) => None,
    }
}

fn attach(parent: &mut dyn Entity, field: usize, child: Box<dyn Entity>) -> Result<usize> {
    let meta = parent.meta();
    match parent.field_mut(field) {
        FieldMut::Reference(slot) => {
            slot.set_dyn(Some(child))?;
            Ok(0)
        }
        FieldMut::Collection(slot) => {
            slot.push_dyn(child)?;
            Ok(slot.loaded_len().saturating_sub(1))
        }
        FieldMut::Scalar(_) => Err(MappingError::NotANavigation {
            entity: meta.name.to_string(),
            field: meta.fields[field].name.to_string(),
        }
        .into()),
    }
}

/// Object of `run` in the current row, walking down from the root.
fn element<'e>(
    root: &'e dyn Entity,
    runs: &[Run],
    located: &[Option<usize>],
    run: usize,
) -> Option<&'e dyn Entity> {
    if run == 0 {
        return Some(root);
    }
    let origin = runs[run].origin?;
    let index = located[run]?;
    let parent = element(root, runs, located, origin.parent_run)?;
    match parent.field(origin.field) {
        FieldRef::Reference(slot) => slot.peek().flatten(),
        FieldRef::Collection(slot) => slot.peek()?.get(index).copied(),
        FieldRef::Scalar(_) => None,
    }
}

fn element_mut<'e>(
    root: &'e mut dyn Entity,
    runs: &[Run],
    located: &[Option<usize>],
    run: usize,
) -> Option<&'e mut dyn Entity> {
    if run == 0 {
        return Some(root);
    }
    let origin = runs[run].origin?;
    let index = located[run]?;
    let parent = element_mut(root, runs, located, origin.parent_run)?;
    match parent.field_mut(origin.field) {
        FieldMut::Reference(slot) => slot.peek_mut(),
        FieldMut::Collection(slot) => slot.item_mut(index),
        FieldMut::Scalar(_) => None,
    }
}

/// Adds `column IN (values)` on the root table of an entity translation.
pub(crate) fn restrict_to(
    translation: &mut Translation,
    column: &str,
    values: &[Value],
) -> Result<()> {
    let root = translation.root;
    let alias = translation
        .ast
        .request(root)
        .and_then(|request| request.from)
        .ok_or_else(|| unsupported("entity query without a root table"))?;
    let ast = &mut translation.ast;
    let target = ast.column(alias, column);
    let predicate = match values {
        [single] => {
            let value = ast.constant(single.clone());
            ast.binary(BinaryOp::Eq, target, value)
        }
        _ => {
            let constants = values.iter().map(|v| ast.constant(v.clone())).collect();
            ast.in_list(target, constants)
        }
    };
    ast.and_where(root, predicate);
    Ok(())
}

/// Runs an entity translation and materializes its rows.
pub fn fetch_entities(
    ctx: &Rc<ExecutionContext>,
    translation: &Translation,
) -> Result<Vec<Box<dyn Entity>>> {
    let rendered = ctx.render(translation)?;
    let mut materializer = Materializer::new(Rc::clone(ctx), translation)?;
    ctx.query(&rendered, &mut |row| materializer.push_row(row))?;
    Ok(materializer.finish())
}

#[cfg(test)]
mod tests;
