//! Change tracking and the unit of work
//!
//! A tracked object has a [`Snapshot`] keyed by its type and id. Saving an
//! object that already exists writes only the columns whose current value
//! differs from the snapshot; untracked existing objects are written in full.
//! Every successful commit refreshes the snapshots of what it wrote.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};

use log::debug;

use crate::errors::Result;
use crate::mapping::MappingPolicy;
use crate::model::{Entity, EntityMeta, FieldMut, FieldRef, IdKey, ReferenceSlot, Value};

pub mod snapshot;
pub mod unit_of_work;

pub use snapshot::{Snapshot, SnapshotValue};
pub use unit_of_work::{CommitSummary, UnitOfWork};

/// Foreign id a single navigation currently points at.
pub(crate) fn reference_id(
    slot: &dyn ReferenceSlot,
    mapping: &dyn MappingPolicy,
) -> Result<Option<Value>> {
    if let Some(id) = slot.pending_id() {
        return Ok(Some(id.clone()));
    }
    match slot.peek() {
        Some(Some(target)) => {
            let id_field = mapping.id_field(target.meta())?;
            Ok(target.scalar(id_field.index).filter(|id| !id.is_null()))
        }
        _ => Ok(None),
    }
}

/// Visits every loaded object of a graph once, parents first.
pub(crate) fn walk(
    entity: &dyn Entity,
    seen: &mut HashSet<usize>,
    visit: &mut dyn FnMut(&dyn Entity) -> Result<()>,
) -> Result<()> {
    if !seen.insert(entity.address()) {
        return Ok(());
    }
    visit(entity)?;
    for field in entity.meta().fields.iter().filter(|f| f.kind.is_navigation()) {
        match entity.field(field.index) {
            FieldRef::Reference(slot) => {
                if let Some(Some(target)) = slot.peek() {
                    walk(target, seen, visit)?;
                }
            }
            FieldRef::Collection(slot) => {
                for member in slot.peek().unwrap_or_default() {
                    walk(member, seen, visit)?;
                }
            }
            FieldRef::Scalar(_) => {}
        }
    }
    Ok(())
}

pub(crate) fn walk_mut(
    entity: &mut dyn Entity,
    seen: &mut HashSet<usize>,
    visit: &mut dyn FnMut(&mut dyn Entity),
) {
    if !seen.insert(entity.address()) {
        return;
    }
    visit(&mut *entity);
    let meta = entity.meta();
    for field in meta.fields.iter().filter(|f| f.kind.is_navigation()) {
        match entity.field_mut(field.index) {
            FieldMut::Reference(slot) => {
                if let Some(target) = slot.peek_mut() {
                    walk_mut(target, seen, visit);
                }
            }
            FieldMut::Collection(slot) => {
                for index in 0..slot.loaded_len() {
                    if let Some(member) = slot.item_mut(index) {
                        walk_mut(member, seen, visit);
                    }
                }
            }
            FieldMut::Scalar(_) => {}
        }
    }
}

/// Snapshots of tracked objects, keyed by type and id.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    snapshots: HashMap<(TypeId, IdKey), Snapshot>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots every loaded object of the graph that has an id; returns how many.
    pub fn track(&mut self, entity: &dyn Entity, mapping: &dyn MappingPolicy) -> Result<usize> {
        let mut tracked = 0;
        let mut seen = HashSet::new();
        walk(entity, &mut seen, &mut |object| {
            let meta = object.meta();
            let id_field = mapping.id_field(meta)?;
            if let Some(key) = object.scalar(id_field.index).and_then(|id| id.id_key()) {
                let snapshot = Snapshot::take(object, mapping)?;
                self.snapshots.insert((meta.type_id, key), snapshot);
                tracked += 1;
            }
            Ok(())
        })?;
        debug!("tracking {} objects from a {} graph", tracked, entity.meta().name);
        Ok(tracked)
    }

    pub fn snapshot(&self, meta: &EntityMeta, key: &IdKey) -> Option<&Snapshot> {
        self.snapshots.get(&(meta.type_id, key.clone()))
    }

    pub fn store(&mut self, meta: &EntityMeta, key: IdKey, snapshot: Snapshot) {
        self.snapshots.insert((meta.type_id, key), snapshot);
    }

    pub fn forget(&mut self, meta: &EntityMeta, key: &IdKey) {
        self.snapshots.remove(&(meta.type_id, key.clone()));
    }

    pub fn is_tracked(&self, meta: &EntityMeta, key: &IdKey) -> bool {
        self.snapshots.contains_key(&(meta.type_id, key.clone()))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
