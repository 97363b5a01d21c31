//! Position-keyed object snapshots

use super::reference_id;
use crate::errors::Result;
use crate::mapping::MappingPolicy;
use crate::model::{Entity, FieldRef, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotValue {
    Scalar(Value),
    /// Foreign id plus the loaded target, when there is one
    Reference {
        id: Option<Value>,
        target: Option<Box<Snapshot>>,
    },
    /// `None` when the collection was not loaded
    Collection(Option<Vec<Snapshot>>),
}

/// Field values of one object at the time it was tracked or last saved,
/// indexed by field position, with nested snapshots of loaded navigations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub fields: Vec<SnapshotValue>,
    /// Owner foreign keys written through a collection and not mapped on the object
    pub links: Vec<(String, Value)>,
}

impl Snapshot {
    pub fn take(entity: &dyn Entity, mapping: &dyn MappingPolicy) -> Result<Snapshot> {
        let mut path = Vec::new();
        capture(entity, mapping, &mut path)
    }

    pub fn with_links(mut self, links: Vec<(String, Value)>) -> Self {
        self.links = links;
        self
    }

    pub fn field(&self, index: usize) -> Option<&SnapshotValue> {
        self.fields.get(index)
    }

    /// Stored column value of a scalar or single-navigation field.
    pub fn column_value(&self, index: usize) -> Option<Value> {
        match self.field(index)? {
            SnapshotValue::Scalar(value) => Some(value.clone()),
            SnapshotValue::Reference { id, .. } => Some(id.clone().unwrap_or(Value::Null)),
            SnapshotValue::Collection(_) => None,
        }
    }

    pub fn link(&self, column: &str) -> Option<&Value> {
        self.links
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}

// `path` holds the objects being captured; a navigation back to one of them
// keeps only its id.
fn capture(
    entity: &dyn Entity,
    mapping: &dyn MappingPolicy,
    path: &mut Vec<usize>,
) -> Result<Snapshot> {
    path.push(entity.address());
    let meta = entity.meta();
    let mut fields = Vec::with_capacity(meta.fields.len());
    for field in &meta.fields {
        let value = match entity.field(field.index) {
            FieldRef::Scalar(value) => SnapshotValue::Scalar(value),
            FieldRef::Reference(slot) => {
                let id = reference_id(slot, mapping)?;
                let target = match slot.peek().flatten() {
                    Some(target) if !path.contains(&target.address()) => {
                        Some(Box::new(capture(target, mapping, path)?))
                    }
                    _ => None,
                };
                SnapshotValue::Reference { id, target }
            }
            FieldRef::Collection(slot) => match slot.peek() {
                Some(members) => {
                    let mut captured = Vec::with_capacity(members.len());
                    for member in members {
                        if !path.contains(&member.address()) {
                            captured.push(capture(member, mapping, path)?);
                        }
                    }
                    SnapshotValue::Collection(Some(captured))
                }
                None => SnapshotValue::Collection(None),
            },
        };
        fields.push(value);
    }
    path.pop();
    Ok(Snapshot {
        fields,
        links: Vec::new(),
    })
}
