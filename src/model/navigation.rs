//! Deferred-load navigation wrappers
//!
//! `Reference<T>` and `Collection<T>` are either loaded, or unloaded with the
//! key needed to fetch them plus the loader installed by materialization.
//! The first read of an unloaded wrapper fetches and transitions it in place.
//! Reading an unloaded wrapper with no loader is a data error, never an empty
//! value.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use super::errors::DataError;
use super::value::Value;
use super::{Entity, EntityMeta, EntityType, Field, FieldKind, FieldMut, FieldRef};
use crate::errors::Result;

/// Fetches one entity by id.
pub trait ReferenceLoader {
    fn load(&self, id: &Value) -> Result<Box<dyn Entity>>;
}

/// Fetches the members of a collection by the owner's id.
pub trait CollectionLoader {
    fn load(&self, parent_id: &Value) -> Result<Vec<Box<dyn Entity>>>;
}

pub(crate) fn downcast_entity<T: EntityType>(entity: Box<dyn Entity>) -> Result<Box<T>, DataError> {
    let found = entity.meta().name;
    entity
        .into_any()
        .downcast::<T>()
        .map_err(|_| DataError::EntityTypeMismatch {
            expected: T::entity_meta().name.to_string(),
            found: found.to_string(),
        })
}

#[derive(Clone)]
struct PendingReference {
    id: Value,
    loader: Option<Rc<dyn ReferenceLoader>>,
}

/// Single-valued navigation.
pub struct Reference<T> {
    cell: OnceCell<Option<Box<T>>>,
    pending: Option<PendingReference>,
}

impl<T> Default for Reference<T> {
    fn default() -> Self {
        Reference {
            cell: OnceCell::from(None),
            pending: None,
        }
    }
}

impl<T: Clone> Clone for Reference<T> {
    fn clone(&self) -> Self {
        Reference {
            cell: self.cell.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.cell.get(), &self.pending) {
            (Some(Some(value)), _) => f.debug_tuple("Loaded").field(value).finish(),
            (Some(None), _) => write!(f, "Empty"),
            (None, Some(pending)) => write!(f, "Unloaded({})", pending.id),
            (None, None) => write!(f, "Unloaded"),
        }
    }
}

impl<T: EntityType> Reference<T> {
    pub fn new(value: T) -> Self {
        Reference {
            cell: OnceCell::from(Some(Box::new(value))),
            pending: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Unloaded reference to the row with `id`.
    pub fn unloaded(id: Value, loader: Option<Rc<dyn ReferenceLoader>>) -> Self {
        Reference {
            cell: OnceCell::new(),
            pending: Some(PendingReference { id, loader }),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Foreign id of an unloaded reference.
    pub fn pending_id(&self) -> Option<&Value> {
        match self.cell.get() {
            Some(_) => None,
            None => self.pending.as_ref().map(|p| &p.id),
        }
    }

    /// Target of the reference, fetching it on first access.
    pub fn get(&self) -> Result<Option<&T>> {
        if let Some(loaded) = self.cell.get() {
            return Ok(loaded.as_deref());
        }
        let pending = self.pending.as_ref().ok_or_else(|| not_loaded::<T>())?;
        let loader = pending.loader.as_ref().ok_or_else(|| not_loaded::<T>())?;
        let entity = loader.load(&pending.id)?;
        let typed = downcast_entity::<T>(entity)?;
        let _ = self.cell.set(Some(typed));
        Ok(self.cell.get().and_then(|loaded| loaded.as_deref()))
    }

    pub fn get_mut(&mut self) -> Result<Option<&mut T>> {
        self.get()?;
        Ok(self.cell.get_mut().and_then(|loaded| loaded.as_deref_mut()))
    }

    pub fn set(&mut self, value: Option<T>) {
        self.cell = OnceCell::from(value.map(Box::new));
        self.pending = None;
    }
}

fn not_loaded<T: EntityType>() -> DataError {
    DataError::NotLoaded {
        entity: T::entity_meta().name.to_string(),
    }
}

/// Type-erased access to a `Reference<T>` field.
pub trait ReferenceSlot {
    fn target(&self) -> &'static EntityMeta;

    /// `None` when unloaded, `Some(None)` when loaded and empty.
    fn peek(&self) -> Option<Option<&dyn Entity>>;

    fn peek_mut(&mut self) -> Option<&mut dyn Entity>;

    fn pending_id(&self) -> Option<&Value>;

    fn load_dyn(&self) -> Result<Option<&dyn Entity>>;

    fn set_dyn(&mut self, value: Option<Box<dyn Entity>>) -> Result<(), DataError>;

    fn defer(&mut self, id: Value, loader: Option<Rc<dyn ReferenceLoader>>);
}

impl<T: EntityType> ReferenceSlot for Reference<T> {
    fn target(&self) -> &'static EntityMeta {
        T::entity_meta()
    }

    fn peek(&self) -> Option<Option<&dyn Entity>> {
        self.cell
            .get()
            .map(|loaded| loaded.as_deref().map(|t| t as &dyn Entity))
    }

    fn peek_mut(&mut self) -> Option<&mut dyn Entity> {
        self.cell
            .get_mut()
            .and_then(|loaded| loaded.as_deref_mut())
            .map(|t| t as &mut dyn Entity)
    }

    fn pending_id(&self) -> Option<&Value> {
        Reference::pending_id(self)
    }

    fn load_dyn(&self) -> Result<Option<&dyn Entity>> {
        Ok(self.get()?.map(|t| t as &dyn Entity))
    }

    fn set_dyn(&mut self, value: Option<Box<dyn Entity>>) -> Result<(), DataError> {
        let typed = match value {
            Some(entity) => Some(downcast_entity::<T>(entity)?),
            None => None,
        };
        self.cell = OnceCell::from(typed);
        self.pending = None;
        Ok(())
    }

    fn defer(&mut self, id: Value, loader: Option<Rc<dyn ReferenceLoader>>) {
        self.cell = OnceCell::new();
        self.pending = Some(PendingReference { id, loader });
    }
}

impl<T: EntityType> Field for Reference<T> {
    fn kind() -> FieldKind {
        FieldKind::Reference {
            target: <T as EntityType>::entity_meta,
        }
    }

    fn field_ref(&self) -> FieldRef<'_> {
        FieldRef::Reference(self)
    }

    fn field_mut(&mut self) -> FieldMut<'_> {
        FieldMut::Reference(self)
    }
}

#[derive(Clone)]
struct PendingCollection {
    parent_id: Value,
    loader: Rc<dyn CollectionLoader>,
}

/// Collection-valued navigation.
pub struct Collection<T> {
    cell: OnceCell<Vec<T>>,
    pending: Option<PendingCollection>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Collection {
            cell: OnceCell::from(Vec::new()),
            pending: None,
        }
    }
}

impl<T: Clone> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Collection {
            cell: self.cell.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(items) => f.debug_list().entries(items).finish(),
            None => write!(f, "Unloaded"),
        }
    }
}

impl<T: EntityType> Collection<T> {
    pub fn new(items: Vec<T>) -> Self {
        Collection {
            cell: OnceCell::from(items),
            pending: None,
        }
    }

    /// A collection that was never loaded and cannot load itself.
    pub fn not_loaded() -> Self {
        Collection {
            cell: OnceCell::new(),
            pending: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Members of the collection, fetching them on first access.
    pub fn get(&self) -> Result<&[T]> {
        if let Some(items) = self.cell.get() {
            return Ok(items);
        }
        let pending = self.pending.as_ref().ok_or_else(|| not_loaded::<T>())?;
        let typed = pending
            .loader
            .load(&pending.parent_id)?
            .into_iter()
            .map(|entity| downcast_entity::<T>(entity).map(|boxed| *boxed))
            .collect::<Result<Vec<T>, DataError>>()?;
        let _ = self.cell.set(typed);
        Ok(self.cell.get().map(Vec::as_slice).unwrap_or(&[]))
    }

    pub fn get_mut(&mut self) -> Result<&mut Vec<T>> {
        self.get()?;
        Ok(self.cell.get_mut().ok_or_else(|| not_loaded::<T>())?)
    }

    pub fn push(&mut self, item: T) -> Result<()> {
        self.get_mut()?.push(item);
        Ok(())
    }

    pub fn set(&mut self, items: Vec<T>) {
        self.cell = OnceCell::from(items);
        self.pending = None;
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.get()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.get()?.is_empty())
    }
}

/// Type-erased access to a `Collection<T>` field.
pub trait CollectionSlot {
    fn target(&self) -> &'static EntityMeta;

    fn is_loaded(&self) -> bool;

    /// Loaded members; `None` when unloaded.
    fn peek(&self) -> Option<Vec<&dyn Entity>>;

    fn item_mut(&mut self, index: usize) -> Option<&mut dyn Entity>;

    fn loaded_len(&self) -> usize;

    fn push_dyn(&mut self, item: Box<dyn Entity>) -> Result<(), DataError>;

    /// Turns an unloaded collection into a loaded empty one.
    fn mark_loaded(&mut self);

    /// Turns the collection into an unloaded one with no loader.
    fn mark_unloaded(&mut self);

    fn defer(&mut self, parent_id: Value, loader: Rc<dyn CollectionLoader>);
}

impl<T: EntityType> CollectionSlot for Collection<T> {
    fn target(&self) -> &'static EntityMeta {
        T::entity_meta()
    }

    fn is_loaded(&self) -> bool {
        Collection::is_loaded(self)
    }

    fn peek(&self) -> Option<Vec<&dyn Entity>> {
        self.cell
            .get()
            .map(|items| items.iter().map(|t| t as &dyn Entity).collect())
    }

    fn item_mut(&mut self, index: usize) -> Option<&mut dyn Entity> {
        self.cell
            .get_mut()
            .and_then(|items| items.get_mut(index))
            .map(|t| t as &mut dyn Entity)
    }

    fn loaded_len(&self) -> usize {
        self.cell.get().map(Vec::len).unwrap_or(0)
    }

    fn push_dyn(&mut self, item: Box<dyn Entity>) -> Result<(), DataError> {
        let typed = downcast_entity::<T>(item)?;
        self.mark_loaded();
        if let Some(items) = self.cell.get_mut() {
            items.push(*typed);
        }
        Ok(())
    }

    fn mark_loaded(&mut self) {
        if self.cell.get().is_none() {
            self.cell = OnceCell::from(Vec::new());
            self.pending = None;
        }
    }

    fn mark_unloaded(&mut self) {
        self.cell = OnceCell::new();
        self.pending = None;
    }

    fn defer(&mut self, parent_id: Value, loader: Rc<dyn CollectionLoader>) {
        self.cell = OnceCell::new();
        self.pending = Some(PendingCollection { parent_id, loader });
    }
}

impl<T: EntityType> Field for Collection<T> {
    fn kind() -> FieldKind {
        FieldKind::Collection {
            target: <T as EntityType>::entity_meta,
        }
    }

    fn field_ref(&self) -> FieldRef<'_> {
        FieldRef::Collection(self)
    }

    fn field_mut(&mut self) -> FieldMut<'_> {
        FieldMut::Collection(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OrmError;
    use crate::test_model::{Customer, Order};
    use std::cell::Cell;

    struct CountingLoader {
        calls: Cell<usize>,
        missing: bool,
    }

    impl ReferenceLoader for CountingLoader {
        fn load(&self, id: &Value) -> Result<Box<dyn Entity>> {
            self.calls.set(self.calls.get() + 1);
            if self.missing {
                return Err(DataError::MissingRow {
                    entity: "Customer".to_string(),
                    id: id.to_string(),
                }
                .into());
            }
            Ok(Box::new(Customer {
                id: id.as_i64().unwrap_or_default(),
                name: Some("loaded".to_string()),
                ..Default::default()
            }))
        }
    }

    #[test]
    fn test_reference_loads_once() {
        let loader = Rc::new(CountingLoader {
            calls: Cell::new(0),
            missing: false,
        });
        let reference: Reference<Customer> =
            Reference::unloaded(Value::Int(7), Some(loader.clone() as Rc<dyn ReferenceLoader>));
        assert!(!reference.is_loaded());
        assert_eq!(reference.get().unwrap().unwrap().id, 7);
        assert_eq!(reference.get().unwrap().unwrap().id, 7);
        assert_eq!(loader.calls.get(), 1);
    }

    #[test]
    fn test_reference_missing_row_is_data_error() {
        let loader = Rc::new(CountingLoader {
            calls: Cell::new(0),
            missing: true,
        });
        let reference: Reference<Customer> = Reference::unloaded(Value::Int(9), Some(loader));
        let err = reference.get().unwrap_err();
        assert!(err.is_data_error(), "unexpected error: {}", err);
    }

    #[test]
    fn test_reference_without_loader_is_not_loaded_error() {
        let reference: Reference<Customer> = Reference::unloaded(Value::Int(1), None);
        assert!(matches!(
            reference.get(),
            Err(OrmError::Data(DataError::NotLoaded { .. }))
        ));
    }

    #[test]
    fn test_collection_default_is_loaded_empty() {
        let orders: Collection<Order> = Collection::default();
        assert!(orders.is_loaded());
        assert!(orders.is_empty().unwrap());
        let unloaded: Collection<Order> = Collection::not_loaded();
        assert!(unloaded.get().is_err());
    }

    #[test]
    fn test_push_dyn_rejects_wrong_type() {
        let mut orders: Collection<Order> = Collection::default();
        let err = orders.push_dyn(Box::new(Customer::default())).unwrap_err();
        assert!(matches!(err, DataError::EntityTypeMismatch { .. }));
        orders.push_dyn(Box::new(Order::default())).unwrap();
        assert_eq!(orders.loaded_len(), 1);
    }
}
