//! Domain model metadata
//!
//! Mapped domain types are plain structs registered with [`entity!`](crate::entity).
//! Registration produces an [`EntityMeta`]: one [`FieldDescriptor`] per mapped field,
//! each carrying a getter/setter pair that the rest of the engine uses instead of
//! reflection. Fields not listed in the registration are transient.
//!
//! ```ignore
//! #[derive(Debug, Clone, Default)]
//! pub struct Customer {
//!     pub id: i64,
//!     pub name: Option<String>,
//!     pub orders: Collection<Order>,
//! }
//! relgraph::entity!(Customer { id, name, orders(inverse = customer) });
//! ```

use std::any::{Any, TypeId};
use std::fmt;

pub mod errors;
pub mod navigation;
pub mod registry;
pub mod value;

pub use errors::DataError;
pub use navigation::{
    Collection, CollectionLoader, CollectionSlot, Reference, ReferenceLoader, ReferenceSlot,
};
pub use value::{IdKey, ScalarValue, Value, ValueType};

/// Object-safe view of a mapped domain object.
pub trait Entity: Any + fmt::Debug {
    fn meta(&self) -> &'static EntityMeta;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    fn clone_boxed(&self) -> Box<dyn Entity>;
}

/// Static side of a mapped domain type.
pub trait EntityType: Entity + Clone + Default + Sized {
    fn entity_meta() -> &'static EntityMeta;
}

pub type MetaFn = fn() -> &'static EntityMeta;
pub type FieldGetter = for<'a> fn(&'a dyn Entity) -> FieldRef<'a>;
pub type FieldSetter = for<'a> fn(&'a mut dyn Entity) -> FieldMut<'a>;

#[derive(Clone, Copy)]
pub enum FieldKind {
    Scalar { value_type: ValueType, nullable: bool },
    Reference { target: MetaFn },
    Collection { target: MetaFn },
}

impl FieldKind {
    pub fn target(&self) -> Option<&'static EntityMeta> {
        match self {
            FieldKind::Scalar { .. } => None,
            FieldKind::Reference { target } | FieldKind::Collection { target } => Some(target()),
        }
    }

    pub fn is_navigation(&self) -> bool {
        !matches!(self, FieldKind::Scalar { .. })
    }
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Scalar {
                value_type,
                nullable,
            } => write!(f, "Scalar({:?}, nullable={})", value_type, nullable),
            FieldKind::Reference { target } => write!(f, "Reference({})", target().name),
            FieldKind::Collection { target } => write!(f, "Collection({})", target().name),
        }
    }
}

/// Read access to one field.
pub enum FieldRef<'a> {
    Scalar(Value),
    Reference(&'a dyn ReferenceSlot),
    Collection(&'a dyn CollectionSlot),
}

/// Write access to one field.
pub enum FieldMut<'a> {
    Scalar(&'a mut dyn ScalarSlot),
    Reference(&'a mut dyn ReferenceSlot),
    Collection(&'a mut dyn CollectionSlot),
}

/// Type-erased scalar storage.
pub trait ScalarSlot {
    fn value(&self) -> Value;

    fn set_value(&mut self, value: Value) -> Result<(), DataError>;

    /// True when the slot holds its type's default (an unsaved id).
    fn is_default(&self) -> bool;
}

impl<T: ScalarValue> ScalarSlot for T {
    fn value(&self) -> Value {
        self.to_value()
    }

    fn set_value(&mut self, value: Value) -> Result<(), DataError> {
        *self = T::from_value(value)?;
        Ok(())
    }

    fn is_default(&self) -> bool {
        self.to_value() == T::default().to_value()
    }
}

/// Implemented by every type usable as a mapped field.
pub trait Field: 'static {
    fn kind() -> FieldKind;

    fn field_ref(&self) -> FieldRef<'_>;

    fn field_mut(&mut self) -> FieldMut<'_>;
}

impl<T: ScalarValue> Field for T {
    fn kind() -> FieldKind {
        FieldKind::Scalar {
            value_type: T::VALUE_TYPE,
            nullable: T::NULLABLE,
        }
    }

    fn field_ref(&self) -> FieldRef<'_> {
        FieldRef::Scalar(self.to_value())
    }

    fn field_mut(&mut self) -> FieldMut<'_> {
        FieldMut::Scalar(self)
    }
}

pub fn field_kind_of<F: Field>(_: &F) -> FieldKind {
    F::kind()
}

/// Compiled accessor for one mapped field.
#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub index: usize,
    pub kind: FieldKind,
    /// Explicit inverse property on the target of a collection navigation
    pub inverse: Option<&'static str>,
    /// Not stored; resolved through a fragment registered with the mapping policy
    pub computed: bool,
    pub get: FieldGetter,
    pub get_mut: FieldSetter,
}

impl FieldDescriptor {
    pub fn new(
        name: &'static str,
        kind: FieldKind,
        get: FieldGetter,
        get_mut: FieldSetter,
    ) -> Self {
        FieldDescriptor {
            name,
            index: 0,
            kind,
            inverse: None,
            computed: false,
            get,
            get_mut,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, FieldKind::Scalar { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FieldKind::Reference { .. })
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, FieldKind::Collection { .. })
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("inverse", &self.inverse)
            .field("computed", &self.computed)
            .finish()
    }
}

pub struct EntityMeta {
    pub name: &'static str,
    pub type_id: TypeId,
    pub fields: Vec<FieldDescriptor>,
    pub create: fn() -> Box<dyn Entity>,
}

fn create_default<T: EntityType>() -> Box<dyn Entity> {
    Box::new(T::default())
}

impl EntityMeta {
    pub fn new<T: EntityType>(name: &'static str, mut fields: Vec<FieldDescriptor>) -> Self {
        for (index, field) in fields.iter_mut().enumerate() {
            field.index = index;
        }
        EntityMeta {
            name,
            type_id: TypeId::of::<T>(),
            fields,
            create: create_default::<T>,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for EntityMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMeta")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish()
    }
}

impl PartialEq for EntityMeta {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl<'a> dyn Entity + 'a {
    pub fn field(&self, index: usize) -> FieldRef<'_> {
        let get = self.meta().fields[index].get;
        get(self)
    }

    pub fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
        let get_mut = self.meta().fields[index].get_mut;
        get_mut(self)
    }

    /// Current value of a scalar field; `None` for navigations.
    pub fn scalar(&self, index: usize) -> Option<Value> {
        match self.field(index) {
            FieldRef::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn downcast_ref<T: EntityType>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: EntityType>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Identity of this instance, used for visited sets.
    pub fn address(&self) -> usize {
        self as *const Self as *const () as usize
    }
}

/// Registers a struct as a mapped entity.
///
/// Listed fields are mapped; `(inverse = field)` names the inverse reference of a
/// collection navigation, `(computed)` marks a field resolved through a registered
/// AST fragment. The struct must implement `Debug`, `Clone` and `Default`.
#[macro_export]
macro_rules! entity {
    ($name:ident { $($field:ident $(( $($option:tt)+ ))?),* $(,)? }) => {
        impl $crate::model::Entity for $name {
            fn meta(&self) -> &'static $crate::model::EntityMeta {
                <$name as $crate::model::EntityType>::entity_meta()
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }

            fn into_any(
                self: ::std::boxed::Box<Self>,
            ) -> ::std::boxed::Box<dyn ::std::any::Any> {
                self
            }

            fn clone_boxed(&self) -> ::std::boxed::Box<dyn $crate::model::Entity> {
                ::std::boxed::Box::new(::std::clone::Clone::clone(self))
            }
        }

        impl $crate::model::EntityType for $name {
            fn entity_meta() -> &'static $crate::model::EntityMeta {
                $crate::model::registry::meta_of::<$name>(|| {
                    let sample = <$name as ::std::default::Default>::default();
                    let fields = ::std::vec![$(
                        {
                            fn get(
                                entity: &dyn $crate::model::Entity,
                            ) -> $crate::model::FieldRef<'_> {
                                match entity.as_any().downcast_ref::<$name>() {
                                    Some(this) => $crate::model::Field::field_ref(&this.$field),
                                    None => unreachable!(
                                        "accessor of {}.{} applied to another type",
                                        stringify!($name),
                                        stringify!($field)
                                    ),
                                }
                            }

                            fn get_mut(
                                entity: &mut dyn $crate::model::Entity,
                            ) -> $crate::model::FieldMut<'_> {
                                match entity.as_any_mut().downcast_mut::<$name>() {
                                    Some(this) => $crate::model::Field::field_mut(&mut this.$field),
                                    None => unreachable!(
                                        "accessor of {}.{} applied to another type",
                                        stringify!($name),
                                        stringify!($field)
                                    ),
                                }
                            }

                            #[allow(unused_mut)]
                            let mut descriptor = $crate::model::FieldDescriptor::new(
                                stringify!($field),
                                $crate::model::field_kind_of(&sample.$field),
                                get,
                                get_mut,
                            );
                            $($crate::entity!(@option descriptor; $($option)+);)?
                            descriptor
                        }
                    ),*];
                    $crate::model::EntityMeta::new::<$name>(stringify!($name), fields)
                })
            }
        }
    };
    (@option $descriptor:ident; inverse = $inverse:ident) => {
        $descriptor.inverse = Some(stringify!($inverse));
    };
    (@option $descriptor:ident; computed) => {
        $descriptor.computed = true;
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_model::{Customer, Order, OrderStatus};

    #[test]
    fn test_meta_lists_mapped_fields_in_order() {
        let meta = Customer::entity_meta();
        let names: Vec<&str> = meta.fields.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["id", "name", "rating", "address", "orders", "display_name"]);
        assert!(meta.field("scratch").is_none(), "unlisted fields are transient");
        assert!(meta.field("display_name").unwrap().computed);
        assert_eq!(meta.field("orders").unwrap().inverse, Some("customer"));
    }

    #[test]
    fn test_meta_is_cached() {
        let a = Customer::entity_meta() as *const EntityMeta;
        let b = Customer::entity_meta() as *const EntityMeta;
        assert_eq!(a, b);
    }

    #[test]
    fn test_accessors_read_and_write_scalars() {
        let mut order = Order {
            total: 10,
            ..Default::default()
        };
        let entity: &mut dyn Entity = &mut order;
        let total = entity.meta().field("total").unwrap().index;
        assert_eq!(entity.scalar(total), Some(Value::Int(10)));

        if let FieldMut::Scalar(slot) = entity.field_mut(total) {
            slot.set_value(Value::Int(25)).unwrap();
        }
        let status = entity.meta().field("status").unwrap().index;
        if let FieldMut::Scalar(slot) = entity.field_mut(status) {
            slot.set_value(Value::Int(1)).unwrap();
        }
        assert_eq!(order.total, 25);
        assert_eq!(order.status, OrderStatus::Shipped);
    }

    #[test]
    fn test_navigation_kinds_resolve_targets() {
        let meta = Order::entity_meta();
        let customer = meta.field("customer").unwrap();
        assert!(customer.is_reference());
        assert_eq!(customer.kind.target().unwrap().name, "Customer");
        assert!(meta.field("lines").unwrap().is_collection());
    }
}
