//! Process-wide entity metadata registry
//!
//! Metadata is built once per type on first use and leaked, so every later lookup
//! hands out the same `&'static EntityMeta`. Entries are never invalidated.

use lazy_static::lazy_static;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{EntityMeta, EntityType};

lazy_static! {
    /// TypeId → compiled metadata of every registered entity type.
    static ref ENTITY_METAS: RwLock<HashMap<TypeId, &'static EntityMeta>> =
        RwLock::new(HashMap::new());
}

/// Metadata of `T`, building it with `describe` on first use.
///
/// `describe` runs outside the lock: building a type's descriptors may resolve
/// the metadata of other types (navigation targets) re-entrantly.
pub fn meta_of<T: EntityType>(describe: impl FnOnce() -> EntityMeta) -> &'static EntityMeta {
    let key = TypeId::of::<T>();
    {
        let registry = ENTITY_METAS.read().unwrap_or_else(|e| e.into_inner());
        if let Some(meta) = registry.get(&key) {
            return *meta;
        }
    }

    let built = describe();
    let mut registry = ENTITY_METAS.write().unwrap_or_else(|e| e.into_inner());
    // Another thread may have won the race; keep the first registration
    *registry
        .entry(key)
        .or_insert_with(|| Box::leak(Box::new(built)))
}

/// Every entity type registered so far, ordered by name.
pub fn registered() -> Vec<&'static EntityMeta> {
    let registry = ENTITY_METAS.read().unwrap_or_else(|e| e.into_inner());
    let mut metas: Vec<&'static EntityMeta> = registry.values().copied().collect();
    metas.sort_by_key(|m| m.name);
    metas
}
