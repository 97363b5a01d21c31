//! Deferred loaders installed on unloaded navigations
//!
//! Every loader forwards the load subtree under its navigation to the query
//! it runs, so directives like `orders.lines` keep applying one level down.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use log::debug;

use super::{fetch_entities, restrict_to};
use crate::ast::Direction;
use crate::errors::Result;
use crate::execution::ExecutionContext;
use crate::mapping::errors::MappingError;
use crate::mapping::ForeignKey;
use crate::model::{
    CollectionLoader, DataError, Entity, EntityMeta, FieldDescriptor, FieldRef, IdKey,
    ReferenceLoader, Value,
};
use crate::query::{LoadTree, QueryDef, QueryOp};
use crate::translator::translate_query;

fn missing_row(meta: &EntityMeta, id: &Value) -> DataError {
    DataError::MissingRow {
        entity: meta.name.to_string(),
        id: id.to_string(),
    }
}

fn with_loads(mut def: QueryDef, loads: &LoadTree) -> QueryDef {
    if !loads.is_empty() {
        def.ops.push(QueryOp::LoadTree(loads.clone()));
    }
    def
}

/// Rows of `meta` whose id is one of `ids`.
fn fetch_by_ids(
    ctx: &Rc<ExecutionContext>,
    meta: &'static EntityMeta,
    ids: &[Value],
    loads: &LoadTree,
) -> Result<Vec<Box<dyn Entity>>> {
    let id_field = ctx.mapping().id_field(meta)?;
    let def = with_loads(QueryDef::by_ids(meta, id_field.name, ids.to_vec()), loads);
    let translation = translate_query(ctx.mapping(), &def)?;
    fetch_entities(ctx, &translation)
}

/// Members of `child` whose owning foreign key is one of `owners`, in id order.
fn fetch_by_owners(
    ctx: &Rc<ExecutionContext>,
    child: &'static EntityMeta,
    key: &ForeignKey,
    owners: &[Value],
    loads: &LoadTree,
) -> Result<Vec<Box<dyn Entity>>> {
    let id_field = ctx.mapping().id_field(child)?;
    let mut def = with_loads(QueryDef::new(child), loads);
    let order = def.var.field(id_field.name).expr();
    def.ops.push(QueryOp::OrderBy {
        key: order,
        direction: Direction::Ascending,
        then: false,
    });
    let mut translation = translate_query(ctx.mapping(), &def)?;
    restrict_to(&mut translation, &key.column, owners)?;
    fetch_entities(ctx, &translation)
}

fn collection_target(
    owner: &'static EntityMeta,
    field: &'static FieldDescriptor,
) -> Result<&'static EntityMeta, MappingError> {
    match field.kind.target() {
        Some(target) if field.is_collection() => Ok(target),
        _ => Err(MappingError::NotACollection {
            entity: owner.name.to_string(),
            field: field.name.to_string(),
        }),
    }
}

/// Lazy single navigation: one query by id on first access.
pub struct SingleLoader {
    ctx: Rc<ExecutionContext>,
    target: &'static EntityMeta,
    loads: LoadTree,
}

impl SingleLoader {
    pub fn new(ctx: Rc<ExecutionContext>, target: &'static EntityMeta, loads: LoadTree) -> Self {
        SingleLoader { ctx, target, loads }
    }
}

impl ReferenceLoader for SingleLoader {
    fn load(&self, id: &Value) -> Result<Box<dyn Entity>> {
        debug!("lazy load of {} {}", self.target.name, id);
        fetch_by_ids(&self.ctx, self.target, std::slice::from_ref(id), &self.loads)?
            .into_iter()
            .next()
            .ok_or_else(|| missing_row(self.target, id).into())
    }
}

/// Batch single navigation shared by every row of one query run. The first
/// access fetches all registered ids with `IN` lists of at most
/// `batch_size` ids; later accesses read the cache.
pub struct BatchLoader {
    ctx: Rc<ExecutionContext>,
    target: &'static EntityMeta,
    loads: LoadTree,
    registered: RefCell<HashSet<IdKey>>,
    pending: RefCell<Vec<Value>>,
    cache: RefCell<HashMap<IdKey, Box<dyn Entity>>>,
}

impl BatchLoader {
    pub fn new(ctx: Rc<ExecutionContext>, target: &'static EntityMeta, loads: LoadTree) -> Self {
        BatchLoader {
            ctx,
            target,
            loads,
            registered: RefCell::new(HashSet::new()),
            pending: RefCell::new(Vec::new()),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn register(&self, id: &Value) {
        if let Some(key) = id.id_key() {
            if self.registered.borrow_mut().insert(key) {
                self.pending.borrow_mut().push(id.clone());
            }
        }
    }

    fn fetch_pending(&self) -> Result<()> {
        let ids = std::mem::take(&mut *self.pending.borrow_mut());
        if ids.is_empty() {
            return Ok(());
        }
        let id_field = self.ctx.mapping().id_field(self.target)?;
        let chunk_size = self.ctx.config().batch_size.max(1);
        debug!(
            "batch load of {} {} ids in chunks of {}",
            ids.len(),
            self.target.name,
            chunk_size
        );
        for chunk in ids.chunks(chunk_size) {
            for entity in fetch_by_ids(&self.ctx, self.target, chunk, &self.loads)? {
                if let Some(key) = entity.scalar(id_field.index).and_then(|v| v.id_key()) {
                    self.cache.borrow_mut().insert(key, entity);
                }
            }
        }
        Ok(())
    }
}

impl ReferenceLoader for BatchLoader {
    fn load(&self, id: &Value) -> Result<Box<dyn Entity>> {
        let key = id.id_key().ok_or_else(|| DataError::NullIdentifier {
            entity: self.target.name.to_string(),
        })?;
        if let Some(entity) = self.cache.borrow().get(&key) {
            return Ok(entity.clone_boxed());
        }
        self.register(id);
        self.fetch_pending()?;
        self.cache
            .borrow()
            .get(&key)
            .map(|entity| entity.clone_boxed())
            .ok_or_else(|| missing_row(self.target, id).into())
    }
}

/// Lazy collection navigation: one query by owner id on first access.
pub struct CollectionFetch {
    ctx: Rc<ExecutionContext>,
    child: &'static EntityMeta,
    key: ForeignKey,
    loads: LoadTree,
}

impl CollectionFetch {
    pub fn new(
        ctx: Rc<ExecutionContext>,
        owner: &'static EntityMeta,
        field: &'static FieldDescriptor,
        loads: LoadTree,
    ) -> Result<Self> {
        let child = collection_target(owner, field)?;
        let key = ctx.mapping().collection_foreign_key(owner, field)?;
        Ok(CollectionFetch {
            ctx,
            child,
            key,
            loads,
        })
    }
}

impl CollectionLoader for CollectionFetch {
    fn load(&self, parent_id: &Value) -> Result<Vec<Box<dyn Entity>>> {
        debug!("lazy load of {} members owned by {}", self.child.name, parent_id);
        fetch_by_owners(
            &self.ctx,
            self.child,
            &self.key,
            std::slice::from_ref(parent_id),
            &self.loads,
        )
    }
}

/// Batch collection navigation: members of every registered owner in one
/// pass, grouped by the members' back reference.
pub struct BatchCollectionFetch {
    ctx: Rc<ExecutionContext>,
    child: &'static EntityMeta,
    key: ForeignKey,
    back_field: usize,
    loads: LoadTree,
    registered: RefCell<HashSet<IdKey>>,
    pending: RefCell<Vec<Value>>,
    fetched: RefCell<HashSet<IdKey>>,
    cache: RefCell<HashMap<IdKey, Vec<Box<dyn Entity>>>>,
}

impl BatchCollectionFetch {
    pub fn new(
        ctx: Rc<ExecutionContext>,
        owner: &'static EntityMeta,
        field: &'static FieldDescriptor,
        loads: LoadTree,
    ) -> Result<Self> {
        let child = collection_target(owner, field)?;
        let key = ctx.mapping().collection_foreign_key(owner, field)?;
        let back_field = key.child_field.ok_or_else(|| MappingError::NotANavigation {
            entity: child.name.to_string(),
            field: key.column.clone(),
        })?;
        Ok(BatchCollectionFetch {
            ctx,
            child,
            key,
            back_field,
            loads,
            registered: RefCell::new(HashSet::new()),
            pending: RefCell::new(Vec::new()),
            fetched: RefCell::new(HashSet::new()),
            cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn register(&self, owner_id: &Value) {
        if let Some(key) = owner_id.id_key() {
            if self.registered.borrow_mut().insert(key) {
                self.pending.borrow_mut().push(owner_id.clone());
            }
        }
    }

    /// Owner key of a member, read from its back reference.
    fn owner_key(&self, member: &dyn Entity) -> Result<Option<IdKey>> {
        let FieldRef::Reference(slot) = member.field(self.back_field) else {
            return Ok(None);
        };
        if let Some(id) = slot.pending_id() {
            return Ok(id.id_key());
        }
        let target_id = self.ctx.mapping().id_field(slot.target())?;
        Ok(slot
            .peek()
            .flatten()
            .and_then(|owner| owner.scalar(target_id.index))
            .and_then(|id| id.id_key()))
    }

    fn fetch_pending(&self) -> Result<()> {
        let owners = std::mem::take(&mut *self.pending.borrow_mut());
        if owners.is_empty() {
            return Ok(());
        }
        let chunk_size = self.ctx.config().batch_size.max(1);
        debug!(
            "batch load of {} members for {} owners",
            self.child.name,
            owners.len()
        );
        for chunk in owners.chunks(chunk_size) {
            let members = fetch_by_owners(&self.ctx, self.child, &self.key, chunk, &self.loads)?;
            let mut cache = self.cache.borrow_mut();
            for member in members {
                if let Some(owner) = self.owner_key(member.as_ref())? {
                    cache.entry(owner).or_default().push(member);
                }
            }
            let mut fetched = self.fetched.borrow_mut();
            fetched.extend(chunk.iter().filter_map(|id| id.id_key()));
        }
        Ok(())
    }
}

impl CollectionLoader for BatchCollectionFetch {
    fn load(&self, parent_id: &Value) -> Result<Vec<Box<dyn Entity>>> {
        let key = parent_id.id_key().ok_or_else(|| DataError::NullIdentifier {
            entity: self.child.name.to_string(),
        })?;
        if !self.fetched.borrow().contains(&key) {
            self.register(parent_id);
            self.fetch_pending()?;
        }
        Ok(self
            .cache
            .borrow()
            .get(&key)
            .map(|members| members.iter().map(|m| m.clone_boxed()).collect())
            .unwrap_or_default())
    }
}
