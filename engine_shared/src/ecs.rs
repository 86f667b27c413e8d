//! Entity/component collaborator.
//!
//! The event system only needs a narrow view of entities: does the entity
//! still exist, does it hold a component of some type, and what is that
//! component's current value. That view is the [`ComponentStore`] trait.
//!
//! [`World`] is the in-process store used by the server and the tests. It is
//! not archetype-based; it keeps typed component storages keyed by entity id,
//! behind a lock so that handlers can add or remove components while an event
//! is being dispatched.

use std::{
    any::{Any, TypeId},
    collections::{HashMap, HashSet},
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use serde::{Deserialize, Serialize};

/// Opaque entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared, type-erased component value.
pub type ComponentValue = Arc<dyn Any + Send + Sync>;

/// Runtime identity of a component type.
#[derive(Clone, Copy)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
}

impl ComponentType {
    pub fn of<C: 'static>() -> Self {
        Self {
            id: TypeId::of::<C>(),
            name: std::any::type_name::<C>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Full type path, used for logging.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name.
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// What the event system needs to know about entities.
pub trait ComponentStore: Send + Sync {
    fn exists(&self, entity: EntityId) -> bool;
    fn has_component(&self, entity: EntityId, component: ComponentType) -> bool;
    fn get_component(&self, entity: EntityId, component: ComponentType) -> Option<ComponentValue>;
}

/// Handle to an entity in some [`ComponentStore`].
///
/// Two refs are equal when they point at the same id in the same store.
#[derive(Clone)]
pub struct EntityRef {
    id: EntityId,
    store: Arc<dyn ComponentStore>,
}

impl EntityRef {
    pub fn new(id: EntityId, store: Arc<dyn ComponentStore>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.store.exists(self.id)
    }

    pub fn has_component(&self, component: ComponentType) -> bool {
        self.store.has_component(self.id, component)
    }

    pub fn get_component(&self, component: ComponentType) -> Option<ComponentValue> {
        self.store.get_component(self.id, component)
    }

    /// Typed shorthand for [`EntityRef::has_component`].
    pub fn has<C: 'static>(&self) -> bool {
        self.has_component(ComponentType::of::<C>())
    }

    /// Typed shorthand for [`EntityRef::get_component`].
    pub fn get<C: Any + Send + Sync>(&self) -> Option<Arc<C>> {
        self.get_component(ComponentType::of::<C>())
            .and_then(|value| value.downcast::<C>().ok())
    }

    fn store_addr(&self) -> *const () {
        Arc::as_ptr(&self.store) as *const ()
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.store_addr() == other.store_addr()
    }
}

impl Eq for EntityRef {}

impl Hash for EntityRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({})", self.id)
    }
}

#[derive(Default)]
struct WorldData {
    alive: HashSet<EntityId>,
    storages: HashMap<TypeId, HashMap<EntityId, ComponentValue>>,
}

/// Simple world that stores typed components behind a lock.
///
/// The lock is only held for the duration of a single call, never while an
/// event handler runs.
#[derive(Default)]
pub struct World {
    next_id: AtomicU64,
    data: RwLock<WorldData>,
}

impl World {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn read(&self) -> RwLockReadGuard<'_, WorldData> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, WorldData> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates a new entity and returns a handle to it.
    pub fn spawn(self: &Arc<Self>) -> EntityRef {
        let id = EntityId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().alive.insert(id);
        self.entity(id)
    }

    /// Handle for an id, whether or not it is alive.
    pub fn entity(self: &Arc<Self>, id: EntityId) -> EntityRef {
        let store: Arc<dyn ComponentStore> = self.clone();
        EntityRef::new(id, store)
    }

    /// Removes an entity and all of its components. Returns false if it was
    /// already gone.
    pub fn destroy(&self, entity: EntityId) -> bool {
        let mut data = self.write();
        if !data.alive.remove(&entity) {
            return false;
        }
        for storage in data.storages.values_mut() {
            storage.remove(&entity);
        }
        true
    }

    /// Inserts/replaces a component for a live entity. Ignored for dead ids.
    pub fn insert<C: Any + Send + Sync>(&self, entity: EntityId, component: C) {
        let mut data = self.write();
        if !data.alive.contains(&entity) {
            return;
        }
        data.storages
            .entry(TypeId::of::<C>())
            .or_default()
            .insert(entity, Arc::new(component));
    }

    /// Removes a component, returning its last value.
    pub fn remove<C: Any + Send + Sync>(&self, entity: EntityId) -> Option<Arc<C>> {
        self.write()
            .storages
            .get_mut(&TypeId::of::<C>())
            .and_then(|storage| storage.remove(&entity))
            .and_then(|value| value.downcast::<C>().ok())
    }

    /// Gets a component.
    pub fn get<C: Any + Send + Sync>(&self, entity: EntityId) -> Option<Arc<C>> {
        self.get_component(entity, ComponentType::of::<C>())
            .and_then(|value| value.downcast::<C>().ok())
    }

    /// Applies `f` to a copy of the component and stores the result.
    pub fn update<C: Any + Send + Sync + Clone>(
        &self,
        entity: EntityId,
        f: impl FnOnce(&mut C),
    ) -> bool {
        let Some(current) = self.get::<C>(entity) else {
            return false;
        };
        let mut next = (*current).clone();
        f(&mut next);
        self.insert(entity, next);
        true
    }

    /// Iterates entities with a given component.
    pub fn iter<C: Any + Send + Sync>(&self) -> Vec<(EntityId, Arc<C>)> {
        let data = self.read();
        let mut out: Vec<_> = data
            .storages
            .get(&TypeId::of::<C>())
            .into_iter()
            .flat_map(|storage| storage.iter())
            .filter_map(|(id, value)| value.clone().downcast::<C>().ok().map(|c| (*id, c)))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    pub fn len(&self) -> usize {
        self.read().alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ComponentStore for World {
    fn exists(&self, entity: EntityId) -> bool {
        self.read().alive.contains(&entity)
    }

    fn has_component(&self, entity: EntityId, component: ComponentType) -> bool {
        self.read()
            .storages
            .get(&component.type_id())
            .is_some_and(|storage| storage.contains_key(&entity))
    }

    fn get_component(&self, entity: EntityId, component: ComponentType) -> Option<ComponentValue> {
        self.read()
            .storages
            .get(&component.type_id())
            .and_then(|storage| storage.get(&entity))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Health(i32);

    #[test]
    fn ecs_insert_and_get() {
        let world = World::new();
        let e = world.spawn();
        world.insert(e.id(), Health(10));
        assert_eq!(*world.get::<Health>(e.id()).unwrap(), Health(10));
        assert!(e.has::<Health>());
        assert_eq!(*e.get::<Health>().unwrap(), Health(10));
    }

    #[test]
    fn removed_component_is_no_longer_visible() {
        let world = World::new();
        let e = world.spawn();
        world.insert(e.id(), Health(3));
        assert_eq!(world.remove::<Health>(e.id()).as_deref(), Some(&Health(3)));
        assert!(!e.has::<Health>());
    }

    #[test]
    fn destroyed_entity_drops_components() {
        let world = World::new();
        let e = world.spawn();
        world.insert(e.id(), Health(1));
        assert!(world.destroy(e.id()));
        assert!(!e.exists());
        assert!(!e.has::<Health>());
        assert!(!world.destroy(e.id()));

        world.insert(e.id(), Health(2));
        assert!(!e.has::<Health>());
    }

    #[test]
    fn update_rewrites_value() {
        let world = World::new();
        let e = world.spawn();
        world.insert(e.id(), Health(5));
        assert!(world.update::<Health>(e.id(), |h| h.0 -= 2));
        assert_eq!(world.get::<Health>(e.id()).unwrap().0, 3);
    }

    #[test]
    fn refs_compare_by_store_and_id() {
        let a = World::new();
        let b = World::new();
        let ea = a.spawn();
        let eb = b.spawn();
        assert_eq!(ea.id(), eb.id());
        assert_ne!(ea, eb);
        assert_eq!(ea, a.entity(ea.id()));
    }
}
