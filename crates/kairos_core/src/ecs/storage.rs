//! # Component Storage
//!
//! One entity-to-value map per component type.
//!
//! - Each map is guarded by its own lock, so operations on different types
//!   never contend
//! - Maps are created lazily on first use and live as long as the registry
//! - Entries are added and removed as entities gain and lose components

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::component::{Component, ComponentId};
use super::entity::Entity;
use crate::error::{JobsError, JobsResult};

/// Storage for a single component type.
///
/// # Type Parameters
///
/// * `C` - The component type to store
///
/// # Example
///
/// ```rust,ignore
/// let storage = registry.storage::<Position>();
/// storage.add(entity, Position::new(1.0, 2.0, 3.0))?;
/// ```
pub struct ComponentStorage<C: Component> {
    entries: RwLock<HashMap<Entity, C>>,
}

impl<C: Component> ComponentStorage<C> {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a new entry.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::DuplicateComponent`] if `entity` already has an
    /// entry.
    pub fn add(&self, entity: Entity, component: C) -> JobsResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&entity) {
            return Err(JobsError::DuplicateComponent {
                entity,
                component: type_name::<C>(),
            });
        }
        entries.insert(entity, component);
        Ok(())
    }

    /// Removes and returns the entry of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingComponent`] if there is no entry.
    pub fn remove(&self, entity: Entity) -> JobsResult<C> {
        self.entries
            .write()
            .remove(&entity)
            .ok_or_else(|| Self::missing(entity))
    }

    /// Reads the entry of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingComponent`] if there is no entry.
    #[inline]
    pub fn get(&self, entity: Entity) -> JobsResult<C> {
        self.entries
            .read()
            .get(&entity)
            .copied()
            .ok_or_else(|| Self::missing(entity))
    }

    /// Overwrites the entry of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingComponent`] if there is no entry. `set`
    /// never creates entries; structural changes go through the world.
    #[inline]
    pub fn set(&self, entity: Entity, component: C) -> JobsResult<()> {
        match self.entries.write().get_mut(&entity) {
            Some(slot) => {
                *slot = component;
                Ok(())
            }
            None => Err(Self::missing(entity)),
        }
    }

    /// Applies `f` to the entry of `entity` in place.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingComponent`] if there is no entry.
    pub fn update<R>(&self, entity: Entity, f: impl FnOnce(&mut C) -> R) -> JobsResult<R> {
        match self.entries.write().get_mut(&entity) {
            Some(slot) => Ok(f(slot)),
            None => Err(Self::missing(entity)),
        }
    }

    /// Checks if `entity` has an entry.
    #[inline]
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.entries.read().contains_key(&entity)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Checks if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn missing(entity: Entity) -> JobsError {
        JobsError::MissingComponent {
            entity,
            component: type_name::<C>(),
        }
    }
}

impl<C: Component> Default for ComponentStorage<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view of a storage, used where the component type is only
/// known by id (despawn).
trait ErasedStorage: Send + Sync {
    fn discard(&self, entity: Entity) -> bool;
    fn contains_entity(&self, entity: Entity) -> bool;
}

impl<C: Component> ErasedStorage for ComponentStorage<C> {
    fn discard(&self, entity: Entity) -> bool {
        self.entries.write().remove(&entity).is_some()
    }

    fn contains_entity(&self, entity: Entity) -> bool {
        self.contains(entity)
    }
}

/// One registered storage: the typed handle plus its erased view.
struct StorageEntry {
    type_name: &'static str,
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedStorage>,
}

/// Collection of every component storage of a world.
pub struct StorageRegistry {
    storages: RwLock<HashMap<ComponentId, StorageEntry>>,
}

impl StorageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storages: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the storage of `C`, creating it on first use.
    ///
    /// The common path is a shared-lock lookup; the exclusive lock is taken
    /// only to create a missing storage, and the lookup is repeated under it.
    ///
    /// # Panics
    ///
    /// Panics if another component type already claimed `C::ID`.
    pub fn storage<C: Component>(&self) -> Arc<ComponentStorage<C>> {
        if let Some(entry) = self.storages.read().get(&C::ID) {
            return Self::downcast::<C>(entry);
        }

        let mut storages = self.storages.write();
        let entry = storages.entry(C::ID).or_insert_with(|| {
            let storage = Arc::new(ComponentStorage::<C>::new());
            StorageEntry {
                type_name: type_name::<C>(),
                typed: Arc::clone(&storage) as Arc<dyn Any + Send + Sync>,
                erased: storage,
            }
        });
        Self::downcast::<C>(entry)
    }

    /// Reads the `C` of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingComponent`] if there is no entry.
    #[inline]
    pub fn get<C: Component>(&self, entity: Entity) -> JobsResult<C> {
        self.storage::<C>().get(entity)
    }

    /// Overwrites the `C` of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingComponent`] if there is no entry.
    #[inline]
    pub fn set<C: Component>(&self, entity: Entity, component: C) -> JobsResult<()> {
        self.storage::<C>().set(entity, component)
    }

    /// Checks if `entity` has an entry for the type registered under `id`.
    #[must_use]
    pub fn contains_id(&self, id: ComponentId, entity: Entity) -> bool {
        self.storages
            .read()
            .get(&id)
            .is_some_and(|entry| entry.erased.contains_entity(entity))
    }

    /// Drops the entry of `entity` from the storage registered under `id`.
    ///
    /// Returns `false` if there was no such storage or entry.
    pub fn discard(&self, id: ComponentId, entity: Entity) -> bool {
        let erased = match self.storages.read().get(&id) {
            Some(entry) => Arc::clone(&entry.erased),
            None => return false,
        };
        erased.discard(entity)
    }

    /// Number of storages created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.storages.read().len()
    }

    /// Checks if no storage has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storages.read().is_empty()
    }

    fn downcast<C: Component>(entry: &StorageEntry) -> Arc<ComponentStorage<C>> {
        match Arc::clone(&entry.typed).downcast::<ComponentStorage<C>>() {
            Ok(storage) => storage,
            Err(_) => panic!(
                "component id {} is registered to {}, not {}",
                C::ID.raw(),
                entry.type_name,
                type_name::<C>()
            ),
        }
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
