//! # World
//!
//! The registry that owns entities, groups, component storages and systems.
//!
//! ## Locks
//!
//! - `groups`: the intern table, keyed by [`GroupKey`] with linear probing
//! - `entity_index`: entity to owning group
//! - `systems`: active and disabled systems
//!
//! Whenever `systems` and `groups` are both held, `systems` is taken first.
//! Group creation holds `systems` shared while it inserts and matches the new
//! group, and `add_system` holds it exclusively while it matches existing
//! groups, so every (system, group) pair is matched exactly once.
//!
//! ## Structural changes
//!
//! Adding or removing a component runs, in order: remove from the old group,
//! resolve the new group, write storage, update the index, append to the new
//! group. The sequence is not atomic to readers: a reader may briefly see the
//! entity in neither group, or see the new group before its storage entry.
//! Structural changes to one entity are serialized on a striped lock, so
//! concurrent callers never duplicate or lose it; changes to different
//! entities proceed in parallel.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use super::component::{normalize, Component, ComponentId, ComponentSet, GroupKey};
use super::entity::{Entity, EntityAllocator};
use super::group::EntityGroup;
use super::storage::{ComponentStorage, StorageRegistry};
use crate::error::{JobsError, JobsResult};
use crate::jobs::{System, SystemKind};

/// Number of per-entity structure lock stripes.
const STRUCTURE_STRIPES: usize = 64;

/// A registered system, held both typed (for lookup) and as a trait object.
struct RegisteredSystem {
    typed: Arc<dyn Any + Send + Sync>,
    system: Arc<dyn System>,
}

#[derive(Default)]
struct SystemRegistry {
    active: HashMap<SystemKind, RegisteredSystem>,
    disabled: HashMap<SystemKind, RegisteredSystem>,
}

impl SystemRegistry {
    fn contains(&self, kind: SystemKind) -> bool {
        self.active.contains_key(&kind) || self.disabled.contains_key(&kind)
    }

    fn find(&self, kind: SystemKind) -> Option<&RegisteredSystem> {
        self.active.get(&kind).or_else(|| self.disabled.get(&kind))
    }

    fn all(&self) -> impl Iterator<Item = &RegisteredSystem> {
        self.active.values().chain(self.disabled.values())
    }
}

/// Container for entities, their components and the systems that process
/// them.
///
/// Every method takes `&self`; a world is shared between threads behind an
/// `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// let world = World::new();
/// let entity = world.new_entity((Position::default(), Velocity::default()))?;
/// entity.add(&world, Health::new(100.0))?;
/// assert!(entity.has::<Health>(&world));
/// ```
pub struct World {
    allocator: EntityAllocator,
    storages: Arc<StorageRegistry>,
    groups: RwLock<HashMap<GroupKey, Arc<EntityGroup>>>,
    entity_index: RwLock<HashMap<Entity, Arc<EntityGroup>>>,
    systems: RwLock<SystemRegistry>,
    structure: Box<[Mutex<()>]>,
}

impl World {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allocator: EntityAllocator::new(),
            storages: Arc::new(StorageRegistry::new()),
            groups: RwLock::new(HashMap::new()),
            entity_index: RwLock::new(HashMap::new()),
            systems: RwLock::new(SystemRegistry::default()),
            structure: (0..STRUCTURE_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Creates an entity carrying `bundle`.
    ///
    /// Pass `()` for an entity with no components.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::DuplicateComponent`] if the bundle names the same
    /// component type twice. Nothing is left behind in that case.
    pub fn new_entity<B: ComponentSet>(&self, bundle: B) -> JobsResult<Entity> {
        let ids = B::component_ids();
        let entity = self.allocator.allocate();
        let group = self.group_for_components(&ids);

        if let Err(err) = bundle.insert_into(&self.storages, entity) {
            for id in &ids {
                self.storages.discard(*id, entity);
            }
            return Err(err);
        }

        self.entity_index.write().insert(entity, Arc::clone(&group));
        group.add_entity(entity);
        Ok(entity)
    }

    /// Removes `entity`, its group membership and every component it carries.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::UnknownEntity`] if the entity is not alive in
    /// this world.
    pub fn despawn(&self, entity: Entity) -> JobsResult<()> {
        let _structure = self.lock_structure(entity);
        let group = self
            .entity_index
            .write()
            .remove(&entity)
            .ok_or(JobsError::UnknownEntity(entity))?;
        group.remove_entity(entity);
        for id in group.types() {
            self.storages.discard(*id, entity);
        }
        Ok(())
    }

    /// Checks if `entity` is alive in this world.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.entity_index.read().contains_key(&entity)
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entity_index.read().len()
    }

    /// The group `entity` currently belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::UnknownEntity`] if the entity is not alive.
    pub fn group_of(&self, entity: Entity) -> JobsResult<Arc<EntityGroup>> {
        self.entity_index
            .read()
            .get(&entity)
            .cloned()
            .ok_or(JobsError::UnknownEntity(entity))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn lock_structure(&self, entity: Entity) -> MutexGuard<'_, ()> {
        self.structure[(entity.id() % STRUCTURE_STRIPES as u64) as usize].lock()
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Attaches `component` to `entity`, moving it to the matching group.
    ///
    /// # Errors
    ///
    /// - [`JobsError::UnknownEntity`] if the entity is not alive
    /// - [`JobsError::DuplicateComponent`] if it already carries a `C`
    pub fn add_component<C: Component>(&self, entity: Entity, component: C) -> JobsResult<()> {
        let _structure = self.lock_structure(entity);
        let old = self.group_of(entity)?;
        if old.contains_type(C::ID) {
            return Err(JobsError::DuplicateComponent {
                entity,
                component: type_name::<C>(),
            });
        }

        let mut types = old.types().to_vec();
        types.push(C::ID);

        old.remove_entity(entity);
        let new = self.group_for_components(&types);
        if let Err(err) = self.storages.storage::<C>().add(entity, component) {
            old.add_entity(entity);
            return Err(err);
        }
        self.entity_index.write().insert(entity, Arc::clone(&new));
        new.add_entity(entity);
        Ok(())
    }

    /// Detaches the `C` of `entity`, moving it to the matching group.
    ///
    /// Returns the removed value.
    ///
    /// # Errors
    ///
    /// - [`JobsError::UnknownEntity`] if the entity is not alive
    /// - [`JobsError::MissingComponent`] if it carries no `C`
    pub fn remove_component<C: Component>(&self, entity: Entity) -> JobsResult<C> {
        let _structure = self.lock_structure(entity);
        let old = self.group_of(entity)?;
        if !old.contains_type(C::ID) {
            return Err(JobsError::MissingComponent {
                entity,
                component: type_name::<C>(),
            });
        }

        let types: Vec<ComponentId> = old
            .types()
            .iter()
            .copied()
            .filter(|id| *id != C::ID)
            .collect();

        old.remove_entity(entity);
        let new = self.group_for_components(&types);
        let removed = match self.storages.storage::<C>().remove(entity) {
            Ok(value) => value,
            Err(err) => {
                old.add_entity(entity);
                return Err(err);
            }
        };
        self.entity_index.write().insert(entity, Arc::clone(&new));
        new.add_entity(entity);
        Ok(removed)
    }

    /// Overwrites the `C` of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingComponent`] if it carries no `C`.
    #[inline]
    pub fn set<C: Component>(&self, entity: Entity, component: C) -> JobsResult<()> {
        self.storages.set(entity, component)
    }

    /// Reads the `C` of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingComponent`] if it carries no `C`.
    #[inline]
    pub fn get<C: Component>(&self, entity: Entity) -> JobsResult<C> {
        self.storages.get(entity)
    }

    /// Checks if `entity` carries a `C`.
    #[inline]
    #[must_use]
    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        self.storages.storage::<C>().contains(entity)
    }

    /// The storage of `C`.
    #[must_use]
    pub fn storage<C: Component>(&self) -> Arc<ComponentStorage<C>> {
        self.storages.storage::<C>()
    }

    /// Every component storage of this world.
    #[must_use]
    pub fn storages(&self) -> &Arc<StorageRegistry> {
        &self.storages
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// Returns the group for a set of component types, creating it on first
    /// request.
    ///
    /// Order and repetition in `types` do not matter: equal sets always
    /// resolve to the same group instance. A new group is matched against
    /// every registered system before it is returned.
    pub fn group_for_components(&self, types: &[ComponentId]) -> Arc<EntityGroup> {
        let types = normalize(types);
        let key = GroupKey::of(&types);

        if let Ok(group) = Self::probe(&self.groups.read(), key, &types) {
            return group;
        }

        let systems = self.systems.read();
        let mut groups = self.groups.write();
        let slot = match Self::probe(&groups, key, &types) {
            Ok(group) => return group,
            Err(slot) => slot,
        };

        let group = Arc::new(EntityGroup::new(slot, types));
        groups.insert(slot, Arc::clone(&group));
        drop(groups);

        let mut matched = 0usize;
        for entry in systems.all() {
            if entry.system.accepts(&group) {
                entry.system.core().register_group(Arc::clone(&group));
                matched += 1;
            }
        }
        tracing::debug!(
            key = slot.raw(),
            types = group.types().len(),
            systems = matched,
            "entity group created"
        );
        group
    }

    /// Every group created so far.
    #[must_use]
    pub fn groups(&self) -> Vec<Arc<EntityGroup>> {
        self.groups.read().values().cloned().collect()
    }

    /// Number of groups created so far.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.read().len()
    }

    /// Runs every group's compaction to completion.
    pub fn flush(&self) {
        for group in self.groups() {
            group.flush();
        }
    }

    /// Finds `types` in the intern table, or the free slot it would occupy.
    fn probe(
        groups: &HashMap<GroupKey, Arc<EntityGroup>>,
        key: GroupKey,
        types: &[ComponentId],
    ) -> Result<Arc<EntityGroup>, GroupKey> {
        let mut slot = key;
        loop {
            match groups.get(&slot) {
                Some(group) if group.types() == types => return Ok(Arc::clone(group)),
                Some(_) => slot = slot.next(),
                None => return Err(slot),
            }
        }
    }

    // =========================================================================
    // Systems
    // =========================================================================

    /// Registers `system`, matches it against every existing group, then
    /// initializes and starts it.
    ///
    /// Returns the shared handle the world keeps.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::DuplicateSystem`] if a system of the same type is
    /// already registered.
    pub fn add_system<S: System>(&self, system: S) -> JobsResult<Arc<S>> {
        self.add_shared_system(Arc::new(system))
    }

    /// Registers a system the caller already shares.
    ///
    /// # Errors
    ///
    /// - [`JobsError::DuplicateSystem`] if a system of the same type is
    ///   already registered
    /// - [`JobsError::AlreadyInitialized`] if this instance was attached to a
    ///   world before
    pub fn add_shared_system<S: System>(&self, system: Arc<S>) -> JobsResult<Arc<S>> {
        let kind = SystemKind::of::<S>();
        let shared: Arc<dyn System> = system.clone();
        {
            let mut systems = self.systems.write();
            if systems.contains(kind) {
                return Err(JobsError::DuplicateSystem(kind.name()));
            }
            shared
                .core()
                .attach(Arc::downgrade(&shared), Arc::clone(&self.storages), kind.name())?;

            let groups = self.groups.read();
            for group in groups.values() {
                if shared.accepts(group) {
                    shared.core().register_group(Arc::clone(group));
                }
            }
            drop(groups);

            systems.active.insert(
                kind,
                RegisteredSystem {
                    typed: system.clone(),
                    system: Arc::clone(&shared),
                },
            );
        }

        shared.core().initialize(&*shared);
        shared.core().start(&*shared);
        tracing::debug!(
            system = shared.name(),
            groups = shared.core().group_count(),
            "system registered"
        );
        Ok(system)
    }

    /// Stops, terminates and unregisters the system of type `S`.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingSystem`] if none is registered.
    pub fn remove_system<S: System>(&self) -> JobsResult<Arc<S>> {
        let entry = self.take_system(SystemKind::of::<S>())?;
        entry
            .typed
            .downcast::<S>()
            .map_err(|_| JobsError::MissingSystem(type_name::<S>()))
    }

    /// Stops, terminates and unregisters the system of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingSystem`] if none is registered.
    pub fn remove_system_kind(&self, kind: SystemKind) -> JobsResult<Arc<dyn System>> {
        self.take_system(kind).map(|entry| entry.system)
    }

    /// Moves the system of type `S` to the active set and starts it.
    ///
    /// Enabling an already active system does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingSystem`] if none is registered.
    pub fn enable_system<S: System>(&self) -> JobsResult<()> {
        self.enable_system_kind(SystemKind::of::<S>())
    }

    /// Moves the system of type `S` to the disabled set and stops it.
    ///
    /// Disabling an already disabled system does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingSystem`] if none is registered.
    pub fn disable_system<S: System>(&self) -> JobsResult<()> {
        self.disable_system_kind(SystemKind::of::<S>())
    }

    /// [`enable_system`](Self::enable_system) by kind.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingSystem`] if none is registered.
    pub fn enable_system_kind(&self, kind: SystemKind) -> JobsResult<()> {
        let system = {
            let mut systems = self.systems.write();
            if systems.active.contains_key(&kind) {
                return Ok(());
            }
            let entry = systems
                .disabled
                .remove(&kind)
                .ok_or(JobsError::MissingSystem(kind.name()))?;
            let system = Arc::clone(&entry.system);
            systems.active.insert(kind, entry);
            system
        };
        system.core().start(&*system);
        Ok(())
    }

    /// [`disable_system`](Self::disable_system) by kind.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingSystem`] if none is registered.
    pub fn disable_system_kind(&self, kind: SystemKind) -> JobsResult<()> {
        let system = {
            let mut systems = self.systems.write();
            if systems.disabled.contains_key(&kind) {
                return Ok(());
            }
            let entry = systems
                .active
                .remove(&kind)
                .ok_or(JobsError::MissingSystem(kind.name()))?;
            let system = Arc::clone(&entry.system);
            systems.disabled.insert(kind, entry);
            system
        };
        system.core().stop(&*system);
        Ok(())
    }

    /// The registered system of type `S`, active or disabled.
    #[must_use]
    pub fn system<S: System>(&self) -> Option<Arc<S>> {
        let systems = self.systems.read();
        let entry = systems.find(SystemKind::of::<S>())?;
        Arc::clone(&entry.typed).downcast::<S>().ok()
    }

    /// Checks if the system of type `S` is registered and active.
    #[must_use]
    pub fn is_enabled<S: System>(&self) -> bool {
        self.systems
            .read()
            .active
            .contains_key(&SystemKind::of::<S>())
    }

    /// Number of registered systems, active and disabled.
    #[must_use]
    pub fn system_count(&self) -> usize {
        let systems = self.systems.read();
        systems.active.len() + systems.disabled.len()
    }

    fn take_system(&self, kind: SystemKind) -> JobsResult<RegisteredSystem> {
        let entry = {
            let mut systems = self.systems.write();
            systems
                .active
                .remove(&kind)
                .or_else(|| systems.disabled.remove(&kind))
                .ok_or(JobsError::MissingSystem(kind.name()))?
        };
        entry.system.core().terminate(&*entry.system);
        tracing::debug!(system = kind.name(), "system removed");
        Ok(entry)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        let systems = std::mem::take(self.systems.get_mut());
        for entry in systems.active.into_values().chain(systems.disabled.into_values()) {
            entry.system.core().terminate(&*entry.system);
        }
    }
}

// =============================================================================
// Entity conveniences
// =============================================================================

impl Entity {
    /// Attaches `component` to this entity.
    ///
    /// # Errors
    ///
    /// See [`World::add_component`].
    #[inline]
    pub fn add<C: Component>(self, world: &World, component: C) -> JobsResult<()> {
        world.add_component(self, component)
    }

    /// Detaches the `C` of this entity.
    ///
    /// # Errors
    ///
    /// See [`World::remove_component`].
    #[inline]
    pub fn remove<C: Component>(self, world: &World) -> JobsResult<C> {
        world.remove_component::<C>(self)
    }

    /// Overwrites the `C` of this entity.
    ///
    /// # Errors
    ///
    /// See [`World::set`].
    #[inline]
    pub fn set<C: Component>(self, world: &World, component: C) -> JobsResult<()> {
        world.set(self, component)
    }

    /// Reads the `C` of this entity.
    ///
    /// # Errors
    ///
    /// See [`World::get`].
    #[inline]
    pub fn get<C: Component>(self, world: &World) -> JobsResult<C> {
        world.get(self)
    }

    /// Checks if this entity carries a `C`.
    #[inline]
    #[must_use]
    pub fn has<C: Component>(self, world: &World) -> bool {
        world.has::<C>(self)
    }
}
