//! # Systems
//!
//! A system is a unit of repeatable work bound to zero or more component
//! types.
//!
//! ```text
//! Created ──> Initialized ──> Running ──(cadence elapsed)──> Executing ──┐
//!                  │             ^  │                                     │
//!                  │             │  └──────────> Disabled                 │
//!                  │             └────────────────────────────────────────┘
//!                  └──────────────────────────────> Terminated <── Running/Disabled
//! ```
//!
//! Every system embeds a [`SystemCore`] holding its cadence, matched groups,
//! lifecycle state and scheduler binding. The per-run logic is [`System::run`].
//! [`ComponentSystem`] adds the common case: iterate every matched entity and
//! hand its declared components to an [`EntityHandler`].

use std::any::{type_name, Any, TypeId};
use std::cell::Cell;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use super::scheduler::SchedulerHandle;
use crate::ecs::{
    normalize, Component, ComponentId, ComponentSet, Entity, EntityGroup, StorageRegistry,
};
use crate::error::{JobsError, JobsResult};

/// Lifecycle state of a system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SystemState {
    /// Constructed, not attached to a world.
    Created,
    /// Attached and initialized, not yet started.
    Initialized,
    /// Eligible for execution.
    Running,
    /// Stopped by the world; keeps its groups.
    Disabled,
    /// Removed from its world. Final.
    Terminated,
}

/// Identity of a system type, used as the registry key.
#[derive(Clone, Copy, Debug)]
pub struct SystemKind {
    id: TypeId,
    name: &'static str,
}

impl SystemKind {
    /// Kind of the system type `S`.
    #[must_use]
    pub fn of<S: System>() -> Self {
        Self {
            id: TypeId::of::<S>(),
            name: type_name::<S>(),
        }
    }

    /// Kind of `system`, for types that cannot be named (closures).
    #[must_use]
    pub fn of_val<S: System>(_system: &S) -> Self {
        Self::of::<S>()
    }

    /// Type name of the system.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.name
    }
}

impl PartialEq for SystemKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SystemKind {}

impl Hash for SystemKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A unit of periodic work.
///
/// # Example
///
/// ```rust,ignore
/// struct Decay {
///     core: SystemCore,
/// }
///
/// impl System for Decay {
///     fn core(&self) -> &SystemCore {
///         &self.core
///     }
///
///     fn run(&self, ctx: &SystemContext<'_>) {
///         ctx.for_each_entity(|entity| {
///             let _ = ctx.update::<Health, _>(entity, |h| h.current *= 0.99);
///         });
///     }
/// }
/// ```
pub trait System: Any + Send + Sync {
    /// Shared state embedded in every system.
    fn core(&self) -> &SystemCore;

    /// Work performed on each execution.
    fn run(&self, ctx: &SystemContext<'_>);

    /// Name used in logs and errors.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }

    /// Checks if this system processes `group`.
    ///
    /// Accepts groups whose type set is a superset of the declared types. A
    /// system that declares nothing accepts every group.
    fn accepts(&self, group: &EntityGroup) -> bool {
        group.contains_all(self.core().component_types())
    }

    /// Called once when the system is attached to a world.
    fn initialize(&self) {}

    /// Called when the system becomes eligible for execution.
    fn on_start(&self) {}

    /// Called when the system is disabled or removed while running.
    fn on_stop(&self) {}

    /// Called once when the system is removed from its world.
    fn on_terminate(&self) {}

    /// Runs the system once on the calling thread.
    ///
    /// Same as `<dyn System>::execute`, callable on concrete types.
    fn execute(&self) -> bool
    where
        Self: Sized,
    {
        run_once(self)
    }
}

impl dyn System {
    /// Runs the system once on the calling thread.
    ///
    /// Returns `false` without running if the system is not running in a
    /// world, is already executing on another thread, or waits on a
    /// dependency that has not executed since its last run.
    pub fn execute(&self) -> bool {
        run_once(self)
    }

    /// Runs a system whose execution slot the caller already claimed.
    pub(crate) fn execute_claimed(&self) -> bool {
        let core = self.core();
        let _claim = Claim(&core.executing);

        let Some(storages) = core.storages.get() else {
            tracing::warn!(
                system = self.name(),
                "system executed before being attached to a world"
            );
            return false;
        };
        if core.state() != SystemState::Running {
            return false;
        }

        let now = Instant::now();
        let delta = {
            let mut last = core.last_execution.lock();
            let delta = last.map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
            *last = Some(now);
            delta
        };
        core.record_dependencies();

        let groups = core.groups.read().clone();
        let ctx = SystemContext {
            storages,
            groups: &groups,
            delta,
            visited: Cell::new(0),
        };
        self.run(&ctx);

        core.last_visited.store(ctx.visited.get(), Ordering::Release);
        core.executions.fetch_add(1, Ordering::AcqRel);
        true
    }
}

fn run_once(system: &dyn System) -> bool {
    if !system.core().can_execute() || !system.core().try_claim() {
        return false;
    }
    system.execute_claimed()
}

/// Releases an execution claim when dropped, including on unwind.
struct Claim<'a>(&'a AtomicBool);

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Execution count of another system, and the value seen at our last run.
struct Dependency {
    target: Arc<AtomicU64>,
    seen: Option<u64>,
}

/// State shared by every system.
pub struct SystemCore {
    component_types: Vec<ComponentId>,
    /// Cadence in milliseconds; 0 means manual execution only.
    cycle_time_ms: AtomicU64,
    last_execution: Mutex<Option<Instant>>,
    groups: RwLock<Vec<Arc<EntityGroup>>>,
    state: Mutex<SystemState>,
    executing: AtomicBool,
    executions: Arc<AtomicU64>,
    last_visited: AtomicU64,
    dependencies: Mutex<Vec<Dependency>>,
    scheduler: Mutex<Option<SchedulerHandle>>,
    this: OnceLock<Weak<dyn System>>,
    storages: OnceLock<Arc<StorageRegistry>>,
}

impl SystemCore {
    /// Creates a core that declares no component types.
    #[must_use]
    pub fn new() -> Self {
        Self::with_components(&[])
    }

    /// Creates a core declaring `types`.
    #[must_use]
    pub fn with_components(types: &[ComponentId]) -> Self {
        Self {
            component_types: normalize(types),
            cycle_time_ms: AtomicU64::new(0),
            last_execution: Mutex::new(None),
            groups: RwLock::new(Vec::new()),
            state: Mutex::new(SystemState::Created),
            executing: AtomicBool::new(false),
            executions: Arc::new(AtomicU64::new(0)),
            last_visited: AtomicU64::new(0),
            dependencies: Mutex::new(Vec::new()),
            scheduler: Mutex::new(None),
            this: OnceLock::new(),
            storages: OnceLock::new(),
        }
    }

    /// Creates a core declaring every member of `Q`.
    #[must_use]
    pub fn for_set<Q: ComponentSet>() -> Self {
        Self::with_components(&Q::component_ids())
    }

    /// Sorted declared component types.
    #[must_use]
    pub fn component_types(&self) -> &[ComponentId] {
        &self.component_types
    }

    // =========================================================================
    // Cadence and scheduling
    // =========================================================================

    /// Current cadence.
    #[must_use]
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms())
    }

    /// Current cadence in milliseconds.
    #[must_use]
    pub fn cycle_time_ms(&self) -> u64 {
        self.cycle_time_ms.load(Ordering::Acquire)
    }

    /// Sets the cadence in milliseconds.
    ///
    /// `0` removes the system from automatic scheduling; any other value
    /// registers it with its scheduler once it is running.
    pub fn set_cycle_time(&self, millis: u64) {
        self.cycle_time_ms.store(millis, Ordering::Release);
        self.sync_registration();
    }

    /// Binds the system to `scheduler`, or unbinds it with `None`.
    ///
    /// A system is tracked by at most one scheduler; rebinding moves it.
    pub fn set_schedule(&self, scheduler: Option<SchedulerHandle>) {
        let this = self.this_system();
        let mut slot = self.scheduler.lock();
        if let (Some(old), Some(this)) = (slot.take(), this.as_ref()) {
            old.deregister(this);
        }
        *slot = scheduler;
        drop(slot);
        self.sync_registration();
    }

    /// The scheduler this system is bound to.
    #[must_use]
    pub fn schedule(&self) -> Option<SchedulerHandle> {
        self.scheduler.lock().clone()
    }

    /// Time since the last execution passed the cadence by, or `None` if the
    /// system is not due.
    ///
    /// A system that never ran is maximally overdue.
    #[must_use]
    pub fn overdue(&self, now: Instant) -> Option<Duration> {
        let cycle = self.cycle_time();
        if cycle.is_zero() {
            return None;
        }
        match *self.last_execution.lock() {
            None => Some(Duration::MAX),
            Some(at) => {
                let elapsed = now.saturating_duration_since(at);
                (elapsed > cycle).then(|| elapsed - cycle)
            }
        }
    }

    /// Time until the system becomes due, if it has a cadence and ran before.
    #[must_use]
    pub fn until_due(&self, now: Instant) -> Option<Duration> {
        let cycle = self.cycle_time();
        if cycle.is_zero() {
            return None;
        }
        let at = (*self.last_execution.lock())?;
        Some(cycle.saturating_sub(now.saturating_duration_since(at)))
    }

    // =========================================================================
    // Dependencies
    // =========================================================================

    /// Makes this system wait for `other` between runs.
    ///
    /// After each execution this system is ineligible until `other` has
    /// executed at least once more.
    pub fn depends_on(&self, other: &SystemCore) {
        self.dependencies.lock().push(Dependency {
            target: Arc::clone(&other.executions),
            seen: None,
        });
    }

    /// Checks if every dependency executed since this system's last run.
    #[must_use]
    pub fn can_execute(&self) -> bool {
        self.dependencies.lock().iter().all(|dependency| match dependency.seen {
            None => true,
            Some(seen) => dependency.target.load(Ordering::Acquire) > seen,
        })
    }

    fn record_dependencies(&self) {
        for dependency in self.dependencies.lock().iter_mut() {
            dependency.seen = Some(dependency.target.load(Ordering::Acquire));
        }
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> SystemState {
        *self.state.lock()
    }

    /// Completed executions.
    #[must_use]
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Acquire)
    }

    /// Entities handled by the last completed execution.
    #[must_use]
    pub fn last_visited(&self) -> u64 {
        self.last_visited.load(Ordering::Acquire)
    }

    /// Start time of the last execution.
    #[must_use]
    pub fn last_execution(&self) -> Option<Instant> {
        *self.last_execution.lock()
    }

    /// Checks if an execution is in progress.
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Groups matched so far.
    #[must_use]
    pub fn groups(&self) -> Vec<Arc<EntityGroup>> {
        self.groups.read().clone()
    }

    /// Number of groups matched so far.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.read().len()
    }

    // =========================================================================
    // Crate internals
    // =========================================================================

    pub(crate) fn register_group(&self, group: Arc<EntityGroup>) {
        self.groups.write().push(group);
    }

    pub(crate) fn try_claim(&self) -> bool {
        self.executing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn attach(
        &self,
        this: Weak<dyn System>,
        storages: Arc<StorageRegistry>,
        name: &'static str,
    ) -> JobsResult<()> {
        self.this
            .set(this)
            .map_err(|_| JobsError::AlreadyInitialized(name))?;
        // `this` is set exactly once, so neither is `storages`.
        let _ = self.storages.set(storages);
        Ok(())
    }

    pub(crate) fn initialize(&self, system: &dyn System) {
        if !self.transition(&[SystemState::Created], SystemState::Initialized) {
            return;
        }
        system.initialize();
    }

    pub(crate) fn start(&self, system: &dyn System) {
        if !self.transition(
            &[SystemState::Initialized, SystemState::Disabled],
            SystemState::Running,
        ) {
            return;
        }
        system.on_start();
        self.sync_registration();
    }

    pub(crate) fn stop(&self, system: &dyn System) {
        if !self.transition(&[SystemState::Running], SystemState::Disabled) {
            return;
        }
        self.sync_registration();
        system.on_stop();
    }

    pub(crate) fn terminate(&self, system: &dyn System) {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, SystemState::Terminated)
        };
        if previous == SystemState::Terminated {
            return;
        }
        self.sync_registration();
        if previous == SystemState::Running {
            system.on_stop();
        }
        system.on_terminate();
    }

    fn transition(&self, from: &[SystemState], to: SystemState) -> bool {
        let mut state = self.state.lock();
        if !from.contains(&*state) {
            return false;
        }
        *state = to;
        true
    }

    fn this_system(&self) -> Option<Arc<dyn System>> {
        self.this.get().and_then(Weak::upgrade)
    }

    /// Registers with or deregisters from the bound scheduler so that it
    /// tracks this system exactly when it is running with a cadence.
    fn sync_registration(&self) {
        let Some(this) = self.this_system() else {
            return;
        };
        let scheduler = self.scheduler.lock();
        let Some(handle) = scheduler.as_ref() else {
            return;
        };
        if self.cycle_time_ms() > 0 && self.state() == SystemState::Running {
            handle.register(this);
        } else {
            handle.deregister(&this);
        }
    }
}

impl Default for SystemCore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemCore")
            .field("component_types", &self.component_types)
            .field("cycle_time_ms", &self.cycle_time_ms())
            .field("state", &self.state())
            .field("executions", &self.executions())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Execution context
// =============================================================================

/// What a system sees during one execution.
pub struct SystemContext<'a> {
    storages: &'a StorageRegistry,
    groups: &'a [Arc<EntityGroup>],
    delta: Duration,
    visited: Cell<u64>,
}

impl<'a> SystemContext<'a> {
    /// Time since the previous execution; zero on the first.
    #[must_use]
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Groups matched to the system when the execution started.
    #[must_use]
    pub fn groups(&self) -> &'a [Arc<EntityGroup>] {
        self.groups
    }

    /// Component storages of the owning world.
    #[must_use]
    pub fn storages(&self) -> &'a StorageRegistry {
        self.storages
    }

    /// Calls `f` for every member of every matched group.
    ///
    /// Each group is read from a snapshot taken when its turn comes.
    pub fn for_each_entity(&self, mut f: impl FnMut(Entity)) {
        for group in self.groups {
            for entity in group.snapshot().iter() {
                f(entity);
            }
        }
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

    /// Overwrites the `C` of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingComponent`] if it carries no `C`.
    #[inline]
    pub fn set<C: Component>(&self, entity: Entity, component: C) -> JobsResult<()> {
        self.storages.set(entity, component)
    }

    /// Applies `f` to the `C` of `entity` in place.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::MissingComponent`] if it carries no `C`.
    #[inline]
    pub fn update<C: Component, R>(
        &self,
        entity: Entity,
        f: impl FnOnce(&mut C) -> R,
    ) -> JobsResult<R> {
        self.storages.storage::<C>().update(entity, f)
    }

    /// Checks if `entity` carries a `C`.
    #[inline]
    #[must_use]
    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        self.storages.storage::<C>().contains(entity)
    }

    /// Counts one handled entity towards [`SystemCore::last_visited`].
    #[inline]
    pub fn mark_visited(&self) {
        self.visited.set(self.visited.get() + 1);
    }

    /// Entities handled so far in this execution.
    #[must_use]
    pub fn visited(&self) -> u64 {
        self.visited.get()
    }
}

// =============================================================================
// Provided systems
// =============================================================================

/// Per-entity logic of a [`ComponentSystem`].
pub trait EntityHandler<Q: ComponentSet>: Send + Sync + 'static {
    /// Called once per execution before any entity.
    fn prepare(&self, _ctx: &SystemContext<'_>) {}

    /// Called for every matched entity that carries every member of `Q`.
    fn handle(&self, ctx: &SystemContext<'_>, entity: Entity, components: Q);
}

/// Adapts a closure into an [`EntityHandler`].
pub struct FnHandler<F>(F);

impl<Q, F> EntityHandler<Q> for FnHandler<F>
where
    Q: ComponentSet,
    F: Fn(&SystemContext<'_>, Entity, Q) + Send + Sync + 'static,
{
    fn handle(&self, ctx: &SystemContext<'_>, entity: Entity, components: Q) {
        (self.0)(ctx, entity, components);
    }
}

/// A system that reads the components `Q` of every entity in its groups.
///
/// Accepts only groups carrying every member of `Q`.
///
/// # Example
///
/// ```rust,ignore
/// let movement = ComponentSystem::from_fn(
///     |ctx: &SystemContext<'_>, entity: Entity, (p, v): (Position, Velocity)| {
///         let _ = ctx.set(entity, Position::new(p.x + v.x, p.y + v.y, p.z + v.z));
///     },
/// );
/// movement.core().set_cycle_time(16);
/// let movement = world.add_system(movement)?;
/// ```
pub struct ComponentSystem<Q: ComponentSet, H: EntityHandler<Q>> {
    core: SystemCore,
    handler: H,
    _set: PhantomData<fn() -> Q>,
}

impl<Q: ComponentSet, H: EntityHandler<Q>> ComponentSystem<Q, H> {
    /// Creates a system driving `handler`.
    #[must_use]
    pub fn new(handler: H) -> Self {
        Self {
            core: SystemCore::for_set::<Q>(),
            handler,
            _set: PhantomData,
        }
    }

    /// The per-entity logic.
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<Q, F> ComponentSystem<Q, FnHandler<F>>
where
    Q: ComponentSet,
    F: Fn(&SystemContext<'_>, Entity, Q) + Send + Sync + 'static,
{
    /// Creates a system from a per-entity closure.
    #[must_use]
    pub fn from_fn(f: F) -> Self {
        Self::new(FnHandler(f))
    }
}

impl<Q: ComponentSet, H: EntityHandler<Q>> System for ComponentSystem<Q, H> {
    fn core(&self) -> &SystemCore {
        &self.core
    }

    fn run(&self, ctx: &SystemContext<'_>) {
        self.handler.prepare(ctx);
        ctx.for_each_entity(|entity| {
            // An entity moved out between snapshot and read is skipped.
            if let Some(components) = Q::fetch_from(ctx.storages, entity) {
                ctx.mark_visited();
                self.handler.handle(ctx, entity, components);
            }
        });
    }
}

/// A system whose whole run is one closure.
pub struct FnSystem<F> {
    core: SystemCore,
    f: F,
}

impl<F> FnSystem<F>
where
    F: Fn(&SystemContext<'_>) + Send + Sync + 'static,
{
    /// Creates a system that declares no component types.
    #[must_use]
    pub fn new(f: F) -> Self {
        Self::with_core(SystemCore::new(), f)
    }

    /// Creates a system around a preconfigured core.
    #[must_use]
    pub fn with_core(core: SystemCore, f: F) -> Self {
        Self { core, f }
    }
}

impl<F> System for FnSystem<F>
where
    F: Fn(&SystemContext<'_>) + Send + Sync + 'static,
{
    fn core(&self) -> &SystemCore {
        &self.core
    }

    fn run(&self, ctx: &SystemContext<'_>) {
        (self.f)(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::World;
    use bytemuck::{Pod, Zeroable};
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Heat(f32);

    impl Component for Heat {
        const ID: ComponentId = ComponentId::new(30);
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Cooling(f32);

    impl Component for Cooling {
        const ID: ComponentId = ComponentId::new(31);
    }

    struct Counter {
        core: SystemCore,
        runs: AtomicUsize,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                core: SystemCore::new(),
                runs: AtomicUsize::new(0),
            }
        }
    }

    impl System for Counter {
        fn core(&self) -> &SystemCore {
            &self.core
        }

        fn run(&self, _ctx: &SystemContext<'_>) {
            self.runs.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct Follower {
        core: SystemCore,
    }

    impl System for Follower {
        fn core(&self) -> &SystemCore {
            &self.core
        }

        fn run(&self, _ctx: &SystemContext<'_>) {}
    }

    #[test]
    fn test_detached_system_does_not_run() {
        let counter = Counter::new();
        assert!(!counter.execute());
        assert_eq!(counter.runs.load(Ordering::Relaxed), 0);
        assert_eq!(counter.core().state(), SystemState::Created);
    }

    #[test]
    fn test_manual_execution_records_accounting() {
        let world = World::new();
        let counter = world.add_system(Counter::new()).unwrap();
        assert_eq!(counter.core().state(), SystemState::Running);

        assert!(counter.execute());
        assert!(counter.execute());
        assert_eq!(counter.runs.load(Ordering::Relaxed), 2);
        assert_eq!(counter.core().executions(), 2);
        assert!(counter.core().last_execution().is_some());
    }

    #[test]
    fn test_disabled_system_does_not_run() {
        let world = World::new();
        let counter = world.add_system(Counter::new()).unwrap();
        world.disable_system::<Counter>().unwrap();

        assert!(!counter.execute());
        assert_eq!(counter.core().state(), SystemState::Disabled);
    }

    #[test]
    fn test_component_system_accepts_supersets_only() {
        let world = World::new();
        let both = world.new_entity((Heat(10.0), Cooling(0.5))).unwrap();
        world.new_entity((Heat(3.0),)).unwrap();

        let system = world
            .add_system(ComponentSystem::from_fn(
                |ctx: &SystemContext<'_>, entity: Entity, (heat, cooling): (Heat, Cooling)| {
                    let _ = ctx.set(entity, Heat(heat.0 * cooling.0));
                },
            ))
            .unwrap();
        assert_eq!(system.core().group_count(), 1);

        world.flush();
        assert!(system.execute());
        assert_eq!(system.core().last_visited(), 1);
        assert_eq!(both.get::<Heat>(&world).unwrap(), Heat(5.0));
    }

    #[test]
    fn test_dependency_gating() {
        let world = World::new();
        let leader = world.add_system(Counter::new()).unwrap();
        let follower = Arc::new(Follower {
            core: SystemCore::new(),
        });
        follower.core().depends_on(leader.core());
        let follower = world.add_shared_system(follower).unwrap();

        assert!(follower.core().can_execute());
        assert!(follower.execute());
        assert!(!follower.core().can_execute());

        assert!(!follower.execute());
        assert_eq!(follower.core().executions(), 1);

        assert!(leader.execute());
        assert!(follower.core().can_execute());
        assert!(follower.execute());
    }

    #[test]
    fn test_overdue_without_cadence_is_never_due() {
        let core = SystemCore::new();
        assert!(core.overdue(Instant::now()).is_none());
        core.set_cycle_time(10);
        assert_eq!(core.overdue(Instant::now()), Some(Duration::MAX));
        assert!(core.until_due(Instant::now()).is_none());
    }

    #[test]
    fn test_system_kind_identity() {
        assert_eq!(SystemKind::of::<Counter>(), SystemKind::of::<Counter>());
        assert_ne!(SystemKind::of::<Counter>(), SystemKind::of::<Follower>());
        assert!(SystemKind::of::<Counter>().name().ends_with("Counter"));
    }
}
