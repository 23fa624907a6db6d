//! Integration tests for periodic systems on the scheduler.

use bytemuck::{Pod, Zeroable};
use kairos_core::{
    Component, ComponentId, ComponentSystem, Entity, FnSystem, Scheduler, System, SystemContext,
    SystemCore, World,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
}

impl Component for Position {
    const ID: ComponentId = ComponentId::new(1);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Velocity {
    dx: f32,
    dy: f32,
}

impl Component for Velocity {
    const ID: ComponentId = ComponentId::new(2);
}

/// Polls `condition` for up to five seconds.
fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

struct Manual {
    core: SystemCore,
    runs: AtomicUsize,
}

impl System for Manual {
    fn core(&self) -> &SystemCore {
        &self.core
    }

    fn run(&self, _ctx: &SystemContext<'_>) {
        self.runs.fetch_add(1, Ordering::Relaxed);
    }
}

struct Periodic {
    core: SystemCore,
    runs: AtomicUsize,
}

impl System for Periodic {
    fn core(&self) -> &SystemCore {
        &self.core
    }

    fn run(&self, _ctx: &SystemContext<'_>) {
        self.runs.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_only_systems_with_cadence_run_automatically() {
    let scheduler = Scheduler::with_threads(2, 4).unwrap();
    let world = World::new();

    let manual = world
        .add_system(Manual {
            core: SystemCore::new(),
            runs: AtomicUsize::new(0),
        })
        .unwrap();
    let periodic = world
        .add_system(Periodic {
            core: SystemCore::new(),
            runs: AtomicUsize::new(0),
        })
        .unwrap();

    manual.core().set_schedule(Some(scheduler.handle()));
    periodic.core().set_schedule(Some(scheduler.handle()));
    periodic.core().set_cycle_time(10);

    assert!(eventually(|| periodic.runs.load(Ordering::Relaxed) >= 3));
    assert_eq!(manual.runs.load(Ordering::Relaxed), 0);

    // Manual systems still run on request.
    assert!(manual.execute());
    assert_eq!(manual.runs.load(Ordering::Relaxed), 1);
}

#[test]
fn test_zero_cadence_removes_from_scheduling() {
    let scheduler = Scheduler::with_threads(2, 4).unwrap();
    let world = World::new();
    let periodic = world
        .add_system(Periodic {
            core: SystemCore::new(),
            runs: AtomicUsize::new(0),
        })
        .unwrap();
    let dynamic: Arc<dyn System> = periodic.clone();

    periodic.core().set_cycle_time(10);
    periodic.core().set_schedule(Some(scheduler.handle()));
    assert!(scheduler.handle().is_registered(&dynamic));
    assert!(eventually(|| periodic.runs.load(Ordering::Relaxed) >= 1));

    periodic.core().set_cycle_time(0);
    assert!(!scheduler.handle().is_registered(&dynamic));

    // Let an execution that was already claimed finish.
    assert!(eventually(|| !periodic.core().is_executing()));
    let settled = periodic.runs.load(Ordering::Relaxed);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(periodic.runs.load(Ordering::Relaxed), settled);
}

#[test]
fn test_disabled_system_leaves_scheduler() {
    let scheduler = Scheduler::with_threads(1, 4).unwrap();
    let world = World::new();
    let periodic = world
        .add_system(Periodic {
            core: SystemCore::new(),
            runs: AtomicUsize::new(0),
        })
        .unwrap();
    let dynamic: Arc<dyn System> = periodic.clone();
    periodic.core().set_schedule(Some(scheduler.handle()));
    periodic.core().set_cycle_time(10);
    assert!(scheduler.handle().is_registered(&dynamic));

    world.disable_system::<Periodic>().unwrap();
    assert!(!scheduler.handle().is_registered(&dynamic));

    world.enable_system::<Periodic>().unwrap();
    assert!(scheduler.handle().is_registered(&dynamic));

    world.remove_system::<Periodic>().unwrap();
    assert!(!scheduler.handle().is_registered(&dynamic));
}

#[test]
fn test_rebinding_moves_between_schedulers() {
    let first = Scheduler::with_threads(1, 1).unwrap();
    let second = Scheduler::with_threads(1, 1).unwrap();
    let world = World::new();
    let periodic = world
        .add_system(Periodic {
            core: SystemCore::new(),
            runs: AtomicUsize::new(0),
        })
        .unwrap();
    let dynamic: Arc<dyn System> = periodic.clone();

    periodic.core().set_cycle_time(1_000);
    periodic.core().set_schedule(Some(first.handle()));
    assert!(first.handle().is_registered(&dynamic));

    periodic.core().set_schedule(Some(second.handle()));
    assert!(!first.handle().is_registered(&dynamic));
    assert!(second.handle().is_registered(&dynamic));
}

#[test]
fn test_dependency_gating() {
    let world = World::new();
    let leader = world
        .add_system(Manual {
            core: SystemCore::new(),
            runs: AtomicUsize::new(0),
        })
        .unwrap();

    let follower = Arc::new(Periodic {
        core: SystemCore::new(),
        runs: AtomicUsize::new(0),
    });
    follower.core().depends_on(leader.core());
    let follower = world.add_shared_system(follower).unwrap();

    assert!(follower.core().can_execute());
    assert!(follower.execute());
    assert!(!follower.core().can_execute());
    assert!(!follower.execute());
    assert_eq!(follower.runs.load(Ordering::Relaxed), 1);

    assert!(leader.execute());
    assert!(follower.core().can_execute());
    assert!(follower.execute());
    assert!(!follower.core().can_execute());
    assert!(!follower.execute());
    assert_eq!(follower.core().executions(), 2);
}

#[test]
fn test_scheduler_respects_dependencies() {
    let scheduler = Scheduler::with_threads(2, 4).unwrap();
    let world = World::new();
    let leader = world
        .add_system(Manual {
            core: SystemCore::new(),
            runs: AtomicUsize::new(0),
        })
        .unwrap();
    let follower = Arc::new(Periodic {
        core: SystemCore::new(),
        runs: AtomicUsize::new(0),
    });
    follower.core().depends_on(leader.core());
    let follower = world.add_shared_system(follower).unwrap();
    follower.core().set_schedule(Some(scheduler.handle()));
    follower.core().set_cycle_time(5);

    assert!(eventually(|| follower.runs.load(Ordering::Relaxed) == 1));
    thread::sleep(Duration::from_millis(60));
    assert_eq!(follower.runs.load(Ordering::Relaxed), 1);

    leader.execute();
    assert!(eventually(|| follower.runs.load(Ordering::Relaxed) == 2));
}

#[test]
fn test_scenario_1024_entities_per_window() {
    let world = World::new();
    for _ in 0..1024 {
        world
            .new_entity((Position::default(), Velocity { dx: 1.0, dy: 2.0 }))
            .unwrap();
    }
    world.flush();

    let handled = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&handled);
    let system = world
        .add_system(ComponentSystem::from_fn(
            move |ctx: &SystemContext<'_>, entity: Entity, (p, v): (Position, Velocity)| {
                counter.fetch_add(1, Ordering::Relaxed);
                let _ = ctx.set(
                    entity,
                    Position {
                        x: p.x + v.dx,
                        y: p.y + v.dy,
                    },
                );
            },
        ))
        .unwrap();

    let scheduler = Scheduler::with_threads(2, 4).unwrap();
    system.core().set_schedule(Some(scheduler.handle()));
    system.core().set_cycle_time(100);

    assert!(eventually(|| system.core().executions() >= 1));
    assert_eq!(system.core().last_visited(), 1024);

    for _ in 0..1024 {
        world
            .new_entity((Position::default(), Velocity::default()))
            .unwrap();
    }
    world.flush();

    let seen = system.core().executions();
    assert!(eventually(|| system.core().executions() > seen));
    assert!(eventually(|| system.core().last_visited() == 2048));
    assert!(handled.load(Ordering::Relaxed) >= 1024 + 2048);
}

#[test]
fn test_package_size_bounds_each_claim() {
    let scheduler = Scheduler::with_threads(1, 1).unwrap();
    let world = World::new();
    let runs = Arc::new(AtomicUsize::new(0));

    let first = {
        let runs = Arc::clone(&runs);
        world
            .add_system(FnSystem::new(move |_ctx: &SystemContext<'_>| {
                runs.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap()
    };
    first.core().set_schedule(Some(scheduler.handle()));
    first.core().set_cycle_time(20);

    assert!(eventually(|| runs.load(Ordering::Relaxed) >= 2));
    let stats = scheduler.stats();
    assert!(stats.passes >= 2);
    assert!(stats.executions <= stats.passes);
}
