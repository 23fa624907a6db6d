//! # Kairos Soak Run
//!
//! Drives the runtime under sustained load and reports counters:
//! - A periodic component system over a growing entity population
//! - Worker threads churning structure (add/remove/despawn) on a shared pool
//! - A timer queue receiving a steady stream of deferred callbacks
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=kairos_core=debug kairos_soak --config kairos.toml --entities 1024 --seconds 10
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use kairos_core::{
    Component, ComponentId, ComponentSystem, DeferredQueue, Entity, JobsResult, RuntimeConfig,
    Scheduler, System, SystemContext, World,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

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

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Marker(u32);

impl Component for Marker {
    const ID: ComponentId = ComponentId::new(3);
}

struct Options {
    config: RuntimeConfig,
    entities: usize,
    seconds: u64,
}

fn parse_options() -> JobsResult<Options> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        config: RuntimeConfig::default(),
        entities: 1024,
        seconds: 10,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.get(i + 1) {
                    options.config = RuntimeConfig::from_toml_file(path)?;
                    i += 1;
                }
            }
            "--entities" | "-e" => {
                if let Some(value) = args.get(i + 1) {
                    options.entities = value.parse().unwrap_or(options.entities);
                    i += 1;
                }
            }
            "--seconds" | "-s" => {
                if let Some(value) = args.get(i + 1) {
                    options.seconds = value.parse().unwrap_or(options.seconds);
                    i += 1;
                }
            }
            other => tracing::warn!(argument = other, "ignoring unknown argument"),
        }
        i += 1;
    }
    Ok(options)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    if let Err(err) = run() {
        tracing::error!(%err, "soak run failed");
        std::process::exit(1);
    }
}

fn run() -> JobsResult<()> {
    let options = parse_options()?;
    let world = Arc::new(World::new());
    let scheduler = Scheduler::new(options.config.scheduler.clone())?;
    scheduler.install_default();
    let timers = DeferredQueue::new(options.config.timers.clone())?;

    for i in 0..options.entities {
        #[allow(clippy::cast_precision_loss)]
        let x = i as f32;
        world.new_entity((Position { x, y: 0.0 }, Velocity { dx: 1.0, dy: 0.5 }))?;
    }

    let movement = world.add_system(ComponentSystem::from_fn(
        |ctx: &SystemContext<'_>, entity: Entity, (p, v): (Position, Velocity)| {
            let _ = ctx.set(
                entity,
                Position {
                    x: p.x + v.dx,
                    y: p.y + v.dy,
                },
            );
        },
    ))?;
    movement.core().set_schedule(Some(scheduler.handle()));
    movement.core().set_cycle_time(100);

    let fired = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let pool: Vec<Entity> = (0..thread::available_parallelism().map_or(4, usize::from))
        .map(|_| world.new_entity((Position::default(),)))
        .collect::<JobsResult<_>>()?;

    let churners: Vec<_> = (0..4u64)
        .map(|seed| {
            let world = Arc::clone(&world);
            let pool = pool.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || churn(&world, &pool, &stop, seed))
        })
        .collect();

    let started = Instant::now();
    let deadline = started + Duration::from_secs(options.seconds);
    while Instant::now() < deadline {
        let fired = Arc::clone(&fired);
        timers.schedule_in(Duration::from_millis(250), move || {
            fired.fetch_add(1, Ordering::Relaxed);
        })?;
        thread::sleep(Duration::from_millis(50));

        let stats = scheduler.stats();
        tracing::debug!(
            executions = stats.executions,
            last_visited = movement.core().last_visited(),
            "scheduler progress"
        );
    }

    stop.store(true, Ordering::Release);
    let mut structural_ops = 0u64;
    for churner in churners {
        structural_ops += churner.join().unwrap_or(0);
    }

    world.flush();
    scheduler.abort();
    timers.shutdown();

    let scheduler_stats = scheduler.stats();
    let timer_stats = timers.stats();
    tracing::info!(
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        entities = world.entity_count(),
        groups = world.group_count(),
        system_runs = movement.core().executions(),
        last_visited = movement.core().last_visited(),
        scheduler_passes = scheduler_stats.passes,
        structural_ops,
        timers_enqueued = timer_stats.enqueued,
        timers_fired = fired.load(Ordering::Relaxed),
        "soak run complete"
    );
    Ok(())
}

/// Randomly adds and removes components on `pool` until `stop` is raised.
///
/// Returns the number of structural changes that succeeded.
fn churn(world: &World, pool: &[Entity], stop: &AtomicBool, seed: u64) -> u64 {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut applied = 0;
    while !stop.load(Ordering::Acquire) {
        let entity = pool[rng.gen_range(0..pool.len())];
        let result = match rng.gen_range(0..3) {
            0 => world.add_component(entity, Velocity::default()),
            1 => world.remove_component::<Velocity>(entity).map(|_| ()),
            _ => {
                if entity.has::<Marker>(world) {
                    world.remove_component::<Marker>(entity).map(|_| ())
                } else {
                    world.add_component(entity, Marker(rng.gen()))
                }
            }
        };
        if result.is_ok() {
            applied += 1;
        }
    }
    applied
}
