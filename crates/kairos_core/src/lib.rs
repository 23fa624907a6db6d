//! # Kairos Core
//!
//! Concurrent entity/component registry and periodic job runtime:
//! - Opaque entity handles with per-type component storage
//! - Archetype groups that tolerate structural change during iteration
//! - A fixed thread pool running periodic systems by staleness
//! - A tiered queue for far-future one-shot callbacks
//!
//! ## Architecture Rules
//!
//! 1. **Readers never wait on writers** - group iteration works on snapshots
//! 2. **One compactor per group** - additions queue, removals tombstone
//! 3. **Explicit type ids** - group identity is stable across runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use kairos_core::{ComponentSystem, Entity, Scheduler, SchedulerConfig, SystemContext, World};
//!
//! let world = World::new();
//! for _ in 0..1024 {
//!     world.new_entity((Position::default(), Velocity::default()))?;
//! }
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//! let movement = world.add_system(ComponentSystem::from_fn(
//!     |ctx: &SystemContext<'_>, entity: Entity, (p, v): (Position, Velocity)| {
//!         let _ = ctx.set(entity, p.moved_by(v));
//!     },
//! ))?;
//! movement.core().set_schedule(Some(scheduler.handle()));
//! movement.core().set_cycle_time(100);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod jobs;

pub use config::{RuntimeConfig, SchedulerConfig, TimerQueueConfig};
pub use ecs::{
    Component, ComponentId, ComponentSet, ComponentStorage, Entity, EntityGroup, GroupKey,
    StorageRegistry, World,
};
pub use error::{JobsError, JobsResult};
pub use jobs::{
    ComponentSystem, DeferredQueue, EntityHandler, FnSystem, ManualClock, Scheduler,
    SchedulerHandle, System, SystemContext, SystemCore, SystemKind, SystemState, TimerJob,
    WorldClock,
};
