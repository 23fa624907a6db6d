//! # Jobs
//!
//! Periodic systems, the scheduler thread pool that drives them, and the
//! tiered queue for deferred one-shot callbacks.

mod scheduler;
mod system;
mod timer;

pub use scheduler::{default_handle, Scheduler, SchedulerHandle, SchedulerStats};
pub use system::{
    ComponentSystem, EntityHandler, FnHandler, FnSystem, System, SystemContext, SystemCore,
    SystemKind, SystemState,
};
pub use timer::{
    Clock, DeferredQueue, JobId, ManualClock, TimerJob, TimerQueueStats, WorldClock,
};
