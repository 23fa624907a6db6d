//! # Runtime Error Types
//!
//! Every failure the registry, the scheduler and the timer queue report to
//! their callers.
//!
//! Three families exist:
//! - **Configuration** errors are returned by constructors and config loading.
//! - **Registration** errors (duplicate or missing components and systems) are
//!   returned synchronously by the call that attempted the change. They are
//!   never retried or silently ignored.
//! - **Runtime** errors cover work submitted after shutdown and thread spawn
//!   failures.
//!
//! Expected lookup misses (`has`, a group with no matched systems) are not
//! errors and are reported as `bool` or `Option`.

use thiserror::Error;

use crate::ecs::Entity;

/// Errors produced by the Kairos runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobsError {
    /// A scheduler was configured with zero worker threads.
    #[error("scheduler thread count must be greater than zero")]
    ZeroThreadCount,

    /// A scheduler was configured with a zero package size.
    #[error("scheduler package size must be greater than zero")]
    ZeroPackageSize,

    /// A timer queue was configured with a zero minimum queue size.
    #[error("timer queue minimum size must be greater than zero")]
    ZeroQueueSize,

    /// Invalid configuration value or unreadable configuration source.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The entity already carries this component type.
    #[error("entity {entity} already has component {component}")]
    DuplicateComponent {
        /// The entity that was mutated.
        entity: Entity,
        /// Name of the component type.
        component: &'static str,
    },

    /// The entity does not carry this component type.
    #[error("entity {entity} has no component {component}")]
    MissingComponent {
        /// The entity that was queried or mutated.
        entity: Entity,
        /// Name of the component type.
        component: &'static str,
    },

    /// The entity was never created by this world, or has been despawned.
    #[error("unknown entity {0}")]
    UnknownEntity(Entity),

    /// A system of this kind is already registered.
    #[error("system {0} is already registered")]
    DuplicateSystem(&'static str),

    /// No system of this kind is registered.
    #[error("system {0} is not registered")]
    MissingSystem(&'static str),

    /// The system was already attached to a world.
    #[error("system {0} is already initialized")]
    AlreadyInitialized(&'static str),

    /// Work was submitted to a queue that has been shut down.
    #[error("queue has been shut down")]
    QueueStopped,

    /// The operating system refused to spawn a runtime thread.
    #[error("failed to spawn runtime thread: {0}")]
    ThreadSpawn(String),
}

/// Result type for runtime operations.
pub type JobsResult<T> = Result<T, JobsError>;
