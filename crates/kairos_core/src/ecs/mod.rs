//! # Entity Component Registry
//!
//! Concurrent registry of entities, their components and archetype groups.
//!
//! ## Design Philosophy
//!
//! - Entities are plain ids; data lives in per-type component storages
//! - Entities sharing a component-type set share one [`EntityGroup`]
//! - Structural changes never stop readers: groups are iterated from
//!   snapshots while additions queue and removals tombstone

mod component;
mod entity;
mod group;
mod storage;
mod world;

pub use component::{normalize, Component, ComponentId, ComponentSet, GroupKey};
pub use entity::{Entity, EntityAllocator};
pub use group::{EntityGroup, GroupMembers, GroupStats, COMPACTION_GRACE};
pub use storage::{ComponentStorage, StorageRegistry};
pub use world::World;
