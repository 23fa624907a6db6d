//! # Entity Handles
//!
//! Entities are opaque 64-bit identifiers:
//! - Assigned monotonically per world, starting at 0
//! - Never recycled
//! - Carry no data (components live in storage, membership in groups)

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle identifying one conceptual object in a [`World`].
///
/// Equality and hashing are identifier based. A handle is only meaningful
/// for the world that created it.
///
/// [`World`]: crate::ecs::World
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Entity(u64);

impl Entity {
    /// Reserved identifier that is never handed out.
    ///
    /// Group arenas use it to mark vacated slots.
    pub const NULL: Self = Self(u64::MAX);

    /// Wraps a raw identifier.
    #[inline]
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }

    /// Checks if this is the reserved null handle.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out entity identifiers for one world.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    next: AtomicU64,
}

impl EntityAllocator {
    /// Creates an allocator whose first entity is `0`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Allocates the next identifier.
    ///
    /// # Panics
    ///
    /// Panics if the identifier space is exhausted and the next value would
    /// collide with [`Entity::NULL`].
    #[inline]
    pub fn allocate(&self) -> Entity {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        assert!(id != u64::MAX, "entity identifier space exhausted");
        Entity(id)
    }

    /// Number of identifiers handed out so far.
    #[inline]
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_entity_raw_roundtrip() {
        let entity = Entity::from_raw(12345);
        assert_eq!(entity.id(), 12345);
        assert!(!entity.is_null());
        assert!(Entity::default().is_null());
    }

    #[test]
    fn test_allocator_is_monotonic_from_zero() {
        let allocator = EntityAllocator::new();
        assert_eq!(allocator.allocate(), Entity::from_raw(0));
        assert_eq!(allocator.allocate(), Entity::from_raw(1));
        assert_eq!(allocator.allocate(), Entity::from_raw(2));
        assert_eq!(allocator.allocated(), 3);
    }

    #[test]
    fn test_allocator_never_repeats_across_threads() {
        let allocator = Arc::new(EntityAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || (0..1000).map(|_| allocator.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for entity in handle.join().unwrap() {
                assert!(seen.insert(entity), "duplicate id {entity}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
