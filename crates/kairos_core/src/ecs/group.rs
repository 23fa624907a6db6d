//! # Entity Groups
//!
//! A group holds every entity that currently carries exactly one set of
//! component types (an archetype).
//!
//! ## Membership arena
//!
//! ```text
//! slots: [ e0 | e1 | NULL | e3 | e4 | .... ]   len = 5, capacity = 8
//!                    ^ tombstone left by a removal
//! ```
//!
//! Members live in an arena of atomic slots behind an `Arc`. Readers clone the
//! `Arc` and walk `0..len` without holding any lock, skipping tombstones.
//!
//! ## Writers
//!
//! - `add_entity` pushes onto a pending channel and returns; the next
//!   compaction appends pending entities in enqueue order.
//! - `remove_entity` announces itself on the exclusive counter, takes the
//!   ledger lock, writes a tombstone and raises the cleanup flag.
//! - Compaction runs only while no removal is announced, only on one thread at
//!   a time, and either appends in place or builds a fresh arena without
//!   tombstones and swaps it in. Readers holding the previous arena finish
//!   their pass on it, so a reader observes at most one stale pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use super::component::{ComponentId, GroupKey};
use super::entity::Entity;

/// How long a removal waits on an in-flight compaction before it is traced
/// as parked.
///
/// A removal always waits for the ledger, since the ledger serializes it with
/// compaction. This value only decides when that wait is reported, and
/// correctness does not depend on it.
pub const COMPACTION_GRACE: Duration = Duration::from_micros(50);

/// Smallest arena allocated by a rebuild.
const MIN_ARENA_CAPACITY: usize = 16;

const TOMBSTONE: u64 = Entity::NULL.id();

/// Fixed-capacity slot array. Only the ledger holder writes to it.
struct Arena {
    slots: Box<[AtomicU64]>,
    len: AtomicUsize,
}

impl Arena {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicU64::new(TOMBSTONE)).collect(),
            len: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Appends `entity` and returns its slot index.
    ///
    /// The slot is written before `len` is published.
    fn push(&self, entity: Entity) -> usize {
        let index = self.len.load(Ordering::Relaxed);
        debug_assert!(index < self.slots.len(), "arena overflow");
        self.slots[index].store(entity.id(), Ordering::Relaxed);
        self.len.store(index + 1, Ordering::Release);
        index
    }

    #[inline]
    fn tombstone(&self, index: usize) {
        self.slots[index].store(TOMBSTONE, Ordering::Release);
    }

    #[inline]
    fn get(&self, index: usize) -> Option<Entity> {
        let raw = self.slots[index].load(Ordering::Acquire);
        (raw != TOMBSTONE).then(|| Entity::from_raw(raw))
    }
}

/// Bookkeeping owned by whoever holds the ledger lock.
struct Ledger {
    /// Slot index of every member in the current arena.
    positions: HashMap<Entity, usize>,
    /// Pending additions pulled off the channel by a removal.
    staged: Vec<Entity>,
    /// Tombstones in the current arena.
    tombstones: usize,
    /// Completion time of the last compaction.
    last_completed: Option<Instant>,
    /// Number of compactions that did work.
    compactions: u64,
}

/// Point-in-time view of a group's members.
///
/// Cheap to take; iterating never blocks writers.
pub struct GroupMembers {
    arena: Arc<Arena>,
    len: usize,
}

impl GroupMembers {
    /// Iterates live members. Tombstoned slots are skipped.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        (0..self.len).filter_map(move |index| self.arena.get(index))
    }

    /// Checks if `entity` is a live member.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.iter().any(|member| member == entity)
    }

    /// Number of live members.
    #[must_use]
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Collects live members.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Entity> {
        self.iter().collect()
    }
}

/// Counters describing a group's current state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Members in the arena.
    pub members: usize,
    /// Additions not yet compacted into the arena.
    pub pending: usize,
    /// Vacated slots awaiting cleanup.
    pub tombstones: usize,
    /// Arena capacity.
    pub capacity: usize,
    /// Compactions that did work.
    pub compactions: u64,
}

/// The set of entities sharing one component-type set.
pub struct EntityGroup {
    key: GroupKey,
    types: Box<[ComponentId]>,
    arena: RwLock<Arc<Arena>>,
    pending_tx: Sender<Entity>,
    pending_rx: Receiver<Entity>,
    /// Additions enqueued or staged but not yet in the arena.
    pending: AtomicUsize,
    /// Removals currently requesting exclusive access.
    exclusive: AtomicUsize,
    needs_cleanup: AtomicBool,
    ledger: Mutex<Ledger>,
    settled: Condvar,
}

impl EntityGroup {
    /// Creates an empty group.
    ///
    /// # Arguments
    ///
    /// * `key` - The intern-table slot this group occupies
    /// * `types` - Sorted, deduplicated member types
    #[must_use]
    pub fn new(key: GroupKey, types: Vec<ComponentId>) -> Self {
        debug_assert!(types.windows(2).all(|w| w[0] < w[1]), "types must be sorted");
        let (pending_tx, pending_rx) = unbounded();
        Self {
            key,
            types: types.into_boxed_slice(),
            arena: RwLock::new(Arc::new(Arena::with_capacity(MIN_ARENA_CAPACITY))),
            pending_tx,
            pending_rx,
            pending: AtomicUsize::new(0),
            exclusive: AtomicUsize::new(0),
            needs_cleanup: AtomicBool::new(false),
            ledger: Mutex::new(Ledger {
                positions: HashMap::new(),
                staged: Vec::new(),
                tombstones: 0,
                last_completed: None,
                compactions: 0,
            }),
            settled: Condvar::new(),
        }
    }

    /// The intern-table key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> GroupKey {
        self.key
    }

    /// Sorted member types.
    #[inline]
    #[must_use]
    pub fn types(&self) -> &[ComponentId] {
        &self.types
    }

    /// Checks if members carry `id`.
    #[inline]
    #[must_use]
    pub fn contains_type(&self, id: ComponentId) -> bool {
        self.types.binary_search(&id).is_ok()
    }

    /// Checks if the type set is a superset of `ids`.
    #[must_use]
    pub fn contains_all(&self, ids: &[ComponentId]) -> bool {
        ids.iter().all(|id| self.contains_type(*id))
    }

    /// Enqueues `entity` for addition and attempts a compaction.
    ///
    /// Never blocks on readers or on a running compaction.
    pub fn add_entity(&self, entity: Entity) {
        // Counted before it is visible on the channel so a compactor never
        // applies more than it has seen announced.
        self.pending.fetch_add(1, Ordering::AcqRel);
        // The group owns the receiver, so the channel cannot be disconnected.
        let _ = self.pending_tx.send(entity);
        self.do_work();
    }

    /// Removes `entity`, whether it is a member or still pending.
    ///
    /// Returns `false` if the entity is neither.
    pub fn remove_entity(&self, entity: Entity) -> bool {
        self.exclusive.fetch_add(1, Ordering::AcqRel);
        let found = {
            let mut ledger = self.lock_for_removal();
            self.stage_pending(&mut ledger);

            if let Some(index) = ledger.positions.remove(&entity) {
                self.arena.read().tombstone(index);
                ledger.tombstones += 1;
                self.needs_cleanup.store(true, Ordering::Release);
                true
            } else if let Some(at) = ledger.staged.iter().position(|e| *e == entity) {
                ledger.staged.remove(at);
                self.pending.fetch_sub(1, Ordering::AcqRel);
                true
            } else {
                false
            }
        };
        self.exclusive.fetch_sub(1, Ordering::AcqRel);
        self.do_work();
        found
    }

    /// Attempts a compaction without blocking.
    ///
    /// Yields immediately if a removal holds exclusive access, if another
    /// thread is compacting, or if there is nothing to do. Returns `true` if
    /// this call applied any work.
    pub fn do_work(&self) -> bool {
        let mut worked = false;
        loop {
            if self.exclusive.load(Ordering::Acquire) > 0 || !self.needs_work() {
                break;
            }
            let Some(mut ledger) = self.ledger.try_lock() else {
                break;
            };
            if self.exclusive.load(Ordering::Acquire) > 0 {
                break;
            }
            let applied = self.compact_locked(&mut ledger);
            drop(ledger);
            if applied > 0 {
                worked = true;
                continue;
            }
            // An adder whose send landed while we held the ledger failed its
            // own try_lock, so its entity is ours to apply.
            if self.pending_rx.is_empty() {
                break;
            }
        }
        worked
    }

    /// Runs compaction to completion, blocking on the ledger lock.
    ///
    /// Every method that holds the ledger without compacting to the end
    /// finishes with [`do_work`](Self::do_work), so an adder that lost the
    /// ledger race to it is never stranded.
    ///
    /// Every addition whose `add_entity` call returned before this call is
    /// visible in the member list afterwards.
    pub fn flush(&self) {
        let mut ledger = self.ledger.lock();
        while self.compact_locked(&mut ledger) > 0 {}
        drop(ledger);
        self.do_work();
    }

    /// Waits until nothing is pending and no tombstones remain.
    ///
    /// Returns `false` on timeout.
    pub fn wait_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ledger = self.ledger.lock();
        let settled = loop {
            if self.exclusive.load(Ordering::Acquire) == 0 {
                self.compact_locked(&mut ledger);
            }
            if self.is_settled(&ledger) {
                break true;
            }
            if self.settled.wait_until(&mut ledger, deadline).timed_out() {
                break self.is_settled(&ledger);
            }
        };
        drop(ledger);
        self.do_work();
        settled
    }

    /// Takes a snapshot of the current members.
    #[must_use]
    pub fn snapshot(&self) -> GroupMembers {
        let arena = Arc::clone(&self.arena.read());
        let len = arena.len();
        GroupMembers { arena, len }
    }

    /// Number of live members, excluding pending additions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().count()
    }

    /// Checks if there are no live members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completion time of the last compaction that did work.
    #[must_use]
    pub fn last_compaction(&self) -> Option<Instant> {
        let last = self.ledger.lock().last_completed;
        self.do_work();
        last
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> GroupStats {
        let stats = {
            let ledger = self.ledger.lock();
            let arena = Arc::clone(&self.arena.read());
            GroupStats {
                members: ledger.positions.len(),
                pending: self.pending.load(Ordering::Acquire),
                tombstones: ledger.tombstones,
                capacity: arena.capacity(),
                compactions: ledger.compactions,
            }
        };
        self.do_work();
        stats
    }

    fn needs_work(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0 || self.needs_cleanup.load(Ordering::Acquire)
    }

    fn is_settled(&self, ledger: &Ledger) -> bool {
        self.pending.load(Ordering::Acquire) == 0 && ledger.tombstones == 0
    }

    fn lock_for_removal(&self) -> MutexGuard<'_, Ledger> {
        if let Some(ledger) = self.ledger.try_lock_for(COMPACTION_GRACE) {
            return ledger;
        }
        tracing::trace!(group = self.key.raw(), "removal parked behind compaction");
        self.ledger.lock()
    }

    /// Moves channel contents into the ledger, preserving enqueue order.
    fn stage_pending(&self, ledger: &mut Ledger) {
        ledger.staged.extend(self.pending_rx.try_iter());
    }

    /// Applies cleanup and pending additions. Returns the amount of work done.
    fn compact_locked(&self, ledger: &mut Ledger) -> usize {
        self.stage_pending(ledger);
        let incoming = std::mem::take(&mut ledger.staged);
        let cleaned = ledger.tombstones;
        if incoming.is_empty() && cleaned == 0 {
            return 0;
        }

        let current = Arc::clone(&self.arena.read());
        if cleaned > 0 || current.len() + incoming.len() > current.capacity() {
            let live: Vec<Entity> = (0..current.len()).filter_map(|i| current.get(i)).collect();
            let needed = live.len() + incoming.len();
            let arena = Arena::with_capacity((needed * 2).max(MIN_ARENA_CAPACITY));

            ledger.positions.clear();
            for entity in live.into_iter().chain(incoming.iter().copied()) {
                let index = arena.push(entity);
                ledger.positions.insert(entity, index);
            }
            ledger.tombstones = 0;
            self.needs_cleanup.store(false, Ordering::Release);
            *self.arena.write() = Arc::new(arena);
        } else {
            for entity in &incoming {
                let index = current.push(*entity);
                ledger.positions.insert(*entity, index);
            }
        }

        self.pending.fetch_sub(incoming.len(), Ordering::AcqRel);
        ledger.last_completed = Some(Instant::now());
        ledger.compactions += 1;
        tracing::trace!(
            group = self.key.raw(),
            added = incoming.len(),
            cleaned,
            "group compacted"
        );
        self.settled.notify_all();
        incoming.len() + cleaned
    }
}

impl std::fmt::Debug for EntityGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityGroup")
            .field("key", &self.key)
            .field("types", &self.types)
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn group() -> EntityGroup {
        EntityGroup::new(GroupKey::EMPTY, Vec::new())
    }

    fn e(id: u64) -> Entity {
        Entity::from_raw(id)
    }

    #[test]
    fn test_additions_keep_enqueue_order() {
        let group = group();
        for id in 0..40 {
            group.add_entity(e(id));
        }
        group.flush();

        let members = group.snapshot().to_vec();
        assert_eq!(members, (0..40).map(e).collect::<Vec<_>>());
        assert_eq!(group.stats().pending, 0);
    }

    #[test]
    fn test_removal_tombstones_then_compacts() {
        let group = group();
        for id in 0..4 {
            group.add_entity(e(id));
        }
        group.flush();

        let before = group.snapshot();
        assert!(group.remove_entity(e(1)));
        group.flush();

        assert_eq!(group.snapshot().to_vec(), vec![e(0), e(2), e(3)]);
        assert_eq!(group.stats().tombstones, 0);
        // An older snapshot keeps working, it is at most one pass stale.
        assert!(before.count() >= 3);
    }

    #[test]
    fn test_remove_pending_entity() {
        let group = group();
        group.exclusive.fetch_add(1, Ordering::AcqRel);
        group.add_entity(e(7));
        group.exclusive.fetch_sub(1, Ordering::AcqRel);

        assert!(group.remove_entity(e(7)));
        group.flush();
        assert!(group.is_empty());
        assert_eq!(group.stats().pending, 0);
    }

    #[test]
    fn test_remove_unknown_entity() {
        let group = group();
        group.add_entity(e(1));
        assert!(!group.remove_entity(e(2)));
        group.flush();
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_compaction_yields_to_exclusive_access() {
        let group = group();
        group.exclusive.fetch_add(1, Ordering::AcqRel);
        group.add_entity(e(1));
        assert!(!group.do_work());
        assert_eq!(group.stats().pending, 1);

        group.exclusive.fetch_sub(1, Ordering::AcqRel);
        assert!(group.do_work());
        assert_eq!(group.snapshot().to_vec(), vec![e(1)]);
    }

    #[test]
    fn test_readd_after_removal() {
        let group = group();
        group.add_entity(e(5));
        group.flush();
        assert!(group.remove_entity(e(5)));
        group.add_entity(e(5));
        group.flush();
        assert_eq!(group.snapshot().to_vec(), vec![e(5)]);
    }

    #[test]
    fn test_arena_grows_past_initial_capacity() {
        let group = group();
        for id in 0..(MIN_ARENA_CAPACITY as u64 * 5) {
            group.add_entity(e(id));
        }
        group.flush();
        let stats = group.stats();
        assert_eq!(stats.members, MIN_ARENA_CAPACITY * 5);
        assert!(stats.capacity >= stats.members);
    }

    #[test]
    fn test_wait_settled() {
        let group = group();
        group.add_entity(e(1));
        group.add_entity(e(2));
        assert!(group.remove_entity(e(1)));
        assert!(group.wait_settled(Duration::from_secs(1)));
        assert_eq!(group.snapshot().to_vec(), vec![e(2)]);
    }

    #[test]
    fn test_concurrent_additions_visible_without_flush() {
        for round in 0..200u64 {
            let group = Arc::new(group());
            let adders: Vec<_> = (0..4u64)
                .map(|t| {
                    let group = Arc::clone(&group);
                    thread::spawn(move || {
                        for i in 0..50 {
                            group.add_entity(e(round * 1_000 + t * 100 + i));
                        }
                    })
                })
                .collect();
            for adder in adders {
                adder.join().unwrap();
            }

            // Once every add_entity call has returned, nothing may be left
            // waiting on the channel.
            assert_eq!(group.stats().pending, 0, "round {round}");
            assert_eq!(group.snapshot().count(), 200, "round {round}");
        }
    }

    #[test]
    fn test_removal_waits_out_a_held_ledger() {
        let group = Arc::new(group());
        group.add_entity(e(3));
        group.flush();

        let ledger = group.ledger.lock();
        let remover = {
            let group = Arc::clone(&group);
            thread::spawn(move || group.remove_entity(e(3)))
        };
        thread::sleep(COMPACTION_GRACE * 100);
        assert!(!remover.is_finished());

        drop(ledger);
        assert!(remover.join().unwrap());
        group.flush();
        assert!(group.is_empty());
    }

    #[test]
    fn test_concurrent_add_remove_and_iterate() {
        let group = Arc::new(group());
        let writers: Vec<_> = (0..4u64)
            .map(|t| {
                let group = Arc::clone(&group);
                thread::spawn(move || {
                    for i in 0..500 {
                        let entity = e(t * 10_000 + i);
                        group.add_entity(entity);
                        if i % 2 == 0 {
                            assert!(group.remove_entity(entity));
                        }
                    }
                })
            })
            .collect();

        let reader = {
            let group = Arc::clone(&group);
            thread::spawn(move || {
                for _ in 0..200 {
                    for entity in group.snapshot().iter() {
                        assert!(!entity.is_null());
                    }
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        group.flush();
        let members = group.snapshot().to_vec();
        assert_eq!(members.len(), 4 * 250);
        for entity in members {
            assert_eq!(entity.id() % 10_000 % 2, 1);
        }
    }
}
