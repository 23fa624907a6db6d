//! # Deferred Timer Queue
//!
//! Tiered queues for far-future one-shot callbacks.
//!
//! ```text
//!  enqueue ──> [ 1h ] ──> [ 15m ] ──> [ 5m ] ──> [ 2m ] ──> [ 30s ] ──> [ 5s ] ──> due ──> dispatcher
//!               sorter     sorter      sorter     sorter     sorter      sorter
//! ```
//!
//! A job enters the coarsest tier whose gap fits in its remaining time, or
//! the due queue if it is closer than the finest gap. Each tier has a sorter
//! thread that wakes once per gap and moves entries that have come closer to
//! a finer tier. Far-future jobs are therefore examined rarely, and only the
//! due queue is polled at a fine resolution. The dispatcher runs every job
//! exactly once, in due order, once the clock reaches its due time.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::config::TimerQueueConfig;
use crate::error::{JobsError, JobsResult};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(0);

// =============================================================================
// Clocks
// =============================================================================

/// Logical time source for due times.
pub trait Clock: Send + Sync + 'static {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
}

/// Monotonic wall time since creation.
#[derive(Clone, Copy, Debug)]
pub struct WorldClock {
    origin: Instant,
}

impl WorldClock {
    /// Starts a clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WorldClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WorldClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Creates a clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(duration_nanos(by), Ordering::AcqRel);
    }

    /// Sets the clock to `to`.
    pub fn set(&self, to: Duration) {
        self.nanos.store(duration_nanos(to), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

// =============================================================================
// Jobs
// =============================================================================

/// Identifier of a submitted job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    /// Returns the raw identifier.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A one-shot callback due at a logical time.
pub struct TimerJob {
    id: JobId,
    due: Duration,
    callback: Box<dyn FnOnce() + Send + 'static>,
}

impl TimerJob {
    /// Creates a job due when the queue's clock reads `due`.
    #[must_use]
    pub fn new(due: Duration, callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)),
            due,
            callback: Box::new(callback),
        }
    }

    /// The job's identifier.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// The clock reading at which the job runs.
    #[must_use]
    pub fn due(&self) -> Duration {
        self.due
    }
}

impl std::fmt::Debug for TimerJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerJob")
            .field("id", &self.id)
            .field("due", &self.due)
            .finish_non_exhaustive()
    }
}

/// Min-heap entry: earliest due first, submission order among equals.
struct DueEntry(TimerJob);

impl PartialEq for DueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for DueEntry {}

impl PartialOrd for DueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .0
            .due
            .cmp(&self.0.due)
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Counters describing queue activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimerQueueStats {
    /// Jobs accepted.
    pub enqueued: u64,
    /// Jobs moved to a finer tier by a sorter.
    pub cascaded: u64,
    /// Jobs executed.
    pub dispatched: u64,
    /// Jobs waiting in each tier, finest first.
    pub pending_per_tier: Vec<usize>,
    /// Jobs handed to the dispatcher and not yet executed.
    pub awaiting_dispatch: usize,
}

struct Tier {
    gap: Duration,
    jobs: Mutex<Vec<TimerJob>>,
    wake: Condvar,
}

struct Shared {
    clock: Arc<dyn Clock>,
    /// Finest gap first.
    tiers: Vec<Tier>,
    due_tx: Sender<TimerJob>,
    running: AtomicBool,
    dispatch_poll: Duration,
    enqueued: AtomicU64,
    cascaded: AtomicU64,
    dispatched: AtomicU64,
    awaiting_dispatch: AtomicUsize,
}

impl Shared {
    /// Index of the coarsest tier whose gap fits in `remaining`.
    fn tier_for(&self, remaining: Duration) -> Option<usize> {
        self.tiers.iter().rposition(|tier| tier.gap <= remaining)
    }

    fn route(&self, job: TimerJob) {
        let remaining = job.due.saturating_sub(self.clock.now());
        match self.tier_for(remaining) {
            Some(index) => self.tiers[index].jobs.lock().push(job),
            None => {
                self.awaiting_dispatch.fetch_add(1, Ordering::AcqRel);
                // The queue owns the receiver until the dispatcher exits.
                if self.due_tx.send(job).is_err() {
                    self.awaiting_dispatch.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
    }

    fn sorter_loop(&self, index: usize) {
        let tier = &self.tiers[index];
        while self.running.load(Ordering::Acquire) {
            let jobs = {
                let mut jobs = tier.jobs.lock();
                // Checked under the lock `wake_sorters` takes, so a shutdown
                // cannot slip in before the wait.
                if !self.running.load(Ordering::Acquire) {
                    break;
                }
                tier.wake.wait_for(&mut jobs, tier.gap);
                if !self.running.load(Ordering::Acquire) {
                    break;
                }
                std::mem::take(&mut *jobs)
            };
            if jobs.is_empty() {
                continue;
            }

            let now = self.clock.now();
            let mut kept = Vec::new();
            for job in jobs {
                match self.tier_for(job.due.saturating_sub(now)) {
                    Some(target) if target == index => kept.push(job),
                    _ => {
                        self.cascaded.fetch_add(1, Ordering::Relaxed);
                        self.route(job);
                    }
                }
            }
            if !kept.is_empty() {
                tier.jobs.lock().extend(kept);
            }
        }
    }

    fn dispatch_loop(&self, due_rx: &Receiver<TimerJob>, capacity: usize) {
        let mut heap: BinaryHeap<DueEntry> = BinaryHeap::with_capacity(capacity);
        while self.running.load(Ordering::Acquire) {
            match due_rx.recv_timeout(self.dispatch_poll) {
                Ok(job) => heap.push(DueEntry(job)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            heap.extend(due_rx.try_iter().map(DueEntry));

            let now = self.clock.now();
            while heap.peek().is_some_and(|entry| entry.0.due <= now) {
                if !self.running.load(Ordering::Acquire) {
                    return;
                }
                let Some(DueEntry(job)) = heap.pop() else {
                    break;
                };
                self.awaiting_dispatch.fetch_sub(1, Ordering::AcqRel);
                tracing::trace!(job = job.id.raw(), "timer job dispatched");
                (job.callback)();
                self.dispatched.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn wake_sorters(&self) {
        for tier in &self.tiers {
            let _jobs = tier.jobs.lock();
            tier.wake.notify_all();
        }
    }
}

/// Tiered deferred-callback queue.
///
/// # Example
///
/// ```rust,ignore
/// let queue = DeferredQueue::new(TimerQueueConfig::default())?;
/// queue.schedule_in(Duration::from_secs(600), || respawn_boss())?;
/// ```
pub struct DeferredQueue {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl DeferredQueue {
    /// Starts a queue on a [`WorldClock`].
    ///
    /// # Errors
    ///
    /// - [`JobsError::ZeroQueueSize`] / [`JobsError::InvalidConfig`] for an
    ///   invalid configuration
    /// - [`JobsError::ThreadSpawn`] if a sorter or the dispatcher cannot be
    ///   started
    pub fn new(config: TimerQueueConfig) -> JobsResult<Self> {
        Self::with_clock(config, Arc::new(WorldClock::new()))
    }

    /// Starts a queue on `clock`.
    ///
    /// # Errors
    ///
    /// See [`DeferredQueue::new`].
    pub fn with_clock(config: TimerQueueConfig, clock: Arc<dyn Clock>) -> JobsResult<Self> {
        config.validate()?;
        let (due_tx, due_rx) = unbounded();
        let tiers = config
            .gaps_ms
            .iter()
            .map(|gap| Tier {
                gap: Duration::from_millis(*gap),
                jobs: Mutex::new(Vec::with_capacity(config.min_queue_size)),
                wake: Condvar::new(),
            })
            .collect();

        let queue = Self {
            shared: Arc::new(Shared {
                clock,
                tiers,
                due_tx,
                running: AtomicBool::new(true),
                dispatch_poll: Duration::from_millis(config.dispatch_poll_ms),
                enqueued: AtomicU64::new(0),
                cascaded: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
                awaiting_dispatch: AtomicUsize::new(0),
            }),
            threads: Mutex::new(Vec::new()),
        };

        for index in 0..queue.shared.tiers.len() {
            let shared = Arc::clone(&queue.shared);
            queue.spawn(format!("kairos-timer-sorter-{index}"), move || {
                shared.sorter_loop(index);
            })?;
        }
        let shared = Arc::clone(&queue.shared);
        let capacity = config.min_queue_size;
        queue.spawn("kairos-timer-dispatch".to_string(), move || {
            shared.dispatch_loop(&due_rx, capacity);
        })?;

        tracing::info!(tiers = queue.shared.tiers.len(), "timer queue started");
        Ok(queue)
    }

    fn spawn(&self, name: String, body: impl FnOnce() + Send + 'static) -> JobsResult<()> {
        let handle = thread::Builder::new()
            .name(name)
            .spawn(body)
            .map_err(|e| JobsError::ThreadSpawn(e.to_string()))?;
        self.threads.lock().push(handle);
        Ok(())
    }

    /// Submits `job`.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::QueueStopped`] after [`shutdown`](Self::shutdown).
    pub fn enqueue(&self, job: TimerJob) -> JobsResult<JobId> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(JobsError::QueueStopped);
        }
        let id = job.id;
        self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
        self.shared.route(job);
        Ok(id)
    }

    /// Submits `callback` to run `delay` from the current clock reading.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::QueueStopped`] after [`shutdown`](Self::shutdown).
    pub fn schedule_in(
        &self,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> JobsResult<JobId> {
        let due = self.shared.clock.now().saturating_add(delay);
        self.enqueue(TimerJob::new(due, callback))
    }

    /// Wakes every sorter for an immediate pass.
    pub fn resort_now(&self) {
        self.shared.wake_sorters();
    }

    /// The queue's clock reading.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.shared.clock.now()
    }

    /// Tier gaps, finest first.
    #[must_use]
    pub fn gaps(&self) -> Vec<Duration> {
        self.shared.tiers.iter().map(|tier| tier.gap).collect()
    }

    /// Jobs accepted and not yet executed.
    #[must_use]
    pub fn pending(&self) -> usize {
        let stats = self.stats();
        stats.pending_per_tier.iter().sum::<usize>() + stats.awaiting_dispatch
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> TimerQueueStats {
        let shared = &self.shared;
        TimerQueueStats {
            enqueued: shared.enqueued.load(Ordering::Relaxed),
            cascaded: shared.cascaded.load(Ordering::Relaxed),
            dispatched: shared.dispatched.load(Ordering::Relaxed),
            pending_per_tier: shared.tiers.iter().map(|tier| tier.jobs.lock().len()).collect(),
            awaiting_dispatch: shared.awaiting_dispatch.load(Ordering::Acquire),
        }
    }

    /// Stops every thread. Jobs not yet dispatched are dropped unrun.
    ///
    /// A callback already executing completes. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.wake_sorters();

        let current = thread::current().id();
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        tracing::info!("timer queue stopped");
    }
}

impl Drop for DeferredQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
