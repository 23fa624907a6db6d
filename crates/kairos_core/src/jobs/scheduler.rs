//! # Scheduler
//!
//! A fixed pool of OS threads that executes periodic systems whose cadence
//! has elapsed.
//!
//! ```text
//!   worker 0 ──┐                     ┌── claim due systems (<= package_size)
//!   worker 1 ──┼── try_lock(pass) ───┤   sorted by staleness
//!   worker N ──┘        │            └── wake one peer, execute batch inline
//!                       └── lock busy / nothing due: wait on signal
//! ```
//!
//! Only one thread scans at a time. Due systems are claimed before the scan
//! releases the pass lock, so no system runs on two threads at once, while
//! different systems run concurrently on different threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use super::system::System;
use crate::config::SchedulerConfig;
use crate::error::{JobsError, JobsResult};

static DEFAULT_SCHEDULER: OnceLock<SchedulerHandle> = OnceLock::new();

/// Counters describing scheduler activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Scans that found at least one due system.
    pub passes: u64,
    /// System executions started by the pool.
    pub executions: u64,
    /// Times a worker went idle.
    pub idle_waits: u64,
    /// Systems currently registered.
    pub registered: usize,
}

/// State shared by the pool and every handle.
struct Shared {
    /// Registered systems keyed by allocation address.
    entries: RwLock<HashMap<usize, Arc<dyn System>>>,
    running: AtomicBool,
    /// Held by the thread currently scanning.
    pass: Mutex<()>,
    signal_lock: Mutex<()>,
    signal: Condvar,
    package_size: usize,
    idle_wait: Duration,
    passes: AtomicU64,
    executions: AtomicU64,
    idle_waits: AtomicU64,
}

impl Shared {
    fn key(system: &Arc<dyn System>) -> usize {
        Arc::as_ptr(system).cast::<()>() as usize
    }

    fn worker_loop(&self) {
        while self.running.load(Ordering::Acquire) {
            let next_due = match self.pass.try_lock() {
                Some(pass) => {
                    let (batch, next_due) = self.collect_due();
                    drop(pass);
                    if !batch.is_empty() {
                        self.passes.fetch_add(1, Ordering::Relaxed);
                        // Another thread may find work this batch left behind.
                        self.signal.notify_one();
                        for system in batch {
                            if system.execute_claimed() {
                                self.executions.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        continue;
                    }
                    next_due
                }
                None => None,
            };
            self.idle(next_due.map_or(self.idle_wait, |due| due.min(self.idle_wait)));
        }
    }

    /// Claims up to `package_size` due systems, longest overdue first.
    ///
    /// Also returns the time until the earliest system not yet due.
    fn collect_due(&self) -> (Vec<Arc<dyn System>>, Option<Duration>) {
        let now = Instant::now();
        let mut due = Vec::new();
        let mut next_due: Option<Duration> = None;
        {
            let entries = self.entries.read();
            for system in entries.values() {
                let core = system.core();
                match core.overdue(now) {
                    Some(stale) => {
                        if !core.is_executing() && core.can_execute() {
                            due.push((stale, Arc::clone(system)));
                        }
                    }
                    None => {
                        if let Some(wait) = core.until_due(now) {
                            next_due = Some(next_due.map_or(wait, |current| current.min(wait)));
                        }
                    }
                }
            }
        }

        due.sort_by(|a, b| b.0.cmp(&a.0));
        let batch = due
            .into_iter()
            .map(|(_, system)| system)
            .filter(|system| system.core().try_claim())
            .take(self.package_size)
            .collect();
        (batch, next_due)
    }

    fn idle(&self, timeout: Duration) {
        self.idle_waits.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.signal_lock.lock();
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        self.signal.wait_for(&mut guard, timeout);
    }

    fn wake_all(&self) {
        let _guard = self.signal_lock.lock();
        self.signal.notify_all();
    }
}

/// Cloneable reference to a scheduler, held by the systems bound to it.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Starts tracking `system`. Registering twice has no effect.
    ///
    /// Ignored once the scheduler has been aborted.
    pub fn register(&self, system: Arc<dyn System>) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        let key = Shared::key(&system);
        self.shared.entries.write().entry(key).or_insert(system);
        self.shared.wake_all();
    }

    /// Stops tracking `system`. An execution already in progress completes.
    pub fn deregister(&self, system: &Arc<dyn System>) {
        // Dropped outside the lock.
        let removed = self.shared.entries.write().remove(&Shared::key(system));
        drop(removed);
    }

    /// Checks if `system` is tracked.
    #[must_use]
    pub fn is_registered(&self, system: &Arc<dyn System>) -> bool {
        self.shared.entries.read().contains_key(&Shared::key(system))
    }

    /// Checks if the worker threads are still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Checks if both handles refer to the same scheduler.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            passes: self.shared.passes.load(Ordering::Relaxed),
            executions: self.shared.executions.load(Ordering::Relaxed),
            idle_waits: self.shared.idle_waits.load(Ordering::Relaxed),
            registered: self.shared.entries.read().len(),
        }
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// A pool of worker threads executing periodic systems.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = Scheduler::new(SchedulerConfig::default())?;
/// system.core().set_schedule(Some(scheduler.handle()));
/// system.core().set_cycle_time(100);
/// ```
pub struct Scheduler {
    handle: SchedulerHandle,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Starts a scheduler.
    ///
    /// # Errors
    ///
    /// - [`JobsError::ZeroThreadCount`] / [`JobsError::ZeroPackageSize`] /
    ///   [`JobsError::InvalidConfig`] for an invalid configuration
    /// - [`JobsError::ThreadSpawn`] if a worker thread cannot be started
    pub fn new(config: SchedulerConfig) -> JobsResult<Self> {
        config.validate()?;
        let threads = config.thread_count();

        let scheduler = Self {
            handle: SchedulerHandle {
                shared: Arc::new(Shared {
                    entries: RwLock::new(HashMap::new()),
                    running: AtomicBool::new(true),
                    pass: Mutex::new(()),
                    signal_lock: Mutex::new(()),
                    signal: Condvar::new(),
                    package_size: config.package_size,
                    idle_wait: Duration::from_millis(config.idle_wait_ms),
                    passes: AtomicU64::new(0),
                    executions: AtomicU64::new(0),
                    idle_waits: AtomicU64::new(0),
                }),
            },
            threads: Mutex::new(Vec::with_capacity(threads)),
        };

        for index in 0..threads {
            let shared = Arc::clone(&scheduler.handle.shared);
            let worker = thread::Builder::new()
                .name(format!("kairos-scheduler-{index}"))
                .spawn(move || shared.worker_loop())
                .map_err(|e| JobsError::ThreadSpawn(e.to_string()))?;
            scheduler.threads.lock().push(worker);
        }

        tracing::info!(
            threads,
            package_size = config.package_size,
            "scheduler started"
        );
        Ok(scheduler)
    }

    /// Starts a scheduler with `threads` workers and default settings
    /// otherwise.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::new`].
    pub fn with_threads(threads: usize, package_size: usize) -> JobsResult<Self> {
        Self::new(SchedulerConfig {
            threads: Some(threads),
            package_size,
            ..SchedulerConfig::default()
        })
    }

    /// A handle for binding systems to this scheduler.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Number of worker threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Checks if the worker threads are still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.handle.stats()
    }

    /// Makes this scheduler the process default.
    ///
    /// The first call in a process wins; returns `false` if a default was
    /// already installed.
    pub fn install_default(&self) -> bool {
        DEFAULT_SCHEDULER.set(self.handle()).is_ok()
    }

    /// Stops every worker thread.
    ///
    /// Executions already in progress complete; nothing is dispatched again.
    /// Registered systems are released. Safe to call more than once, and from
    /// a system running on this scheduler.
    pub fn abort(&self) {
        let shared = &self.handle.shared;
        if !shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        shared.wake_all();

        let current = thread::current().id();
        let threads = std::mem::take(&mut *self.threads.lock());
        for worker in threads {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }

        // Systems hold handles back to us; clearing breaks the cycle.
        let entries = std::mem::take(&mut *shared.entries.write());
        drop(entries);
        tracing::info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.abort();
    }
}

/// The handle installed by [`Scheduler::install_default`].
#[must_use]
pub fn default_handle() -> Option<SchedulerHandle> {
    DEFAULT_SCHEDULER.get().cloned()
}
