//! Worker pools.
//!
//! - `ThreadPool`: per-lane pool used by the hierarchical service, with
//!   time-sliced continuations
//! - `trivial`: runners for the trivial and single-thread services

mod trivial;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cougaar_core::{Lane, ThreadError};
use tracing::{debug, error, info, warn};

use crate::blocking;
use crate::schedulable::{Schedulable, SchedulableObject};
use crate::sync::{lock, panic_message, wait};

pub(crate) use self::trivial::{SerialThreadQueue, TrivialRunner, TrivialThreadPool};

/// Continuation slice used when none is configured.
pub const MAX_CONTINUATION_TIME: Duration = Duration::from_millis(100);

/// Process-wide pool of reusable worker threads for one lane.
///
/// Workers are created lazily up to `capacity` (unbounded when `None`).
/// Client code never starts a worker: the only way to hand one work is a
/// granted right flowing through [`SchedulableObject::thread_start`].
pub struct ThreadPool {
    name: String,
    lane: Lane,
    capacity: Option<usize>,
    continuation_slice: Duration,
    workers: Mutex<Option<Vec<Arc<PooledThread>>>>,
    created: AtomicUsize,
    unnamed: AtomicUsize,
}

impl ThreadPool {
    pub fn new(lane: Lane, capacity: Option<usize>, continuation_slice: Duration) -> Self {
        Self {
            name: format!("pool-{lane}"),
            lane,
            capacity,
            continuation_slice,
            workers: Mutex::new(Some(Vec::new())),
            created: AtomicUsize::new(0),
            unnamed: AtomicUsize::new(0),
        }
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Name for a schedulable whose caller did not supply one.
    pub fn generate_name(&self) -> String {
        let n = self.unnamed.fetch_add(1, Ordering::Relaxed);
        format!("CougaarPooledThread-{n}")
    }

    /// Workers created so far.
    pub fn size(&self) -> usize {
        lock(&self.workers).as_ref().map_or(0, Vec::len)
    }

    /// Workers currently handed out.
    pub fn in_use(&self) -> usize {
        lock(&self.workers)
            .as_ref()
            .map_or(0, |w| w.iter().filter(|t| t.in_use.load(Ordering::SeqCst)).count())
    }

    /// Reserve an idle worker, creating one if the pool has room.
    pub(crate) fn acquire(&self, schedulable: &str) -> Result<Arc<PooledThread>, ThreadError> {
        let mut guard = lock(&self.workers);
        let workers = guard
            .as_mut()
            .ok_or_else(|| ThreadError::PoolStopped(self.name.clone()))?;

        if let Some(worker) = workers.iter().find(|w| {
            w.in_use
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }) {
            debug!(pool = %self.name, worker = %worker.name, schedulable, "reusing pooled thread");
            return Ok(Arc::clone(worker));
        }

        if let Some(capacity) = self.capacity {
            if workers.len() >= capacity {
                return Err(ThreadError::PoolExhausted {
                    pool: self.name.clone(),
                    capacity,
                });
            }
        }

        let index = self.created.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::new(PooledThread {
            name: format!("{}-worker-{index}", self.name),
            in_use: AtomicBool::new(true),
            slot: Mutex::new(WorkerSlot::default()),
            wakeup: Condvar::new(),
            current: Mutex::new(None),
            handle: Mutex::new(None),
            continuation_slice: self.continuation_slice,
        });
        debug!(pool = %self.name, worker = %worker.name, schedulable, "created pooled thread");
        workers.push(Arc::clone(&worker));
        Ok(worker)
    }

    /// Visit every unit currently running on one of this pool's workers.
    pub(crate) fn iterate_over_running(&self, body: &mut dyn FnMut(&str, &dyn Schedulable)) -> usize {
        let workers: Vec<_> = lock(&self.workers).clone().unwrap_or_default();
        let mut count = 0;
        for worker in workers {
            let current = lock(&worker.current).clone();
            let Some(unit) = current else {
                continue;
            };
            let visited = panic::catch_unwind(AssertUnwindSafe(|| {
                body(unit.scheduler().name(), unit.as_ref());
            }));
            match visited {
                Ok(()) => count += 1,
                Err(payload) => {
                    error!(pool = %self.name, "status iteration aborted: {}", panic_message(payload.as_ref()));
                    break;
                }
            }
        }
        count
    }

    /// Stop and join every worker. Only safe once no further work will be
    /// handed out; a worker busy with a long action delays the join.
    pub fn stop_all(&self) {
        let Some(workers) = lock(&self.workers).take() else {
            return;
        };
        info!(pool = %self.name, workers = workers.len(), "stopping thread pool");
        for worker in &workers {
            worker.in_use.store(true, Ordering::SeqCst);
            lock(&worker.slot).should_stop = true;
            worker.wakeup.notify_all();
        }
        for worker in &workers {
            let handle = lock(&worker.handle).take();
            if let Some(handle) = handle {
                if handle.thread().id() == std::thread::current().id() {
                    warn!(worker = %worker.name, "stop_all called from a pooled thread, not joining it");
                    continue;
                }
                if handle.join().is_err() {
                    error!(worker = %worker.name, "pooled thread panicked");
                }
            }
        }
    }
}

#[derive(Default)]
struct WorkerSlot {
    assignment: Option<Arc<SchedulableObject>>,
    started: bool,
    is_running: bool,
    should_stop: bool,
}

/// A reusable worker. Runs its assignment, then continuations from the same
/// scheduler until the slice is used up, then goes idle.
pub(crate) struct PooledThread {
    name: String,
    in_use: AtomicBool,
    slot: Mutex<WorkerSlot>,
    wakeup: Condvar,
    current: Mutex<Option<Arc<SchedulableObject>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    continuation_slice: Duration,
}

impl PooledThread {
    /// Hand the worker its next unit, spawning the OS thread on first use.
    pub(crate) fn start_running(self: &Arc<Self>, unit: Arc<SchedulableObject>) -> Result<(), ThreadError> {
        let mut slot = lock(&self.slot);
        if slot.is_running {
            return Err(ThreadError::WorkerBusy(self.name.clone()));
        }
        slot.assignment = Some(unit);
        slot.is_running = true;
        if slot.started {
            self.wakeup.notify_one();
            return Ok(());
        }

        let worker = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                slot.started = true;
                *lock(&self.handle) = Some(handle);
                Ok(())
            }
            Err(e) => {
                slot.assignment = None;
                slot.is_running = false;
                self.in_use.store(false, Ordering::SeqCst);
                Err(ThreadError::Spawn(e))
            }
        }
    }

    fn run(&self) {
        loop {
            let unit = {
                let mut slot = lock(&self.slot);
                loop {
                    if slot.should_stop {
                        debug!(worker = %self.name, "pooled thread exiting");
                        return;
                    }
                    if let Some(unit) = slot.assignment.take() {
                        break unit;
                    }
                    slot = wait(&self.wakeup, slot);
                }
            };
            self.continuation_loop(unit);
        }
    }

    fn continuation_loop(&self, first: Arc<SchedulableObject>) {
        let started = Instant::now();
        let mut next = Some(first);
        let mut last = None;

        while let Some(unit) = next.take() {
            *lock(&self.current) = Some(Arc::clone(&unit));
            unit.claim();

            blocking::set_current(Some(Arc::clone(&unit)));
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| unit.run_action()));
            blocking::set_current(None);

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(worker = %self.name, schedulable = %unit.name(), "Uncaught error in pooled thread: {e:#}");
                }
                Err(payload) => {
                    error!(
                        worker = %self.name,
                        schedulable = %unit.name(),
                        "Uncaught panic in pooled thread: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }

            let reuse = started.elapsed() < self.continuation_slice;
            next = unit.reclaim(reuse);
            last = Some(unit);
        }

        *lock(&self.current) = None;
        lock(&self.slot).is_running = false;
        self.in_use.store(false, Ordering::SeqCst);

        // Return the right only after the worker is idle again.
        if let Some(unit) = last {
            unit.add_to_reclaimer();
        }
    }
}
