use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use cougaar_core::{Lane, ThreadError};
use tracing::{debug, error, warn};

use super::{Action, Schedulable, SchedulableState, SuspendCallback};
use crate::blocking::BlockingStatus;
use crate::pool::ThreadPool;
use crate::scheduler::Scheduler;
use crate::sync::lock;
use crate::timer::{Timer, TimerHandle};
use crate::transitions::StateChangeQueue;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_QUEUE_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct UnitState {
    /// Outstanding start requests; only the 0 -> 1 transition schedules.
    start_count: usize,
    cancelled: bool,
    queued: bool,
    running: bool,
    disqualified: bool,
    suspending: bool,
    suspended: bool,
    suspend_callback: Option<SuspendCallback>,
    timer: Option<TimerHandle>,
    blocking: Option<BlockingStatus>,
    timestamp: Option<Instant>,
    queue_seq: u64,
}

/// A unit of work scheduled through one lane scheduler of a tree node.
///
/// All transitions that need a right to run (starting, restarting, handing
/// the right back) go through the runtime's [`StateChangeQueue`], so the
/// scheduler never sees two transitions for the same unit at once.
pub(crate) struct SchedulableObject {
    id: u64,
    me: Weak<SchedulableObject>,
    name: String,
    consumer: String,
    lane: Lane,
    action: Action,
    scheduler: Arc<Scheduler>,
    pool: Arc<ThreadPool>,
    transitions: Arc<StateChangeQueue>,
    timer: Arc<Timer>,
    state: Mutex<UnitState>,
}

impl PartialEq for SchedulableObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl SchedulableObject {
    pub(crate) fn new(
        name: String,
        consumer: String,
        action: Action,
        scheduler: Arc<Scheduler>,
        pool: Arc<ThreadPool>,
        transitions: Arc<StateChangeQueue>,
        timer: Arc<Timer>,
    ) -> Arc<Self> {
        let lane = scheduler.lane();
        Arc::new_cyclic(|me| Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            me: me.clone(),
            name,
            consumer,
            lane,
            action,
            scheduler,
            pool,
            transitions,
            timer,
            state: Mutex::new(UnitState::default()),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        lock(&self.state).cancelled
    }

    pub(crate) fn is_queued(&self) -> bool {
        lock(&self.state).queued
    }

    /// Enqueue order key used by the default comparator.
    pub(crate) fn queue_seq(&self) -> u64 {
        lock(&self.state).queue_seq
    }

    // ── Scheduler hooks ─────────────────────────────────────────────

    /// Flag the unit as pending. Called with the scheduler lock held.
    /// Refuses cancelled units so a racing `cancel()` always wins.
    pub(crate) fn mark_queued(&self) -> bool {
        let mut st = lock(&self.state);
        if st.cancelled {
            return false;
        }
        st.queued = true;
        st.timestamp = Some(Instant::now());
        st.queue_seq = NEXT_QUEUE_SEQ.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub(crate) fn clear_queued(&self) {
        lock(&self.state).queued = false;
    }

    pub(crate) fn set_disqualified(&self, disqualified: bool) {
        let mut st = lock(&self.state);
        st.disqualified = disqualified;
        if disqualified {
            st.queued = false;
        }
    }

    /// Re-submit a unit that was parked by a qualifier.
    pub(crate) fn requalify(&self) {
        self.set_disqualified(false);
        self.push_start();
    }

    /// Serializer entry for a start transition.
    pub(crate) fn process_start(self: &Arc<Self>) {
        if self.is_cancelled() {
            debug!(schedulable = %self.name, "dropping start of cancelled unit");
            return;
        }
        self.scheduler.start_or_queue(self);
    }

    /// A right to run has been granted for this unit: bind it to a worker.
    ///
    /// If the unit can no longer use the right (cancelled, suspended, or
    /// somehow already running) the right goes straight back.
    pub(crate) fn thread_start(&self) {
        let Some(me) = self.me.upgrade() else {
            self.scheduler.release_rights(self.scheduler.name());
            return;
        };
        let mut st = lock(&self.state);
        st.queued = false;
        if st.cancelled || st.suspended || st.suspending {
            drop(st);
            debug!(schedulable = %self.name, "returning right granted to an inactive unit");
            self.scheduler.release_rights(self.scheduler.name());
            return;
        }
        if st.running {
            drop(st);
            error!(schedulable = %self.name, "thread_start on a unit that already has a thread");
            self.scheduler.release_rights(self.scheduler.name());
            return;
        }

        // Forget any start() calls that arrived while we were pending.
        st.start_count = 1;
        st.running = true;
        st.timestamp = Some(Instant::now());

        let started = self
            .pool
            .acquire(&self.name)
            .and_then(|worker| worker.start_running(me));
        if let Err(e) = started {
            st.running = false;
            st.start_count = 0;
            drop(st);
            error!(schedulable = %self.name, error = %e, "Unrecoverable thread pool error");
            self.scheduler.release_rights(self.scheduler.name());
        }
    }

    /// The worker is about to run the action.
    pub(crate) fn claim(&self) {
        self.scheduler.listeners().notify_started(self.lane, self);
    }

    pub(crate) fn run_action(&self) -> anyhow::Result<()> {
        (self.action)()
    }

    /// Claim this queued unit as the continuation of another run on the
    /// same worker. Units that were cancelled or suspended while queued
    /// are skipped.
    pub(crate) fn begin_continuation(&self) -> bool {
        let mut st = lock(&self.state);
        st.queued = false;
        if st.cancelled || st.suspended || st.suspending {
            return false;
        }
        st.running = true;
        st.start_count = 1;
        st.timestamp = Some(Instant::now());
        true
    }

    /// The action has returned. Returns the next unit to run on this worker
    /// when `reuse` is set and the scheduler has one queued; that unit
    /// inherits this unit's right.
    pub(crate) fn reclaim(&self, reuse: bool) -> Option<Arc<SchedulableObject>> {
        self.scheduler.listeners().notify_stopped(self.lane, self);
        let continuation = if reuse {
            self.scheduler.continuation()
        } else {
            None
        };

        let callback = {
            let mut st = lock(&self.state);
            st.blocking = None;
            if st.suspending {
                st.suspending = false;
                st.suspended = true;
                st.suspend_callback.take()
            } else {
                None
            }
        };

        // With no continuation the right is returned later, through the
        // serializer, and `end` runs there.
        if continuation.is_some() {
            self.end();
        }
        if let Some(callback) = callback {
            callback(self);
        }
        continuation
    }

    /// Queue the reclaim transition for the last unit a worker ran.
    pub(crate) fn add_to_reclaimer(self: &Arc<Self>) {
        self.transitions.push_reclaim(Arc::clone(self));
    }

    /// Serializer entry for a reclaim transition.
    pub(crate) fn reclaim_notify(&self) {
        self.scheduler.release_rights(self.scheduler.name());
        self.end();
    }

    fn end(&self) {
        let restart = {
            let mut st = lock(&self.state);
            st.running = false;
            st.blocking = None;
            st.start_count = st.start_count.saturating_sub(1);
            st.start_count > 0 && !st.cancelled && !st.suspended && !st.suspending
        };
        if restart {
            self.push_start();
        }
    }

    fn push_start(&self) {
        if let Some(me) = self.me.upgrade() {
            self.transitions.push_start(me);
        }
    }

    pub(crate) fn set_blocking(&self, status: Option<BlockingStatus>) {
        let mut st = lock(&self.state);
        if st.running {
            st.blocking = status;
        }
    }

    /// The armed task owns the unit, so a unit with a live timer keeps
    /// firing after its last handle is dropped, until `cancel_timer()`,
    /// `cancel()` or shutdown.
    fn install_timer(&self, arm: impl FnOnce(&Timer, Box<dyn Fn() + Send + Sync>) -> Option<TimerHandle>) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let handle = arm(&self.timer, Box::new(move || me.start()));
        let previous = std::mem::replace(&mut lock(&self.state).timer, handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }
}

impl Schedulable for SchedulableObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn consumer(&self) -> &str {
        &self.consumer
    }

    fn lane(&self) -> Lane {
        self.lane
    }

    fn start(&self) {
        let schedule = {
            let mut st = lock(&self.state);
            if st.cancelled {
                return;
            }
            st.start_count += 1;
            st.start_count == 1 && !st.suspending && !st.suspended
        };
        if schedule {
            self.push_start();
        }
    }

    fn cancel(&self) -> bool {
        self.cancel_timer();
        let (running, queued, disqualified) = {
            let mut st = lock(&self.state);
            st.cancelled = true;
            st.start_count = 0;
            (st.running, st.queued, st.disqualified)
        };
        if running {
            return false;
        }
        if queued || disqualified {
            if let Some(me) = self.me.upgrade() {
                self.scheduler.dequeue(&me);
            }
            self.clear_queued();
        }
        true
    }

    fn suspend(&self, callback: SuspendCallback) -> Result<(), ThreadError> {
        let immediate = {
            let mut st = lock(&self.state);
            if !st.running {
                st.suspended = true;
                Some(callback)
            } else if st.suspending {
                return Err(ThreadError::SuspendPending(self.name.clone()));
            } else {
                st.suspending = true;
                st.suspend_callback = Some(callback);
                None
            }
        };
        if let Some(callback) = immediate {
            callback(self);
        }
        Ok(())
    }

    fn resume(&self) {
        let restart = {
            let mut st = lock(&self.state);
            if !st.suspended {
                drop(st);
                warn!(schedulable = %self.name, "resume() called on a unit that is not suspended");
                return;
            }
            st.suspended = false;
            // A unit still finishing its last run restarts from end().
            !st.running && st.start_count > 0 && !st.cancelled
        };
        if restart {
            self.push_start();
        }
    }

    fn schedule(&self, delay: Duration) {
        self.install_timer(|timer, cb| timer.schedule(delay, cb));
    }

    fn schedule_repeating(&self, delay: Duration, interval: Duration) {
        self.install_timer(|timer, cb| timer.schedule_repeating(delay, interval, cb));
    }

    fn schedule_at_fixed_rate(&self, delay: Duration, interval: Duration) {
        self.install_timer(|timer, cb| timer.schedule_at_fixed_rate(delay, interval, cb));
    }

    fn cancel_timer(&self) {
        if let Some(handle) = lock(&self.state).timer.take() {
            handle.cancel();
        }
    }

    fn state(&self) -> SchedulableState {
        let st = lock(&self.state);
        if st.suspended {
            SchedulableState::Suspended
        } else if st.disqualified {
            SchedulableState::Disqualified
        } else if st.queued {
            SchedulableState::Pending
        } else if st.running {
            SchedulableState::Running
        } else {
            SchedulableState::Dormant
        }
    }

    fn timestamp(&self) -> Option<Instant> {
        lock(&self.state).timestamp
    }

    fn blocking(&self) -> Option<BlockingStatus> {
        lock(&self.state).blocking.clone()
    }
}
