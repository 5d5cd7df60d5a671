use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use cougaar_core::{Lane, ThreadError};
use tracing::{error, warn};

use super::{Action, Schedulable, SchedulableState, SuspendCallback};
use crate::blocking::BlockingStatus;
use crate::pool::TrivialRunner;
use crate::sync::lock;
use crate::timer::{Timer, TimerHandle};

#[derive(Default)]
struct TrivialState {
    start_count: usize,
    cancelled: bool,
    waiting: bool,
    running: bool,
    suspending: bool,
    suspended: bool,
    suspend_callback: Option<SuspendCallback>,
    timer: Option<TimerHandle>,
    timestamp: Option<Instant>,
}

/// Unit of work for the trivial and single-thread services. There is no
/// admission control: every start is handed straight to the runner.
pub(crate) struct TrivialSchedulable {
    me: Weak<TrivialSchedulable>,
    name: String,
    consumer: String,
    lane: Lane,
    action: Action,
    runner: Arc<dyn TrivialRunner>,
    timer: Arc<Timer>,
    state: Mutex<TrivialState>,
}

impl TrivialSchedulable {
    pub(crate) fn new(
        name: String,
        consumer: String,
        lane: Lane,
        action: Action,
        runner: Arc<dyn TrivialRunner>,
        timer: Arc<Timer>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            name,
            consumer,
            lane,
            action,
            runner,
            timer,
            state: Mutex::new(TrivialState::default()),
        })
    }

    fn thread_start(&self) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        {
            let mut st = lock(&self.state);
            st.start_count = 1;
            st.waiting = true;
            st.timestamp = Some(Instant::now());
        }
        if let Err(e) = self.runner.execute(me) {
            let mut st = lock(&self.state);
            st.waiting = false;
            st.start_count = 0;
            drop(st);
            error!(schedulable = %self.name, error = %e, "Unrecoverable thread pool error");
        }
    }

    /// Called by the runner right before the action. False means the unit
    /// was cancelled or suspended while waiting and must be skipped. A
    /// suspended unit keeps its start so `resume()` runs it once.
    pub(crate) fn begin_run(&self) -> bool {
        let mut st = lock(&self.state);
        st.waiting = false;
        if st.cancelled || st.suspended {
            return false;
        }
        st.running = true;
        st.timestamp = Some(Instant::now());
        true
    }

    pub(crate) fn run_action(&self) -> anyhow::Result<()> {
        (self.action)()
    }

    /// Called by the runner after the action returned.
    pub(crate) fn thread_stop(&self) {
        let (callback, restart) = {
            let mut st = lock(&self.state);
            st.running = false;
            let callback = if st.suspending {
                st.suspending = false;
                st.suspended = true;
                st.suspend_callback.take()
            } else {
                None
            };
            st.start_count = st.start_count.saturating_sub(1);
            let restart = st.start_count > 0 && !st.suspended && !st.cancelled;
            (callback, restart)
        };
        if let Some(callback) = callback {
            callback(self);
        }
        if restart {
            self.thread_start();
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

impl Schedulable for TrivialSchedulable {
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
        let run = {
            let mut st = lock(&self.state);
            if st.cancelled {
                return;
            }
            st.start_count += 1;
            st.start_count == 1 && !st.suspending && !st.suspended
        };
        if run {
            self.thread_start();
        }
    }

    fn cancel(&self) -> bool {
        self.cancel_timer();
        let mut st = lock(&self.state);
        st.cancelled = true;
        st.start_count = 0;
        !st.running
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
            !st.running && !st.waiting && st.start_count > 0 && !st.cancelled
        };
        if restart {
            self.thread_start();
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
        } else if st.running {
            SchedulableState::Running
        } else if st.waiting {
            SchedulableState::Pending
        } else {
            SchedulableState::Dormant
        }
    }

    fn timestamp(&self) -> Option<Instant> {
        lock(&self.state).timestamp
    }

    fn blocking(&self) -> Option<BlockingStatus> {
        None
    }
}
