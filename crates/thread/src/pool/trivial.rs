use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use cougaar_core::ThreadError;
use tracing::{debug, error};

use crate::schedulable::{Schedulable, TrivialSchedulable};
use crate::sync::{lock, panic_message, wait};

/// Executes trivial units. Implemented by the unbounded pool and by the
/// single serial thread.
pub(crate) trait TrivialRunner: Send + Sync {
    fn execute(&self, unit: Arc<TrivialSchedulable>) -> Result<(), ThreadError>;

    fn iterate_over_running(&self, body: &mut dyn FnMut(&dyn Schedulable)) -> usize;

    fn iterate_over_queued(&self, _body: &mut dyn FnMut(&dyn Schedulable)) -> usize {
        0
    }

    fn generate_name(&self) -> String;

    fn stop(&self);
}

fn run_unit(unit: &TrivialSchedulable, runner: &str) {
    if !unit.begin_run() {
        debug!(schedulable = %unit.name(), "skipping cancelled or suspended unit");
        return;
    }
    match panic::catch_unwind(AssertUnwindSafe(|| unit.run_action())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(runner, schedulable = %unit.name(), "Uncaught error in runner thread: {e:#}"),
        Err(payload) => error!(
            runner,
            schedulable = %unit.name(),
            "Uncaught panic in runner thread: {}",
            panic_message(payload.as_ref())
        ),
    }
    unit.thread_stop();
}

// ── Unbounded pool ──────────────────────────────────────────────────

#[derive(Default)]
struct RunnerSlot {
    assignment: Option<Arc<TrivialSchedulable>>,
    current: Option<Arc<TrivialSchedulable>>,
    should_stop: bool,
}

struct RunnerThread {
    name: String,
    in_use: AtomicBool,
    slot: Mutex<RunnerSlot>,
    wakeup: Condvar,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RunnerThread {
    fn run(&self) {
        loop {
            let unit = {
                let mut slot = lock(&self.slot);
                loop {
                    if slot.should_stop {
                        return;
                    }
                    if let Some(unit) = slot.assignment.take() {
                        slot.current = Some(Arc::clone(&unit));
                        break unit;
                    }
                    slot = wait(&self.wakeup, slot);
                }
            };
            run_unit(&unit, &self.name);
            lock(&self.slot).current = None;
            self.in_use.store(false, Ordering::SeqCst);
        }
    }
}

/// Unbounded pool of runner threads; every start runs immediately.
pub(crate) struct TrivialThreadPool {
    runners: Mutex<Option<Vec<Arc<RunnerThread>>>>,
    created: AtomicUsize,
    unnamed: AtomicUsize,
}

impl TrivialThreadPool {
    pub(crate) fn new() -> Self {
        Self {
            runners: Mutex::new(Some(Vec::new())),
            created: AtomicUsize::new(0),
            unnamed: AtomicUsize::new(0),
        }
    }

    fn acquire(&self) -> Result<Arc<RunnerThread>, ThreadError> {
        let mut guard = lock(&self.runners);
        let runners = guard
            .as_mut()
            .ok_or_else(|| ThreadError::PoolStopped("trivial".into()))?;
        if let Some(runner) = runners.iter().find(|r| {
            r.in_use
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }) {
            return Ok(Arc::clone(runner));
        }

        let index = self.created.fetch_add(1, Ordering::Relaxed);
        let runner = Arc::new(RunnerThread {
            name: format!("TrivialThread-{index}"),
            in_use: AtomicBool::new(true),
            slot: Mutex::new(RunnerSlot::default()),
            wakeup: Condvar::new(),
            handle: Mutex::new(None),
        });
        let thread = Arc::clone(&runner);
        let handle = std::thread::Builder::new()
            .name(runner.name.clone())
            .spawn(move || thread.run())?;
        *lock(&runner.handle) = Some(handle);
        runners.push(Arc::clone(&runner));
        Ok(runner)
    }
}

impl TrivialRunner for TrivialThreadPool {
    fn execute(&self, unit: Arc<TrivialSchedulable>) -> Result<(), ThreadError> {
        let runner = self.acquire()?;
        lock(&runner.slot).assignment = Some(unit);
        runner.wakeup.notify_one();
        Ok(())
    }

    fn iterate_over_running(&self, body: &mut dyn FnMut(&dyn Schedulable)) -> usize {
        let runners: Vec<_> = lock(&self.runners).clone().unwrap_or_default();
        let mut count = 0;
        for runner in runners {
            let current = lock(&runner.slot).current.clone();
            if let Some(unit) = current {
                body(unit.as_ref());
                count += 1;
            }
        }
        count
    }

    fn generate_name(&self) -> String {
        let n = self.unnamed.fetch_add(1, Ordering::Relaxed);
        format!("TrivialThread-{n}")
    }

    fn stop(&self) {
        let Some(runners) = lock(&self.runners).take() else {
            return;
        };
        for runner in &runners {
            lock(&runner.slot).should_stop = true;
            runner.wakeup.notify_all();
        }
        for runner in &runners {
            if let Some(handle) = lock(&runner.handle).take() {
                if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                    error!(runner = %runner.name, "runner thread panicked");
                }
            }
        }
    }
}

// ── Single serial thread ────────────────────────────────────────────

#[derive(Default)]
struct SerialState {
    queue: VecDeque<Arc<TrivialSchedulable>>,
    current: Option<Arc<TrivialSchedulable>>,
    stopped: bool,
}

struct SerialShared {
    state: Mutex<SerialState>,
    wakeup: Condvar,
}

/// Runs every start, in arrival order, on one thread.
pub(crate) struct SerialThreadQueue {
    shared: Arc<SerialShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    unnamed: AtomicUsize,
}

impl SerialThreadQueue {
    pub(crate) fn start() -> Result<Self, ThreadError> {
        let shared = Arc::new(SerialShared {
            state: Mutex::new(SerialState::default()),
            wakeup: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("SerialThreadRunner".into())
            .spawn(move || serial_loop(&worker))?;
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
            unnamed: AtomicUsize::new(0),
        })
    }
}

fn serial_loop(shared: &SerialShared) {
    loop {
        let unit = {
            let mut state = lock(&shared.state);
            loop {
                if state.stopped {
                    return;
                }
                if let Some(unit) = state.queue.pop_front() {
                    state.current = Some(Arc::clone(&unit));
                    break unit;
                }
                state = wait(&shared.wakeup, state);
            }
        };
        run_unit(&unit, "SerialThreadRunner");
        lock(&shared.state).current = None;
    }
}

impl TrivialRunner for SerialThreadQueue {
    fn execute(&self, unit: Arc<TrivialSchedulable>) -> Result<(), ThreadError> {
        let mut state = lock(&self.shared.state);
        if state.stopped {
            return Err(ThreadError::PoolStopped("single".into()));
        }
        state.queue.push_back(unit);
        self.shared.wakeup.notify_one();
        Ok(())
    }

    fn iterate_over_running(&self, body: &mut dyn FnMut(&dyn Schedulable)) -> usize {
        let current = lock(&self.shared.state).current.clone();
        match current {
            Some(unit) => {
                body(unit.as_ref());
                1
            }
            None => 0,
        }
    }

    fn iterate_over_queued(&self, body: &mut dyn FnMut(&dyn Schedulable)) -> usize {
        let queued: Vec<_> = lock(&self.shared.state).queue.iter().cloned().collect();
        for unit in &queued {
            body(unit.as_ref());
        }
        queued.len()
    }

    fn generate_name(&self) -> String {
        let n = self.unnamed.fetch_add(1, Ordering::Relaxed);
        format!("SerialThread-{n}")
    }

    fn stop(&self) {
        {
            let mut state = lock(&self.shared.state);
            state.stopped = true;
            state.queue.clear();
        }
        self.shared.wakeup.notify_all();
        if let Some(handle) = lock(&self.handle).take() {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                error!("serial runner thread panicked");
            }
        }
    }
}
