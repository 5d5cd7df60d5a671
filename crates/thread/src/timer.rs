//! The single timer thread shared by every schedulable in a runtime.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::sync::{lock, panic_message, wait, wait_timeout};

type Callback = Box<dyn Fn() + Send + Sync>;

/// Stand-in deadline for delays that overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(from: Instant, delay: Duration) -> Instant {
    from.checked_add(delay)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

struct TimerTask {
    callback: Callback,
    period: Option<Duration>,
    fixed_rate: bool,
    cancelled: AtomicBool,
}

/// Handle to a scheduled callback. Only the timer queue owns the task, so
/// a handle never keeps a fired or cancelled callback alive.
#[derive(Clone)]
pub struct TimerHandle(Weak<TimerTask>);

impl TimerHandle {
    /// Stop future firings. A callback already running is not interrupted.
    pub fn cancel(&self) {
        if let Some(task) = self.0.upgrade() {
            task.cancelled.store(true, AtomicOrdering::SeqCst);
        }
    }

    /// True once cancelled, or once the task has left the queue for good.
    pub fn is_cancelled(&self) -> bool {
        self.0
            .upgrade()
            .map_or(true, |task| task.cancelled.load(AtomicOrdering::SeqCst))
    }
}

struct Entry {
    due: Instant,
    seq: u64,
    task: Arc<TimerTask>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct TimerState {
    queue: BinaryHeap<Reverse<Entry>>,
    seq: u64,
    stopped: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

pub struct Timer {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    /// Start the timer thread.
    pub fn start(name: &str) -> Result<Self, std::io::Error> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::default()),
            wakeup: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&worker))?;
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Run `callback` once after `delay`.
    pub fn schedule(
        &self,
        delay: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Option<TimerHandle> {
        self.enqueue(delay, None, false, Box::new(callback))
    }

    /// Run `callback` after `delay`, then `interval` after each run completes.
    pub fn schedule_repeating(
        &self,
        delay: Duration,
        interval: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Option<TimerHandle> {
        self.enqueue(delay, Some(interval), false, Box::new(callback))
    }

    /// Run `callback` after `delay`, then every `interval` measured from the
    /// first scheduled time.
    pub fn schedule_at_fixed_rate(
        &self,
        delay: Duration,
        interval: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Option<TimerHandle> {
        self.enqueue(delay, Some(interval), true, Box::new(callback))
    }

    fn enqueue(
        &self,
        delay: Duration,
        period: Option<Duration>,
        fixed_rate: bool,
        callback: Callback,
    ) -> Option<TimerHandle> {
        let mut state = lock(&self.shared.state);
        if state.stopped {
            warn!("Ignoring timer schedule request, the timer has been stopped");
            return None;
        }
        let task = Arc::new(TimerTask {
            callback,
            period: period.filter(|p| !p.is_zero()),
            fixed_rate,
            cancelled: AtomicBool::new(false),
        });
        state.seq += 1;
        let seq = state.seq;
        state.queue.push(Reverse(Entry {
            due: deadline_after(Instant::now(), delay),
            seq,
            task: Arc::clone(&task),
        }));
        self.shared.wakeup.notify_one();
        Some(TimerHandle(Arc::downgrade(&task)))
    }

    pub fn pending(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    /// Stop the thread and drop every pending task. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.shared.state);
            state.stopped = true;
            state.queue.clear();
        }
        self.shared.wakeup.notify_all();
        if let Some(handle) = lock(&self.handle).take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("timer thread panicked");
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: &Shared) {
    let mut state = lock(&shared.state);
    loop {
        if state.stopped {
            debug!("timer thread exiting");
            return;
        }
        let now = Instant::now();
        let due = match state.queue.peek() {
            None => {
                state = wait(&shared.wakeup, state);
                continue;
            }
            Some(Reverse(next)) => next.due,
        };
        if due > now {
            state = wait_timeout(&shared.wakeup, state, due - now);
            continue;
        }
        let Some(Reverse(entry)) = state.queue.pop() else {
            continue;
        };
        if entry.task.cancelled.load(AtomicOrdering::SeqCst) {
            continue;
        }
        drop(state);

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (entry.task.callback)())) {
            error!("timer callback panicked: {}", panic_message(payload.as_ref()));
        }

        state = lock(&shared.state);
        if let Some(period) = entry.task.period {
            if !entry.task.cancelled.load(AtomicOrdering::SeqCst) && !state.stopped {
                let due = if entry.task.fixed_rate {
                    deadline_after(entry.due, period)
                } else {
                    deadline_after(Instant::now(), period)
                };
                state.seq += 1;
                let seq = state.seq;
                state.queue.push(Reverse(Entry {
                    due,
                    seq,
                    task: entry.task,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_for(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn one_shot_fires_once() {
        let timer = Timer::start("test-timer").unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        timer
            .schedule(Duration::from_millis(10), move || {
                f.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .unwrap();
        assert!(wait_for(Duration::from_secs(2), || fired.load(AtomicOrdering::SeqCst) == 1));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn repeating_fires_until_cancelled() {
        let timer = Timer::start("test-timer").unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let handle = timer
            .schedule_repeating(Duration::ZERO, Duration::from_millis(10), move || {
                f.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .unwrap();
        assert!(wait_for(Duration::from_secs(2), || fired.load(AtomicOrdering::SeqCst) >= 3));
        handle.cancel();
        std::thread::sleep(Duration::from_millis(30));
        let after_cancel = fired.load(AtomicOrdering::SeqCst);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), after_cancel);
    }

    #[test]
    fn earlier_deadline_runs_first() {
        let timer = Timer::start("test-timer").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&order), Arc::clone(&order));
        timer.schedule(Duration::from_millis(60), move || lock(&a).push("late"));
        timer.schedule(Duration::from_millis(10), move || lock(&b).push("early"));
        assert!(wait_for(Duration::from_secs(2), || lock(&order).len() == 2));
        assert_eq!(*lock(&order), vec!["early", "late"]);
    }

    #[test]
    fn panicking_callback_does_not_kill_the_thread() {
        let timer = Timer::start("test-timer").unwrap();
        timer.schedule(Duration::ZERO, || panic!("bad callback"));
        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        timer.schedule(Duration::from_millis(20), move || f.store(true, AtomicOrdering::SeqCst));
        assert!(wait_for(Duration::from_secs(2), || fired.load(AtomicOrdering::SeqCst)));
    }

    #[test]
    fn huge_delays_do_not_overflow() {
        let timer = Timer::start("test-timer").unwrap();
        let far = timer.schedule(Duration::MAX, || {}).unwrap();
        assert_eq!(timer.pending(), 1);
        assert!(!far.is_cancelled());

        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        timer
            .schedule_at_fixed_rate(Duration::ZERO, Duration::MAX, move || {
                f.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .unwrap();
        assert!(wait_for(Duration::from_secs(2), || fired.load(AtomicOrdering::SeqCst) == 1));
        // Re-armed far in the future, next to the first entry.
        assert!(wait_for(Duration::from_secs(2), || timer.pending() == 2));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn handle_does_not_outlive_a_fired_one_shot() {
        let timer = Timer::start("test-timer").unwrap();
        let payload = Arc::new(());
        let held = Arc::clone(&payload);
        let handle = timer
            .schedule(Duration::ZERO, move || drop(Arc::clone(&held)))
            .unwrap();
        assert!(wait_for(Duration::from_secs(2), || Arc::strong_count(&payload) == 1));
        assert!(handle.is_cancelled());
        handle.cancel();
    }

    #[test]
    fn stopped_timer_rejects_new_work() {
        let timer = Timer::start("test-timer").unwrap();
        timer.stop();
        assert!(timer.schedule(Duration::ZERO, || {}).is_none());
        timer.stop();
    }
}
