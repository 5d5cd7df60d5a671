use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::listener::ThreadListener;
use crate::schedulable::Schedulable;
use crate::sync::lock;

/// Per-consumer counters kept by [`SchedulerWatcher`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsumerStats {
    /// Units currently waiting in a queue.
    pub pending: usize,
    /// Rights currently held.
    pub outstanding: usize,
    pub queued_total: u64,
    pub runs_total: u64,
    pub mean_run: Duration,
    pub last_run: Option<DateTime<Utc>>,
}

impl ConsumerStats {
    fn record_run(&mut self, duration: Duration) {
        self.runs_total += 1;
        self.last_run = Some(Utc::now());

        // Incremental mean: new = prev + (x - prev) / n
        self.mean_run = if self.runs_total == 1 {
            duration
        } else {
            let prev = self.mean_run.as_nanos() as f64;
            let cur = duration.as_nanos() as f64;
            let mean = prev + (cur - prev) / self.runs_total as f64;
            Duration::from_nanos(mean as u64)
        };
    }
}

#[derive(Default)]
struct WatcherState {
    consumers: HashMap<String, ConsumerStats>,
    started: HashMap<(String, String), Instant>,
}

/// Listener that keeps running totals per consumer.
#[derive(Default)]
pub struct SchedulerWatcher {
    state: Mutex<WatcherState>,
}

impl SchedulerWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<String, ConsumerStats> {
        lock(&self.state).consumers.clone()
    }

    pub fn stats(&self, consumer: &str) -> Option<ConsumerStats> {
        lock(&self.state).consumers.get(consumer).cloned()
    }

    fn update(&self, consumer: &str, f: impl FnOnce(&mut ConsumerStats)) {
        let mut st = lock(&self.state);
        f(st.consumers.entry(consumer.to_string()).or_default());
    }
}

impl ThreadListener for SchedulerWatcher {
    fn thread_queued(&self, _schedulable: &dyn Schedulable, consumer: &str) {
        self.update(consumer, |s| {
            s.pending += 1;
            s.queued_total += 1;
        });
    }

    fn thread_dequeued(&self, _schedulable: &dyn Schedulable, consumer: &str) {
        self.update(consumer, |s| s.pending = s.pending.saturating_sub(1));
    }

    fn thread_started(&self, schedulable: &dyn Schedulable, consumer: &str) {
        lock(&self.state)
            .started
            .insert((consumer.to_string(), schedulable.name().to_string()), Instant::now());
    }

    fn thread_stopped(&self, schedulable: &dyn Schedulable, consumer: &str) {
        let mut st = lock(&self.state);
        let began = st
            .started
            .remove(&(consumer.to_string(), schedulable.name().to_string()));
        let stats = st.consumers.entry(consumer.to_string()).or_default();
        stats.record_run(began.map(|t| t.elapsed()).unwrap_or_default());
    }

    fn right_given(&self, consumer: &str) {
        self.update(consumer, |s| s.outstanding += 1);
    }

    fn right_returned(&self, consumer: &str) {
        self.update(consumer, |s| s.outstanding = s.outstanding.saturating_sub(1));
    }
}
