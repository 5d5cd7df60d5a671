use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cougaar_core::Lane;
use tracing::debug;

use crate::control::ThreadControl;
use crate::listener::ThreadListener;
use crate::schedulable::{action, Schedulable};
use crate::service::ThreadService;
use crate::sync::lock;

use super::selector::{Handoff, RightsSelector, RoundRobinSelector};
use super::Scheduler;

/// Default share of rights a consumer is expected to hold.
pub const DEFAULT_TARGET: f64 = 0.05;

const SNAPSHOT_DELAY: Duration = Duration::from_secs(5);
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct ConsumerRecord {
    outstanding: usize,
    last_change: Instant,
    /// Rights held, integrated over time (right-milliseconds).
    accumulator: f64,
    snapshot_at: Instant,
    snapshot_accumulator: f64,
    rate: f64,
    target: f64,
}

impl ConsumerRecord {
    fn new(target: f64, now: Instant) -> Self {
        Self {
            outstanding: 0,
            last_change: now,
            accumulator: 0.0,
            snapshot_at: now,
            snapshot_accumulator: 0.0,
            rate: 0.0,
            target,
        }
    }

    fn accumulate(&mut self, now: Instant) {
        let held_ms = now.saturating_duration_since(self.last_change).as_secs_f64() * 1000.0;
        self.accumulator += self.outstanding as f64 * held_ms;
        self.last_change = now;
    }

    fn snapshot(&mut self, now: Instant) {
        self.accumulate(now);
        let window_ms = now.saturating_duration_since(self.snapshot_at).as_secs_f64() * 1000.0;
        if window_ms > 0.0 {
            self.rate = (self.accumulator - self.snapshot_accumulator) / window_ms;
        }
        self.snapshot_at = now;
        self.snapshot_accumulator = self.accumulator;
    }

    /// How far below its target the consumer is, relative to the target.
    fn distance(&self) -> f64 {
        (self.target - self.rate) / self.target
    }
}

/// Prefers whichever candidate is furthest below its target share of
/// rights. Until the first snapshot it behaves like round-robin.
///
/// Must be registered as a listener on the same node and lane it selects
/// for, so it sees the rights it hands out; [`PercentageLoadSelector::install`]
/// does both.
pub struct PercentageLoadSelector {
    targets: HashMap<String, f64>,
    default_target: f64,
    records: Mutex<HashMap<String, ConsumerRecord>>,
    ranked: AtomicBool,
    fallback: RoundRobinSelector,
}

impl PercentageLoadSelector {
    pub fn new(targets: HashMap<String, f64>) -> Self {
        Self {
            targets,
            default_target: DEFAULT_TARGET,
            records: Mutex::new(HashMap::new()),
            ranked: AtomicBool::new(false),
            fallback: RoundRobinSelector::new(),
        }
    }

    fn target_for(&self, consumer: &str) -> f64 {
        self.targets.get(consumer).copied().unwrap_or(self.default_target)
    }

    fn with_record(&self, consumer: &str, f: impl FnOnce(&mut ConsumerRecord, Instant)) {
        let now = Instant::now();
        let mut records = lock(&self.records);
        let record = records
            .entry(consumer.to_string())
            .or_insert_with(|| ConsumerRecord::new(self.target_for(consumer), now));
        f(record, now);
    }

    /// Recompute every consumer's rate over the window since the last call.
    pub fn snapshot(&self) {
        let now = Instant::now();
        for record in lock(&self.records).values_mut() {
            record.snapshot(now);
        }
        self.ranked.store(true, Ordering::SeqCst);
    }

    /// Distance of `consumer` from its target; consumers never seen are
    /// treated as starved.
    pub fn distance(&self, consumer: &str) -> f64 {
        lock(&self.records).get(consumer).map_or(1.0, ConsumerRecord::distance)
    }

    /// Install on `control`'s node for `lane`: select rights, listen for
    /// grants, and snapshot periodically on a unit from `service`. The
    /// returned unit must be kept alive for the snapshots to continue.
    pub fn install(
        self: &Arc<Self>,
        service: &dyn ThreadService,
        control: &ThreadControl,
        lane: Lane,
    ) -> Arc<dyn Schedulable> {
        control.set_rights_selector(lane, Arc::clone(self) as Arc<dyn RightsSelector>);
        control
            .listeners()
            .add_listener(Arc::clone(self) as Arc<dyn ThreadListener>, lane);

        let selector = Arc::clone(self);
        let snapshotter = service.get_thread_named(
            "PercentageLoadSelector",
            action(move || {
                selector.snapshot();
                Ok(())
            }),
            "LoadSnapshotter",
        );
        snapshotter.schedule_repeating(SNAPSHOT_DELAY, SNAPSHOT_INTERVAL);
        snapshotter
    }
}

impl RightsSelector for PercentageLoadSelector {
    fn next_pending(&self, scheduler: &Scheduler) -> Option<Handoff> {
        if !self.ranked.load(Ordering::SeqCst) {
            return self.fallback.next_pending(scheduler);
        }

        let mut candidates: Vec<(f64, Option<Arc<Scheduler>>)> = scheduler
            .children()
            .into_iter()
            .map(|child| (self.distance(child.name()), Some(child)))
            .collect();
        candidates.push((self.distance(scheduler.name()), None));
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        for (distance, candidate) in candidates {
            let handoff = match &candidate {
                None => scheduler.pop_local(),
                Some(child) => scheduler.take_from_child(child),
            };
            if let Some(handoff) = handoff {
                debug!(scheduler = %scheduler, consumer = handoff.consumer(), distance, "percentage selection");
                return Some(handoff);
            }
        }
        None
    }
}

impl ThreadListener for PercentageLoadSelector {
    fn right_given(&self, consumer: &str) {
        self.with_record(consumer, |record, now| {
            record.accumulate(now);
            record.outstanding += 1;
        });
    }

    fn right_returned(&self, consumer: &str) {
        self.with_record(consumer, |record, now| {
            record.accumulate(now);
            record.outstanding = record.outstanding.saturating_sub(1);
        });
    }
}
