use std::sync::{Arc, RwLock};

use cougaar_core::{Lane, LANE_COUNT};

use crate::schedulable::Schedulable;
use crate::sync::{read, write};

/// Observer of scheduler events. Every method has an empty default, so a
/// listener only implements what it cares about.
///
/// Callbacks run on whichever thread caused the event (a pooled thread,
/// the state-change thread, or a client thread) and never under a scheduler
/// lock. They must not block.
pub trait ThreadListener: Send + Sync {
    /// The unit was added to a pending queue.
    fn thread_queued(&self, _schedulable: &dyn Schedulable, _consumer: &str) {}

    /// The unit left a pending queue, either to run or because it was removed.
    fn thread_dequeued(&self, _schedulable: &dyn Schedulable, _consumer: &str) {}

    /// The unit's action is about to run on a pooled thread.
    fn thread_started(&self, _schedulable: &dyn Schedulable, _consumer: &str) {}

    /// The unit's action has returned.
    fn thread_stopped(&self, _schedulable: &dyn Schedulable, _consumer: &str) {}

    /// A right to run was granted to `consumer`, a scheduler name.
    fn right_given(&self, _consumer: &str) {}

    /// `consumer` returned a right.
    fn right_returned(&self, _consumer: &str) {}
}

/// Per-node fan-out of scheduler events to registered listeners, per lane.
pub struct ListenerProxy {
    lanes: Vec<RwLock<Vec<Arc<dyn ThreadListener>>>>,
}

impl Default for ListenerProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerProxy {
    pub fn new() -> Self {
        Self {
            lanes: (0..LANE_COUNT).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ThreadListener>, lane: Lane) {
        write(&self.lanes[lane.index()]).push(listener);
    }

    /// Register `listener` on every lane.
    pub fn add_listener_all_lanes(&self, listener: Arc<dyn ThreadListener>) {
        for lane in Lane::ALL {
            self.add_listener(Arc::clone(&listener), lane);
        }
    }

    /// Remove `listener` from `lane`. Returns whether it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ThreadListener>, lane: Lane) -> bool {
        let mut listeners = write(&self.lanes[lane.index()]);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self, lane: Lane) -> usize {
        read(&self.lanes[lane.index()]).len()
    }

    fn each(&self, lane: Lane, f: impl Fn(&dyn ThreadListener)) {
        let listeners: Vec<_> = read(&self.lanes[lane.index()]).clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }

    pub(crate) fn notify_queued(&self, lane: Lane, unit: &dyn Schedulable) {
        self.each(lane, |l| l.thread_queued(unit, unit.consumer()));
    }

    pub(crate) fn notify_dequeued(&self, lane: Lane, unit: &dyn Schedulable) {
        self.each(lane, |l| l.thread_dequeued(unit, unit.consumer()));
    }

    pub(crate) fn notify_started(&self, lane: Lane, unit: &dyn Schedulable) {
        self.each(lane, |l| l.thread_started(unit, unit.consumer()));
    }

    pub(crate) fn notify_stopped(&self, lane: Lane, unit: &dyn Schedulable) {
        self.each(lane, |l| l.thread_stopped(unit, unit.consumer()));
    }

    pub(crate) fn notify_right_given(&self, lane: Lane, consumer: &str) {
        self.each(lane, |l| l.right_given(consumer));
    }

    pub(crate) fn notify_right_returned(&self, lane: Lane, consumer: &str) {
        self.each(lane, |l| l.right_returned(consumer));
    }
}
