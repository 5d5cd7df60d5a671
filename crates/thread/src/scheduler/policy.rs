use std::cmp::Ordering;
use std::sync::Arc;

use crate::schedulable::Schedulable;

use super::Scheduler;

/// Ordering of a scheduler's pending queue.
pub type QueueComparator = Arc<dyn Fn(&dyn Schedulable, &dyn Schedulable) -> Ordering + Send + Sync>;

/// Decides whether a unit may be scheduled at all. Rejected units are parked
/// until the qualifier is cleared.
///
/// Called with the scheduler's lock held: implementations must not call back
/// into the scheduler.
pub trait Qualifier: Send + Sync {
    fn qualify(&self, schedulable: &dyn Schedulable) -> bool;
}

impl<F> Qualifier for F
where
    F: Fn(&dyn Schedulable) -> bool + Send + Sync,
{
    fn qualify(&self, schedulable: &dyn Schedulable) -> bool {
        self(schedulable)
    }
}

/// Decides whether `parent` may hand a right down to `child`.
pub trait ChildQualifier: Send + Sync {
    fn admit(&self, parent: &Scheduler, child: &Scheduler) -> bool;
}

impl<F> ChildQualifier for F
where
    F: Fn(&Scheduler, &Scheduler) -> bool + Send + Sync,
{
    fn admit(&self, parent: &Scheduler, child: &Scheduler) -> bool {
        self(parent, child)
    }
}

/// Caps the share of a parent's capacity any single child may hold.
#[derive(Debug, Clone, Copy)]
pub struct ShareCap {
    pub max_share: f64,
}

impl ShareCap {
    pub fn new(max_share: f64) -> Self {
        Self { max_share }
    }
}

impl ChildQualifier for ShareCap {
    fn admit(&self, parent: &Scheduler, child: &Scheduler) -> bool {
        let Some(capacity) = parent.max_running_thread_count() else {
            return true;
        };
        let allowed = ((capacity as f64) * self.max_share).ceil().max(1.0) as usize;
        child.running_thread_count() < allowed
    }
}
