use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

use crate::schedulable::{Schedulable, SchedulableObject};

use super::Scheduler;

/// A unit chosen to receive a freed right, plus the scheduler that will
/// hold the right on its behalf one level down.
pub struct Handoff {
    pub(crate) unit: Arc<SchedulableObject>,
    pub(crate) consumer: String,
}

impl Handoff {
    pub fn schedulable(&self) -> &dyn Schedulable {
        self.unit.as_ref()
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

impl std::fmt::Debug for Handoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handoff")
            .field("schedulable", &self.unit.name())
            .field("consumer", &self.consumer)
            .finish()
    }
}

/// Chooses where a freed right goes: this scheduler's own queue or one of
/// its children.
///
/// Called while the scheduler holds a reservation for the right. An
/// implementation tries candidates through [`Scheduler::pop_local`] and
/// [`Scheduler::take_from_child`] and returns the first hit.
pub trait RightsSelector: Send + Sync {
    fn next_pending(&self, scheduler: &Scheduler) -> Option<Handoff>;
}

/// Rotates over {own queue, child 0, child 1, ...}, starting after the slot
/// that won last time.
///
/// The rotation index is not synchronized with the child list: a child added
/// mid-rotation may miss its first turn.
#[derive(Debug)]
pub struct RoundRobinSelector {
    /// -1 is the scheduler's own queue, otherwise a child index.
    current: AtomicIsize,
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            current: AtomicIsize::new(-1),
        }
    }
}

impl RightsSelector for RoundRobinSelector {
    fn next_pending(&self, scheduler: &Scheduler) -> Option<Handoff> {
        let children = scheduler.children();
        let len = children.len() as isize;
        let mut index = self.current.load(Ordering::Relaxed);
        if index >= len {
            index = -1;
        }
        let initial = index;

        loop {
            let handoff = if index == -1 {
                index = if len == 0 { -1 } else { 0 };
                self.current.store(index, Ordering::Relaxed);
                scheduler.pop_local()
            } else {
                let child = &children[index as usize];
                index += 1;
                if index == len {
                    index = -1;
                }
                self.current.store(index, Ordering::Relaxed);
                scheduler.take_from_child(child)
            };
            if handoff.is_some() {
                return handoff;
            }
            if index == initial {
                return None;
            }
        }
    }
}
