use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, error};

use crate::schedulable::{Schedulable, SchedulableObject};
use crate::sync::lock;

use super::core::SchedulerState;
use super::policy::{ChildQualifier, Qualifier};
use super::Scheduler;

impl Scheduler {
    /// Run `unit` now if a right is available, otherwise queue it.
    ///
    /// A unit that fails the qualifier is parked; a unit arriving behind a
    /// non-empty queue waits its turn without asking for a right.
    pub(crate) fn start_or_queue(&self, unit: &Arc<SchedulableObject>) {
        let queued_behind = {
            let mut st = lock(&self.state);
            if let Some(qualifier) = st.qualifier.clone() {
                if !qualifier.qualify(unit.as_ref()) {
                    debug!(scheduler = %self, schedulable = %unit.name(), "unit disqualified");
                    unit.set_disqualified(true);
                    if !st.disqualified.iter().any(|u| u.id() == unit.id()) {
                        st.disqualified.push(Arc::clone(unit));
                    }
                    return;
                }
            }
            if st.pending.is_empty() {
                None
            } else {
                Some(Self::enqueue_locked(&mut st, unit))
            }
        };

        match queued_behind {
            Some(true) => self.after_enqueue(unit),
            Some(false) => {}
            None => {
                if self.request_rights(self) {
                    unit.thread_start();
                } else {
                    self.enqueue(unit);
                }
            }
        }
    }

    fn enqueue_locked(st: &mut SchedulerState, unit: &Arc<SchedulableObject>) -> bool {
        if st.pending.contains(unit) || !unit.mark_queued() {
            return false;
        }
        st.pending.add(Arc::clone(unit))
    }

    /// Add `unit` to the pending queue. Returns false if it was already
    /// queued or has been cancelled.
    pub(crate) fn enqueue(&self, unit: &Arc<SchedulableObject>) -> bool {
        let added = Self::enqueue_locked(&mut lock(&self.state), unit);
        if added {
            self.after_enqueue(unit);
        }
        added
    }

    fn after_enqueue(&self, unit: &Arc<SchedulableObject>) {
        self.listeners.notify_queued(self.lane, unit.as_ref());
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.root().dispatch();
    }

    /// Remove `unit` from the pending queue or the disqualified list.
    pub(crate) fn dequeue(&self, unit: &Arc<SchedulableObject>) -> bool {
        let removed = {
            let mut st = lock(&self.state);
            let removed = st.pending.remove(unit);
            st.disqualified.retain(|u| u.id() != unit.id());
            removed
        };
        if removed {
            unit.clear_queued();
            self.listeners.notify_dequeued(self.lane, unit.as_ref());
        }
        removed
    }

    /// Install or clear the unit qualifier.
    ///
    /// Installing moves every queued unit it rejects to the disqualified
    /// list. Clearing re-submits each parked unit as one start request.
    /// Installing over an existing qualifier is refused.
    pub fn set_qualifier(&self, qualifier: Option<Arc<dyn Qualifier>>) -> bool {
        match qualifier {
            Some(qualifier) => {
                let rejected = {
                    let mut st = lock(&self.state);
                    if st.qualifier.is_some() {
                        drop(st);
                        error!(scheduler = %self, "qualifier already set, refusing to replace it");
                        return false;
                    }
                    let rejected = st.pending.filter(|u| qualifier.qualify(u.as_ref()));
                    for unit in &rejected {
                        unit.set_disqualified(true);
                    }
                    st.disqualified.extend(rejected.iter().cloned());
                    st.qualifier = Some(qualifier);
                    rejected
                };
                for unit in &rejected {
                    self.listeners.notify_dequeued(self.lane, unit.as_ref());
                }
                true
            }
            None => {
                let parked = {
                    let mut st = lock(&self.state);
                    st.qualifier = None;
                    std::mem::take(&mut st.disqualified)
                };
                for unit in parked {
                    unit.requalify();
                }
                true
            }
        }
    }

    /// Install or clear the child qualifier consulted before handing a right
    /// to a child. Installing over an existing one is refused. Clearing it
    /// lets queued units held back by it compete again.
    pub fn set_child_qualifier(&self, qualifier: Option<Arc<dyn ChildQualifier>>) -> bool {
        let mut st = lock(&self.state);
        if qualifier.is_some() && st.child_qualifier.is_some() {
            drop(st);
            error!(scheduler = %self, "child qualifier already set, refusing to replace it");
            return false;
        }
        let cleared = qualifier.is_none() && st.child_qualifier.is_some();
        st.child_qualifier = qualifier;
        drop(st);
        if cleared {
            self.root().dispatch();
        }
        true
    }

    /// Whether the child qualifier lets `child` receive a right. A
    /// scheduler always admits itself.
    pub fn allow_right_for(&self, child: &Scheduler) -> bool {
        if std::ptr::eq(child, self) {
            return true;
        }
        let qualifier = lock(&self.state).child_qualifier.clone();
        qualifier.map_or(true, |q| q.admit(self, child))
    }
}
