use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::error;

use crate::schedulable::SchedulableObject;
use crate::sync::{lock, read};

use super::core::SchedulerState;
use super::selector::Handoff;
use super::Scheduler;

impl Scheduler {
    /// Ask for a right on behalf of `requestor`: this scheduler itself, or
    /// one of its children, which the child qualifier may turn away.
    /// Non-root schedulers reserve a slot locally, then ask their parent,
    /// and keep the right only if the parent granted it.
    pub(crate) fn request_rights(&self, requestor: &Scheduler) -> bool {
        if !self.allow_right_for(requestor) {
            return false;
        }
        let granted = match &self.parent {
            None => {
                let mut st = lock(&self.state);
                if st.has_capacity() {
                    st.running += 1;
                    st.granted += 1;
                    true
                } else {
                    false
                }
            }
            Some(parent) => {
                {
                    let mut st = lock(&self.state);
                    if !st.has_capacity() {
                        return false;
                    }
                    st.in_flight += 1;
                }
                let granted = parent.request_rights(self);
                let mut st = lock(&self.state);
                st.in_flight -= 1;
                if granted {
                    st.running += 1;
                    st.granted += 1;
                }
                granted
            }
        };
        if granted {
            self.listeners.notify_right_given(self.lane, &requestor.name);
        }
        granted
    }

    /// Return a right held for `consumer`. The release travels to the root,
    /// which hands the freed right to the next pending unit.
    pub(crate) fn release_rights(&self, consumer: &str) {
        let deficit = {
            let mut st = lock(&self.state);
            self.decrement_run_count(&mut st);
            st.max.is_some_and(|max| st.running >= max)
        };
        self.listeners.notify_right_returned(self.lane, consumer);

        match &self.parent {
            Some(parent) => parent.release_rights(&self.name),
            None if deficit => {
                error!(scheduler = %self, "Decreased thread count prevented handoff");
            }
            None => self.dispatch(),
        }
    }

    fn decrement_run_count(&self, st: &mut SchedulerState) {
        if st.running == 0 {
            let children: Vec<String> = self.children().iter().map(|c| c.name.clone()).collect();
            error!(
                scheduler = %self,
                parent = self.parent.as_ref().map_or("none", |p| p.name.as_str()),
                ?children,
                "running thread count would drop below zero"
            );
            return;
        }
        st.running -= 1;
        st.released += 1;
    }

    /// Hand free rights to pending units until either runs out. Only
    /// meaningful on the root; other schedulers forward to it.
    ///
    /// Each round reserves a right first, so capacity is never exceeded
    /// while the selector walks the tree. A round that finds nothing
    /// retries if anything was enqueued meanwhile, since the walk may have
    /// passed that queue already.
    pub(crate) fn dispatch(&self) {
        if self.parent.is_some() {
            self.root().dispatch();
            return;
        }
        loop {
            let epoch = self.epoch.load(Ordering::SeqCst);
            if !self.try_reserve() {
                return;
            }
            match self.select_reserved() {
                Some(handoff) => handoff.unit.thread_start(),
                None => {
                    if self.epoch.load(Ordering::SeqCst) == epoch {
                        return;
                    }
                }
            }
        }
    }

    fn try_reserve(&self) -> bool {
        let mut st = lock(&self.state);
        if st.has_capacity() {
            st.in_flight += 1;
            true
        } else {
            false
        }
    }

    /// With a reservation held, let the selector pick a unit and turn the
    /// reservation into a right for the chosen consumer.
    fn select_reserved(&self) -> Option<Handoff> {
        let selector = Arc::clone(&*read(&self.selector));
        let found = selector.next_pending(self);

        let mut st = lock(&self.state);
        st.in_flight -= 1;
        let mut handoff = found?;
        st.running += 1;
        st.granted += 1;
        drop(st);

        self.listeners.notify_right_given(self.lane, &handoff.consumer);
        handoff.consumer = self.name.clone();
        Some(handoff)
    }

    /// Find the next unit to run below this scheduler, taking a right for it
    /// here. Returns `None` if this scheduler is at its limit or nothing in
    /// its subtree is pending.
    pub fn next_pending(&self) -> Option<Handoff> {
        if !self.try_reserve() {
            return None;
        }
        self.select_reserved()
    }

    /// Pop the head of this scheduler's own queue. For selectors, which run
    /// while the caller holds a reservation.
    pub fn pop_local(&self) -> Option<Handoff> {
        let unit = lock(&self.state).pending.next()?;
        unit.clear_queued();
        self.listeners.notify_dequeued(self.lane, unit.as_ref());
        Some(Handoff {
            unit,
            consumer: self.name.clone(),
        })
    }

    /// Ask `child` for its next unit, if the child qualifier admits it.
    pub fn take_from_child(&self, child: &Scheduler) -> Option<Handoff> {
        if !self.allow_right_for(child) {
            return None;
        }
        child.next_pending()
    }

    /// Next queued unit to run on a worker that is finishing one of ours.
    /// The unit inherits the finishing unit's right.
    pub(crate) fn continuation(&self) -> Option<Arc<SchedulableObject>> {
        loop {
            let unit = lock(&self.state).pending.next()?;
            self.listeners.notify_dequeued(self.lane, unit.as_ref());
            if unit.begin_continuation() {
                return Some(unit);
            }
        }
    }
}
