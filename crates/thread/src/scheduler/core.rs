use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, RwLock, Weak};

use cougaar_core::Lane;
use serde::Serialize;
use tracing::{error, info};

use crate::listener::ListenerProxy;
use crate::queue::DynamicSortedQueue;
use crate::schedulable::{Schedulable, SchedulableObject};
use crate::sync::{lock, write};
use crate::tree::{NodeId, Tree};

use super::policy::{ChildQualifier, QueueComparator, Qualifier};
use super::selector::{RightsSelector, RoundRobinSelector};

pub(super) struct SchedulerState {
    /// Configured limit, never above the absolute max. `None` is unlimited.
    pub(super) max: Option<usize>,
    pub(super) running: usize,
    /// Rights reserved while a request is outstanding further up the tree.
    pub(super) in_flight: usize,
    pub(super) granted: u64,
    pub(super) released: u64,
    pub(super) pending: DynamicSortedQueue<Arc<SchedulableObject>>,
    pub(super) disqualified: Vec<Arc<SchedulableObject>>,
    pub(super) qualifier: Option<Arc<dyn Qualifier>>,
    pub(super) child_qualifier: Option<Arc<dyn ChildQualifier>>,
}

impl SchedulerState {
    pub(super) fn has_capacity(&self) -> bool {
        self.max.map_or(true, |max| self.running + self.in_flight < max)
    }
}

/// Counters of the rights protocol, read under one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RightsAccounting {
    pub running: usize,
    pub in_flight: usize,
    pub granted: u64,
    pub released: u64,
}

/// Admission control for one lane of one tree node.
///
/// Non-root schedulers hold a right only after their parent granted it, and
/// always pass released rights up; the root alone decides who runs next.
pub struct Scheduler {
    pub(super) name: String,
    pub(super) lane: Lane,
    pub(super) node: NodeId,
    pub(super) absolute_max: Option<usize>,
    pub(super) state: Mutex<SchedulerState>,
    pub(super) selector: RwLock<Arc<dyn RightsSelector>>,
    pub(super) listeners: Arc<ListenerProxy>,
    pub(super) parent: Option<Arc<Scheduler>>,
    pub(super) tree: Weak<Tree>,
    /// Bumped on every enqueue in this lane, anywhere in the tree.
    pub(super) epoch: Arc<AtomicU64>,
}

pub(super) fn default_order() -> crate::queue::Comparator<Arc<SchedulableObject>> {
    Arc::new(|a: &Arc<SchedulableObject>, b: &Arc<SchedulableObject>| a.queue_seq().cmp(&b.queue_seq()))
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        lane: Lane,
        node: NodeId,
        absolute_max: Option<usize>,
        parent: Option<Arc<Scheduler>>,
        tree: Weak<Tree>,
        listeners: Arc<ListenerProxy>,
        epoch: Arc<AtomicU64>,
    ) -> Self {
        Self {
            name,
            lane,
            node,
            absolute_max,
            state: Mutex::new(SchedulerState {
                max: absolute_max,
                running: 0,
                in_flight: 0,
                granted: 0,
                released: 0,
                pending: DynamicSortedQueue::new(default_order()),
                disqualified: Vec::new(),
                qualifier: None,
                child_qualifier: None,
            }),
            selector: RwLock::new(Arc::new(RoundRobinSelector::new())),
            listeners,
            parent,
            tree,
            epoch,
        }
    }

    /// Name of the owning tree node.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn parent(&self) -> Option<&Arc<Scheduler>> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn root(&self) -> &Scheduler {
        let mut scheduler = self;
        while let Some(parent) = &scheduler.parent {
            scheduler = parent;
        }
        scheduler
    }

    pub(crate) fn listeners(&self) -> &ListenerProxy {
        &self.listeners
    }

    pub fn absolute_max(&self) -> Option<usize> {
        self.absolute_max
    }

    pub fn max_running_thread_count(&self) -> Option<usize> {
        lock(&self.state).max
    }

    /// Rights currently held by this scheduler and its subtree.
    pub fn running_thread_count(&self) -> usize {
        lock(&self.state).running
    }

    pub fn pending_thread_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Running plus pending.
    pub fn active_thread_count(&self) -> usize {
        let st = lock(&self.state);
        st.running + st.pending.len()
    }

    pub fn disqualified_count(&self) -> usize {
        lock(&self.state).disqualified.len()
    }

    pub fn rights_accounting(&self) -> RightsAccounting {
        let st = lock(&self.state);
        RightsAccounting {
            running: st.running,
            in_flight: st.in_flight,
            granted: st.granted,
            released: st.released,
        }
    }

    /// Schedulers of the same lane on this node's children.
    pub fn children(&self) -> Vec<Arc<Scheduler>> {
        match self.tree.upgrade() {
            Some(tree) => tree.child_schedulers(self.node, self.lane),
            None => Vec::new(),
        }
    }

    // ── Tuning ──────────────────────────────────────────────────────

    /// Change the concurrency limit, clamped to the absolute max. Raising it
    /// starts as many queued units as the new headroom allows.
    pub fn set_max_running_thread_count(&self, requested: Option<usize>) {
        let (old, new) = {
            let mut st = lock(&self.state);
            let new = match (requested, self.absolute_max) {
                (Some(n), Some(abs)) if n > abs => {
                    error!(scheduler = %self, requested = n, absolute = abs, "max running count clamped to absolute max");
                    Some(abs)
                }
                (None, Some(abs)) => {
                    error!(scheduler = %self, absolute = abs, "unbounded max requested on a bounded lane");
                    Some(abs)
                }
                (n, _) => n,
            };
            let old = std::mem::replace(&mut st.max, new);
            (old, new)
        };
        info!(scheduler = %self, ?old, ?new, "max running thread count changed");
        let increased = match (old, new) {
            (Some(o), Some(n)) => n > o,
            (Some(_), None) => true,
            _ => false,
        };
        if increased {
            self.root().dispatch();
        }
    }

    /// Replace the pending-queue ordering. `None` restores enqueue order.
    pub fn set_queue_comparator(&self, comparator: Option<QueueComparator>) {
        let order = match comparator {
            Some(cmp) => Arc::new(move |a: &Arc<SchedulableObject>, b: &Arc<SchedulableObject>| {
                cmp(a.as_ref() as &dyn Schedulable, b.as_ref() as &dyn Schedulable)
            }) as crate::queue::Comparator<Arc<SchedulableObject>>,
            None => default_order(),
        };
        lock(&self.state).pending.set_comparator(order);
    }

    pub fn set_rights_selector(&self, selector: Arc<dyn RightsSelector>) {
        *write(&self.selector) = selector;
    }

    /// Visit the queued units, best effort: the queue is copied under the
    /// lock and walked without it.
    pub(crate) fn iterate_over_queued(&self, body: &mut dyn FnMut(&str, &dyn Schedulable)) -> usize {
        let snapshot = lock(&self.state).pending.clone();
        snapshot.process_each(|unit| {
            if unit.is_queued() {
                body(&self.name, unit.as_ref());
            }
        })
    }
}

impl std::fmt::Display for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Scheduler {} [{}]>", self.name, self.lane)
    }
}
