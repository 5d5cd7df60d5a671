//! Administrative control over one node's schedulers.
//!
//! Limits set on the root node bound the whole process; limits set lower
//! in the tree only bound that subtree.

use std::sync::Arc;

use cougaar_core::Lane;
use tracing::info;

use crate::listener::ListenerProxy;
use crate::scheduler::{ChildQualifier, QueueComparator, Qualifier, RightsAccounting, RightsSelector, Scheduler};
use crate::tree::{NodeId, TreeNode};

#[derive(Clone)]
pub struct ThreadControl {
    node: Arc<TreeNode>,
}

impl ThreadControl {
    pub(crate) fn new(node: Arc<TreeNode>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> NodeId {
        self.node.id()
    }

    pub fn node_name(&self) -> &str {
        self.node.name()
    }

    pub fn scheduler(&self, lane: Lane) -> &Arc<Scheduler> {
        self.node.scheduler(lane)
    }

    pub fn listeners(&self) -> &Arc<ListenerProxy> {
        self.node.listeners()
    }

    pub fn default_lane(&self) -> Lane {
        self.node.default_lane()
    }

    pub fn set_default_lane(&self, lane: Lane) {
        info!(node = self.node.name(), %lane, "default lane changed");
        self.node.set_default_lane(lane);
    }

    /// `None` asks for no limit; bounded lanes clamp it to their capacity.
    pub fn set_max_running_thread_count(&self, lane: Lane, max: Option<usize>) {
        self.scheduler(lane).set_max_running_thread_count(max);
    }

    pub fn max_running_thread_count(&self, lane: Lane) -> Option<usize> {
        self.scheduler(lane).max_running_thread_count()
    }

    pub fn running_thread_count(&self, lane: Lane) -> usize {
        self.scheduler(lane).running_thread_count()
    }

    pub fn pending_thread_count(&self, lane: Lane) -> usize {
        self.scheduler(lane).pending_thread_count()
    }

    pub fn active_thread_count(&self, lane: Lane) -> usize {
        self.scheduler(lane).active_thread_count()
    }

    pub fn rights_accounting(&self, lane: Lane) -> RightsAccounting {
        self.scheduler(lane).rights_accounting()
    }

    pub fn set_queue_comparator(&self, lane: Lane, comparator: Option<QueueComparator>) {
        self.scheduler(lane).set_queue_comparator(comparator);
    }

    pub fn set_rights_selector(&self, lane: Lane, selector: Arc<dyn RightsSelector>) {
        self.scheduler(lane).set_rights_selector(selector);
    }

    pub fn set_qualifier(&self, lane: Lane, qualifier: Option<Arc<dyn Qualifier>>) -> bool {
        self.scheduler(lane).set_qualifier(qualifier)
    }

    pub fn set_child_qualifier(&self, lane: Lane, qualifier: Option<Arc<dyn ChildQualifier>>) -> bool {
        self.scheduler(lane).set_child_qualifier(qualifier)
    }
}

impl std::fmt::Debug for ThreadControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadControl").field("node", &self.node.name()).finish()
    }
}
