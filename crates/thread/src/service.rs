//! Provisioning: the thread service handed to components of one node.

use std::sync::Arc;

use cougaar_core::{Lane, LANE_COUNT};

use crate::pool::{ThreadPool, TrivialRunner};
use crate::schedulable::{Action, Schedulable, SchedulableObject, TrivialSchedulable};
use crate::timer::Timer;
use crate::transitions::StateChangeQueue;
use crate::tree::TreeNode;

/// Creates schedulables for one node. `consumer` names the requesting
/// component and shows up in status and listener events.
pub trait ThreadService: Send + Sync {
    /// Lane used when the caller does not pick one.
    fn default_lane(&self) -> Lane;

    fn get_thread_in_lane(
        &self,
        consumer: &str,
        action: Action,
        name: Option<&str>,
        lane: Lane,
    ) -> Arc<dyn Schedulable>;

    fn get_thread(&self, consumer: &str, action: Action) -> Arc<dyn Schedulable> {
        self.get_thread_in_lane(consumer, action, None, self.default_lane())
    }

    fn get_thread_named(&self, consumer: &str, action: Action, name: &str) -> Arc<dyn Schedulable> {
        self.get_thread_in_lane(consumer, action, Some(name), self.default_lane())
    }
}

/// Units scheduled through the node's lane schedulers.
pub(crate) struct HierarchicalThreadService {
    node: Arc<TreeNode>,
    pools: Arc<[Arc<ThreadPool>; LANE_COUNT]>,
    transitions: Arc<StateChangeQueue>,
    timer: Arc<Timer>,
}

impl HierarchicalThreadService {
    pub(crate) fn new(
        node: Arc<TreeNode>,
        pools: Arc<[Arc<ThreadPool>; LANE_COUNT]>,
        transitions: Arc<StateChangeQueue>,
        timer: Arc<Timer>,
    ) -> Self {
        Self {
            node,
            pools,
            transitions,
            timer,
        }
    }
}

impl ThreadService for HierarchicalThreadService {
    fn default_lane(&self) -> Lane {
        self.node.default_lane()
    }

    fn get_thread_in_lane(
        &self,
        consumer: &str,
        action: Action,
        name: Option<&str>,
        lane: Lane,
    ) -> Arc<dyn Schedulable> {
        let pool = &self.pools[lane.index()];
        let name = name.map_or_else(|| pool.generate_name(), str::to_string);
        SchedulableObject::new(
            name,
            consumer.to_string(),
            action,
            Arc::clone(self.node.scheduler(lane)),
            Arc::clone(pool),
            Arc::clone(&self.transitions),
            Arc::clone(&self.timer),
        )
    }
}

/// Units run directly by a runner, with no admission control.
pub(crate) struct TrivialThreadService {
    runner: Arc<dyn TrivialRunner>,
    timer: Arc<Timer>,
    default_lane: Lane,
}

impl TrivialThreadService {
    pub(crate) fn new(runner: Arc<dyn TrivialRunner>, timer: Arc<Timer>, default_lane: Lane) -> Self {
        Self {
            runner,
            timer,
            default_lane,
        }
    }
}

impl ThreadService for TrivialThreadService {
    fn default_lane(&self) -> Lane {
        self.default_lane
    }

    fn get_thread_in_lane(
        &self,
        consumer: &str,
        action: Action,
        name: Option<&str>,
        lane: Lane,
    ) -> Arc<dyn Schedulable> {
        let name = name.map_or_else(|| self.runner.generate_name(), str::to_string);
        TrivialSchedulable::new(
            name,
            consumer.to_string(),
            lane,
            action,
            Arc::clone(&self.runner),
            Arc::clone(&self.timer),
        )
    }
}
