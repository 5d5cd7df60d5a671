//! The node tree: an arena of nodes, each holding one scheduler per lane.
//!
//! Nodes are never removed. A node's scheduler for lane L has the parent
//! node's scheduler for lane L as its parent, so rights for a lane flow
//! along the same shape for every lane.

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock, Weak};

use cougaar_core::{Lane, ThreadError, LANE_COUNT};
use serde::Serialize;
use tracing::info;

use crate::listener::ListenerProxy;
use crate::scheduler::Scheduler;
use crate::schedulable::Schedulable;
use crate::sync::{read, write};

/// Index of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

pub struct TreeNode {
    id: NodeId,
    name: String,
    parent: Option<NodeId>,
    children: RwLock<Vec<NodeId>>,
    schedulers: Vec<Arc<Scheduler>>,
    listeners: Arc<ListenerProxy>,
    default_lane: RwLock<Lane>,
}

impl TreeNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> Vec<NodeId> {
        read(&self.children).clone()
    }

    pub fn scheduler(&self, lane: Lane) -> &Arc<Scheduler> {
        &self.schedulers[lane.index()]
    }

    pub fn listeners(&self) -> &Arc<ListenerProxy> {
        &self.listeners
    }

    pub fn default_lane(&self) -> Lane {
        *read(&self.default_lane)
    }

    pub(crate) fn set_default_lane(&self, lane: Lane) {
        *write(&self.default_lane) = lane;
    }
}

impl std::fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("children", &self.children())
            .finish()
    }
}

pub struct Tree {
    me: Weak<Tree>,
    nodes: RwLock<Vec<Arc<TreeNode>>>,
    capacities: [Option<usize>; LANE_COUNT],
    /// One enqueue counter per lane, shared by every scheduler of the lane.
    epochs: [Arc<AtomicU64>; LANE_COUNT],
}

impl Tree {
    /// Build a tree holding only its root node.
    pub(crate) fn new(root_name: &str, default_lane: Lane, capacities: [Option<usize>; LANE_COUNT]) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Tree>| {
            let epochs: [Arc<AtomicU64>; LANE_COUNT] = std::array::from_fn(|_| Arc::new(AtomicU64::new(0)));
            let root = Self::build_node(me, &epochs, &capacities, NodeId::ROOT, root_name, None, default_lane);
            Self {
                me: me.clone(),
                nodes: RwLock::new(vec![Arc::new(root)]),
                capacities,
                epochs,
            }
        })
    }

    fn build_node(
        tree: &Weak<Tree>,
        epochs: &[Arc<AtomicU64>; LANE_COUNT],
        capacities: &[Option<usize>; LANE_COUNT],
        id: NodeId,
        name: &str,
        parent: Option<&TreeNode>,
        default_lane: Lane,
    ) -> TreeNode {
        let listeners = Arc::new(ListenerProxy::new());
        let schedulers = Lane::ALL
            .iter()
            .map(|&lane| {
                Arc::new(Scheduler::new(
                    name.to_string(),
                    lane,
                    id,
                    capacities[lane.index()],
                    parent.map(|p| Arc::clone(p.scheduler(lane))),
                    tree.clone(),
                    Arc::clone(&listeners),
                    Arc::clone(&epochs[lane.index()]),
                ))
            })
            .collect();
        TreeNode {
            id,
            name: name.to_string(),
            parent: parent.map(TreeNode::id),
            children: RwLock::new(Vec::new()),
            schedulers,
            listeners,
            default_lane: RwLock::new(default_lane),
        }
    }

    /// Create a child of `parent`. The node is linked into its parent's
    /// child list before this returns. Inherits the parent's default lane.
    pub fn add_node(&self, name: &str, parent: NodeId) -> Result<NodeId, ThreadError> {
        let mut nodes = write(&self.nodes);
        let parent_node = nodes
            .get(parent.0)
            .cloned()
            .ok_or(ThreadError::NodeNotFound(parent.0))?;
        let id = NodeId(nodes.len());
        let node = Self::build_node(
            &self.me,
            &self.epochs,
            &self.capacities,
            id,
            name,
            Some(&parent_node),
            parent_node.default_lane(),
        );
        nodes.push(Arc::new(node));
        write(&parent_node.children).push(id);
        drop(nodes);

        info!(node = name, parent = parent_node.name(), %id, "thread tree node added");
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Result<Arc<TreeNode>, ThreadError> {
        read(&self.nodes)
            .get(id.0)
            .cloned()
            .ok_or(ThreadError::NodeNotFound(id.0))
    }

    pub fn root(&self) -> Arc<TreeNode> {
        Arc::clone(&read(&self.nodes)[NodeId::ROOT.0])
    }

    pub fn nodes(&self) -> Vec<Arc<TreeNode>> {
        read(&self.nodes).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.nodes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self, lane: Lane) -> Option<usize> {
        self.capacities[lane.index()]
    }

    /// Schedulers of `lane` on the children of `id`, in creation order.
    pub fn child_schedulers(&self, id: NodeId, lane: Lane) -> Vec<Arc<Scheduler>> {
        let nodes = read(&self.nodes);
        let Some(node) = nodes.get(id.0) else {
            return Vec::new();
        };
        let children = read(&node.children);
        children
            .iter()
            .filter_map(|child| nodes.get(child.0))
            .map(|child| Arc::clone(child.scheduler(lane)))
            .collect()
    }

    /// Visit every queued unit of every scheduler in the tree.
    pub(crate) fn iterate_over_queued(&self, body: &mut dyn FnMut(&str, &dyn Schedulable)) -> usize {
        self.nodes()
            .iter()
            .flat_map(|node| node.schedulers.iter())
            .map(|scheduler| scheduler.iterate_over_queued(body))
            .sum()
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree").field("nodes", &self.len()).finish()
    }
}
