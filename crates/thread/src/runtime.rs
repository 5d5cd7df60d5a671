//! The runtime: owns the tree, the pools, the serializer and the timer,
//! and hands out per-node services.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cougaar_core::{Lane, ServiceType, ThreadConfig, ThreadError, LANE_COUNT};
use tracing::{debug, info, warn};

use crate::control::ThreadControl;
use crate::listener::ListenerProxy;
use crate::pool::{SerialThreadQueue, ThreadPool, TrivialRunner, TrivialThreadPool};
use crate::rogue::{DetectorHandle, RogueThreadDetector};
use crate::schedulable::Schedulable;
use crate::service::{HierarchicalThreadService, ThreadService, TrivialThreadService};
use crate::status::{StatusEntry, StatusKind};
use crate::sync::lock;
use crate::timer::Timer;
use crate::transitions::StateChangeQueue;
use crate::tree::{NodeId, Tree};

enum Engine {
    Hierarchical {
        pools: Arc<[Arc<ThreadPool>; LANE_COUNT]>,
        transitions: Arc<StateChangeQueue>,
    },
    Direct {
        runner: Arc<dyn TrivialRunner>,
    },
}

pub(crate) struct RuntimeInner {
    config: ThreadConfig,
    tree: Arc<Tree>,
    engine: Engine,
    timer: Arc<Timer>,
    detector: Mutex<Option<DetectorHandle>>,
    shut_down: AtomicBool,
}

impl RuntimeInner {
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(service_type = self.config.service_type.as_str(), "thread service shutting down");

        if let Some(detector) = lock(&self.detector).take() {
            detector.stop();
        }
        self.timer.stop();
        match &self.engine {
            Engine::Hierarchical { pools, transitions } => {
                transitions.stop();
                for pool in pools.iter() {
                    pool.stop_all();
                }
            }
            Engine::Direct { runner } => runner.stop(),
        }
        debug!("thread service stopped");
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A running thread service. Cheap to clone; the service shuts down when
/// [`ThreadRuntime::shutdown`] is called or the last clone is dropped.
#[derive(Clone)]
pub struct ThreadRuntime {
    inner: Arc<RuntimeInner>,
}

impl ThreadRuntime {
    /// Validate `config` and start the service variant it names.
    pub fn start(config: ThreadConfig) -> Result<Self, ThreadError> {
        config.validate()?;
        config.log_summary();

        let capacities: [Option<usize>; LANE_COUNT] =
            std::array::from_fn(|i| Lane::from_index(i).and_then(|lane| config.lanes.capacity(lane)));
        let tree = Tree::new(&config.root_name, config.default_lane, capacities);
        let timer = Arc::new(Timer::start("CougaarTimer")?);

        let engine = match config.service_type {
            ServiceType::Hierarchical => {
                let slice = Duration::from_millis(config.continuation_slice_ms);
                let pools: [Arc<ThreadPool>; LANE_COUNT] =
                    std::array::from_fn(|i| Arc::new(ThreadPool::new(Lane::ALL[i], capacities[i], slice)));
                let transitions = Arc::new(StateChangeQueue::new());
                transitions.start()?;
                Engine::Hierarchical {
                    pools: Arc::new(pools),
                    transitions,
                }
            }
            ServiceType::Trivial => Engine::Direct {
                runner: Arc::new(TrivialThreadPool::new()),
            },
            ServiceType::Single => Engine::Direct {
                runner: Arc::new(SerialThreadQueue::start()?),
            },
        };

        let detector_enabled = config.detector.enabled;
        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                config,
                tree,
                engine,
                timer,
                detector: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        };
        if detector_enabled {
            runtime.start_rogue_detector()?;
        }
        info!(service_type = runtime.service_type().as_str(), "thread service started");
        Ok(runtime)
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &ThreadConfig {
        &self.inner.config
    }

    pub fn service_type(&self) -> ServiceType {
        self.inner.config.service_type
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.inner.tree
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Add a node under `parent`, typically one per agent.
    pub fn add_node(&self, name: &str, parent: NodeId) -> Result<NodeId, ThreadError> {
        self.ensure_running()?;
        self.inner.tree.add_node(name, parent)
    }

    /// The service components of `node` use to get schedulables.
    pub fn thread_service(&self, node: NodeId) -> Result<Arc<dyn ThreadService>, ThreadError> {
        self.ensure_running()?;
        let node = self.inner.tree.node(node)?;
        let service: Arc<dyn ThreadService> = match &self.inner.engine {
            Engine::Hierarchical { pools, transitions } => Arc::new(HierarchicalThreadService::new(
                node,
                Arc::clone(pools),
                Arc::clone(transitions),
                Arc::clone(&self.inner.timer),
            )),
            Engine::Direct { runner } => Arc::new(TrivialThreadService::new(
                Arc::clone(runner),
                Arc::clone(&self.inner.timer),
                node.default_lane(),
            )),
        };
        Ok(service)
    }

    /// Administrative control over `node`. Hierarchical service only.
    pub fn control(&self, node: NodeId) -> Result<ThreadControl, ThreadError> {
        self.require_hierarchical("thread control")?;
        Ok(ThreadControl::new(self.inner.tree.node(node)?))
    }

    /// Event subscription for `node`. Hierarchical service only.
    pub fn listeners(&self, node: NodeId) -> Result<Arc<ListenerProxy>, ThreadError> {
        self.require_hierarchical("thread listeners")?;
        Ok(Arc::clone(self.inner.tree.node(node)?.listeners()))
    }

    pub fn pool(&self, lane: Lane) -> Option<&Arc<ThreadPool>> {
        match &self.inner.engine {
            Engine::Hierarchical { pools, .. } => Some(&pools[lane.index()]),
            Engine::Direct { .. } => None,
        }
    }

    /// Limit of the root scheduler for the root's default lane, if bounded.
    pub fn root_max_running(&self) -> Option<usize> {
        match &self.inner.engine {
            Engine::Hierarchical { .. } => {
                let root = self.inner.tree.root();
                root.scheduler(root.default_lane()).max_running_thread_count()
            }
            Engine::Direct { .. } => None,
        }
    }

    /// Visit every running unit, then every queued one. Best effort: units
    /// may change state while they are visited.
    pub fn iterate_over_status(&self, body: &mut dyn FnMut(&StatusEntry)) -> usize {
        let mut count = 0;
        match &self.inner.engine {
            Engine::Hierarchical { pools, .. } => {
                for pool in pools.iter() {
                    count += pool.iterate_over_running(&mut |scheduler: &str, unit: &dyn Schedulable| {
                        body(&StatusEntry::capture(StatusKind::Running, scheduler, unit));
                    });
                }
                count += self
                    .inner
                    .tree
                    .iterate_over_queued(&mut |scheduler: &str, unit: &dyn Schedulable| {
                        body(&StatusEntry::capture(StatusKind::Queued, scheduler, unit));
                    });
            }
            Engine::Direct { runner } => {
                let scheduler = self.inner.config.root_name.as_str();
                count += runner.iterate_over_running(&mut |unit: &dyn Schedulable| {
                    body(&StatusEntry::capture(StatusKind::Running, scheduler, unit));
                });
                count += runner.iterate_over_queued(&mut |unit: &dyn Schedulable| {
                    body(&StatusEntry::capture(StatusKind::Queued, scheduler, unit));
                });
            }
        }
        count
    }

    pub fn status_snapshot(&self) -> Vec<StatusEntry> {
        let mut entries = Vec::new();
        self.iterate_over_status(&mut |entry| entries.push(entry.clone()));
        entries
    }

    /// Start the long-running unit detector. A second call is a no-op.
    pub fn start_rogue_detector(&self) -> Result<(), ThreadError> {
        self.ensure_running()?;
        let mut slot = lock(&self.inner.detector);
        if slot.is_some() {
            return Ok(());
        }
        let detector = RogueThreadDetector::new(&self.inner.config.detector);
        *slot = Some(detector.spawn(Arc::downgrade(&self.inner))?);
        Ok(())
    }

    /// Stop the detector, the timer, the serializer and every worker. Units
    /// still running are allowed to finish. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), ThreadError> {
        if self.is_shut_down() {
            return Err(ThreadError::ShutDown);
        }
        Ok(())
    }

    fn require_hierarchical(&self, what: &'static str) -> Result<(), ThreadError> {
        self.ensure_running()?;
        match self.service_type() {
            ServiceType::Hierarchical => Ok(()),
            other => {
                warn!(service_type = other.as_str(), "{what} requested from a non-hierarchical service");
                Err(ThreadError::Unsupported(what, other.as_str()))
            }
        }
    }
}

impl std::fmt::Debug for ThreadRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRuntime")
            .field("service_type", &self.service_type())
            .field("nodes", &self.inner.tree.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
