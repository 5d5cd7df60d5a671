pub mod blocking;
pub mod control;
pub mod listener;
pub mod pool;
pub mod queue;
pub mod rogue;
pub mod runtime;
pub mod schedulable;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod timer;
pub mod tree;
pub mod watcher;

mod sync;
mod transitions;

pub use blocking::{
    begin_blocking, end_blocking, status_string, with_blocking, with_cpu_intensive, with_file_io, with_net_io,
    with_wait, BlockingKind, BlockingStatus,
};
pub use control::ThreadControl;
pub use cougaar_core::{Lane, ServiceType, ThreadConfig, ThreadError};
pub use listener::{ListenerProxy, ThreadListener};
pub use pool::{ThreadPool, MAX_CONTINUATION_TIME};
pub use rogue::{RogueThreadDetector, SampleReport};
pub use runtime::ThreadRuntime;
pub use schedulable::{action, Action, Schedulable, SchedulableState, SuspendCallback};
pub use scheduler::{
    ChildQualifier, Handoff, PercentageLoadSelector, QueueComparator, Qualifier, RightsAccounting, RightsSelector,
    RoundRobinSelector, Scheduler, ShareCap,
};
pub use service::ThreadService;
pub use status::{StatusEntry, StatusKind};
pub use tree::{NodeId, Tree, TreeNode};
pub use watcher::{ConsumerStats, SchedulerWatcher};
