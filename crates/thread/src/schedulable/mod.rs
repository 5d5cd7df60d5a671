//! Schedulables: the units of work handed out by a thread service.
//!
//! - `object`: the hierarchical unit, scheduled through a lane's scheduler
//! - `trivial`: the unit used by the trivial and single-thread services

mod object;
mod trivial;

use std::sync::Arc;
use std::time::{Duration, Instant};

use cougaar_core::{Lane, ThreadError};
use serde::Serialize;

use crate::blocking::BlockingStatus;

pub(crate) use self::object::SchedulableObject;
pub(crate) use self::trivial::TrivialSchedulable;

/// The wrapped work. Errors and panics are caught and logged at the worker
/// boundary; they never take a pooled thread down.
pub type Action = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as an [`Action`].
pub fn action<F>(f: F) -> Action
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Invoked exactly once when a suspension takes effect.
pub type SuspendCallback = Box<dyn FnOnce(&dyn Schedulable) + Send>;

/// Informational life-cycle state. Derived from a snapshot of a unit's
/// flags; never used to drive scheduling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulableState {
    Dormant,
    Pending,
    Running,
    Suspended,
    Disqualified,
}

impl std::fmt::Display for SchedulableState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SchedulableState::Dormant => "dormant",
            SchedulableState::Pending => "pending",
            SchedulableState::Running => "running",
            SchedulableState::Suspended => "suspended",
            SchedulableState::Disqualified => "disqualified",
        };
        f.write_str(s)
    }
}

/// A restartable unit of work.
pub trait Schedulable: Send + Sync {
    fn name(&self) -> &str;

    /// Name of the component that asked for this unit.
    fn consumer(&self) -> &str;

    fn lane(&self) -> Lane;

    /// Request a run. Requests made while the unit is pending or running
    /// collapse into a single run after the current one.
    fn start(&self);

    /// Prevent any queued or future run. Does not interrupt a running
    /// action. Returns false if the unit is running right now.
    fn cancel(&self) -> bool;

    /// Suspend after the current run, or at once if idle. `callback` fires
    /// exactly once when the suspension takes effect.
    fn suspend(&self, callback: SuspendCallback) -> Result<(), ThreadError>;

    /// Lift a suspension, restarting once if a start arrived meanwhile.
    fn resume(&self);

    /// Start once after `delay`.
    fn schedule(&self, delay: Duration);

    /// Start after `delay`, then `interval` after each start.
    fn schedule_repeating(&self, delay: Duration, interval: Duration);

    /// Start after `delay`, then every `interval` against a fixed clock.
    fn schedule_at_fixed_rate(&self, delay: Duration, interval: Duration);

    fn cancel_timer(&self);

    fn state(&self) -> SchedulableState;

    /// When the unit last became queued or started running.
    fn timestamp(&self) -> Option<Instant>;

    fn blocking(&self) -> Option<BlockingStatus>;

    fn elapsed(&self) -> Duration {
        self.timestamp().map(|t| t.elapsed()).unwrap_or_default()
    }
}

impl std::fmt::Debug for dyn Schedulable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schedulable")
            .field("name", &self.name())
            .field("consumer", &self.consumer())
            .field("lane", &self.lane())
            .field("state", &self.state())
            .finish()
    }
}
