//! Blocking annotations: a running unit tells the status layer what it is
//! waiting on. Annotations are only accepted from code running on a pooled
//! thread, and each lane restricts which kinds it tolerates.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use cougaar_core::Lane;
use serde::Serialize;
use tracing::warn;

use crate::schedulable::{Schedulable, SchedulableObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingKind {
    Other,
    Wait,
    FileIo,
    NetIo,
    CpuIntensive,
}

impl BlockingKind {
    fn prefix(self) -> &'static str {
        match self {
            BlockingKind::Other => "",
            BlockingKind::Wait => "Lock wait: ",
            BlockingKind::FileIo => "Disk I/O: ",
            BlockingKind::NetIo => "Network I/O: ",
            BlockingKind::CpuIntensive => "CPU Intensive: ",
        }
    }

    /// Whether a unit in `lane` may annotate itself with this kind.
    pub fn allowed_in(self, lane: Lane) -> bool {
        match lane {
            Lane::CpuIntense => matches!(self, BlockingKind::Wait | BlockingKind::CpuIntensive),
            Lane::WellBehaved => self == BlockingKind::Wait,
            Lane::BestEffort | Lane::WillBlock => true,
        }
    }
}

/// What a running unit is currently blocked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockingStatus {
    pub kind: BlockingKind,
    pub excuse: String,
}

impl fmt::Display for BlockingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.excuse)
    }
}

/// Render an optional annotation for status output.
pub fn status_string(status: Option<&BlockingStatus>) -> String {
    match status {
        Some(s) => s.to_string(),
        None => "none".to_string(),
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<SchedulableObject>>> = const { RefCell::new(None) };
}

pub(crate) fn set_current(unit: Option<Arc<SchedulableObject>>) {
    CURRENT.with(|c| *c.borrow_mut() = unit);
}

fn with_current<R>(f: impl FnOnce(&SchedulableObject) -> R) -> Option<R> {
    CURRENT.with(|c| c.borrow().as_deref().map(f))
}

/// Annotate the unit running on this thread. Returns false when the caller
/// is not a pooled thread or the unit's lane forbids `kind`.
pub fn begin_blocking(kind: BlockingKind, excuse: Option<&str>) -> bool {
    let excuse = excuse.unwrap_or("No excuse given");
    with_current(|unit| {
        if !kind.allowed_in(unit.lane()) {
            warn!(
                schedulable = %unit.name(),
                lane = %unit.lane(),
                ?kind,
                excuse,
                "illegal blocking annotation for lane"
            );
            return false;
        }
        unit.set_blocking(Some(BlockingStatus {
            kind,
            excuse: excuse.to_string(),
        }));
        true
    })
    .unwrap_or(false)
}

/// Clear the annotation set by [`begin_blocking`].
pub fn end_blocking() {
    with_current(|unit| unit.set_blocking(None));
}

/// Run `body` under an annotation. `body` runs even when the annotation is
/// rejected; it is then simply not reported.
pub fn with_blocking<R>(kind: BlockingKind, excuse: &str, body: impl FnOnce() -> R) -> R {
    struct Guard(bool);
    impl Drop for Guard {
        fn drop(&mut self) {
            if self.0 {
                end_blocking();
            }
        }
    }
    let _guard = Guard(begin_blocking(kind, Some(excuse)));
    body()
}

pub fn with_wait<R>(excuse: &str, body: impl FnOnce() -> R) -> R {
    with_blocking(BlockingKind::Wait, excuse, body)
}

pub fn with_file_io<R>(excuse: &str, body: impl FnOnce() -> R) -> R {
    with_blocking(BlockingKind::FileIo, excuse, body)
}

pub fn with_net_io<R>(excuse: &str, body: impl FnOnce() -> R) -> R {
    with_blocking(BlockingKind::NetIo, excuse, body)
}

pub fn with_cpu_intensive<R>(excuse: &str, body: impl FnOnce() -> R) -> R {
    with_blocking(BlockingKind::CpuIntensive, excuse, body)
}
