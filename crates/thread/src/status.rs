use std::time::Duration;

use chrono::{DateTime, Utc};
use cougaar_core::Lane;
use serde::Serialize;

use crate::blocking::status_string;
use crate::schedulable::{Schedulable, SchedulableState};

/// Whether a status row came from a worker or from a pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Running,
    Queued,
}

/// One row of the status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub kind: StatusKind,
    pub scheduler: String,
    pub schedulable: String,
    pub consumer: String,
    pub lane: Lane,
    pub state: SchedulableState,
    pub elapsed_ms: u64,
    pub blocking: String,
    /// Wall-clock time the unit was queued or started.
    pub since: Option<DateTime<Utc>>,
}

impl StatusEntry {
    pub(crate) fn capture(kind: StatusKind, scheduler: &str, unit: &dyn Schedulable) -> Self {
        let elapsed = unit.elapsed();
        let since = unit
            .timestamp()
            .and_then(|_| chrono::Duration::from_std(elapsed).ok())
            .map(|ago| Utc::now() - ago);
        Self {
            kind,
            scheduler: scheduler.to_string(),
            schedulable: unit.name().to_string(),
            consumer: unit.consumer().to_string(),
            lane: unit.lane(),
            state: unit.state(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            blocking: status_string(unit.blocking().as_ref()),
            since,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}
