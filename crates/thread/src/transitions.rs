//! The state-change serializer: one background thread applies every start
//! and reclaim transition in arrival order, one at a time.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error};

use crate::schedulable::{Schedulable, SchedulableObject};
use crate::sync::{lock, panic_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Start,
    Reclaim,
}

enum Command {
    Apply(Arc<SchedulableObject>, Transition),
    Stop,
}

pub(crate) struct StateChangeQueue {
    sender: Mutex<Option<Sender<Command>>>,
    receiver: Mutex<Option<Receiver<Command>>>,
    /// Units with an entry waiting in the channel.
    queued: Arc<Mutex<HashSet<u64>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StateChangeQueue {
    /// Create the queue without its consumer; see [`StateChangeQueue::start`].
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            queued: Arc::new(Mutex::new(HashSet::new())),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the consumer thread. Calling it twice is a no-op.
    pub(crate) fn start(&self) -> Result<(), std::io::Error> {
        let Some(rx) = lock(&self.receiver).take() else {
            return Ok(());
        };
        let queued = Arc::clone(&self.queued);
        let handle = std::thread::Builder::new()
            .name("SchedulableStateChangeQueue".into())
            .spawn(move || consume(rx, &queued))?;
        *lock(&self.handle) = Some(handle);
        Ok(())
    }

    pub(crate) fn push_start(&self, unit: Arc<SchedulableObject>) -> bool {
        self.push(unit, Transition::Start)
    }

    pub(crate) fn push_reclaim(&self, unit: Arc<SchedulableObject>) -> bool {
        self.push(unit, Transition::Reclaim)
    }

    /// Append a transition. An entry for a unit that already has one waiting
    /// is logged and dropped.
    fn push(&self, unit: Arc<SchedulableObject>, op: Transition) -> bool {
        let mut queued = lock(&self.queued);
        if !queued.insert(unit.id()) {
            error!(schedulable = %unit.name(), ?op, "duplicate state change, already queued");
            return false;
        }
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            queued.remove(&unit.id());
            debug!(schedulable = %unit.name(), ?op, "state change after shutdown ignored");
            return false;
        };
        let id = unit.id();
        if sender.send(Command::Apply(unit, op)).is_err() {
            queued.remove(&id);
            return false;
        }
        true
    }

    pub(crate) fn pending(&self) -> usize {
        lock(&self.queued).len()
    }

    /// Stop accepting transitions, let the consumer drain what is queued,
    /// and join it.
    pub(crate) fn stop(&self) {
        let pending = self.pending();
        if let Some(sender) = lock(&self.sender).take() {
            debug!(pending, "draining state changes");
            let _ = sender.send(Command::Stop);
        }
        if let Some(handle) = lock(&self.handle).take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("state change thread panicked");
            }
        }
    }
}

fn consume(rx: Receiver<Command>, queued: &Mutex<HashSet<u64>>) {
    for command in rx {
        let (unit, op) = match command {
            Command::Apply(unit, op) => (unit, op),
            Command::Stop => break,
        };
        lock(queued).remove(&unit.id());
        let applied = panic::catch_unwind(AssertUnwindSafe(|| match op {
            Transition::Start => unit.process_start(),
            Transition::Reclaim => unit.reclaim_notify(),
        }));
        if let Err(payload) = applied {
            error!(
                schedulable = %unit.name(),
                ?op,
                "state change failed: {}",
                panic_message(payload.as_ref())
            );
        }
    }
    debug!("state change thread exiting");
}
