//! Helpers shared by the thread-service integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use cougaar_thread::{action, Schedulable, ServiceType, ThreadConfig, ThreadRuntime, ThreadService};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn config(service_type: ServiceType) -> ThreadConfig {
    let mut config = ThreadConfig::default();
    config.service_type = service_type;
    config.detector.enabled = false;
    config
}

pub fn hierarchical(best_effort: i64) -> ThreadRuntime {
    let mut config = config(ServiceType::Hierarchical);
    config.lanes.best_effort = best_effort;
    ThreadRuntime::start(config).unwrap()
}

/// Poll `cond` until it holds, failing the test after [`TIMEOUT`].
pub fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Hold `cond` for a short while, failing if it ever breaks.
pub fn stays(what: &str, cond: impl Fn() -> bool) {
    let until = Instant::now() + Duration::from_millis(150);
    while Instant::now() < until {
        assert!(cond(), "{what} no longer holds");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// A latch actions block on until the test opens it.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

/// A unit that counts its runs and blocks on `gate` in each of them.
pub fn counting(
    service: &dyn ThreadService,
    consumer: &str,
    name: &str,
    gate: &Arc<Gate>,
) -> (Arc<dyn Schedulable>, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let (counter, gate) = (Arc::clone(&runs), Arc::clone(gate));
    let unit = service.get_thread_named(
        consumer,
        action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            gate.wait();
            Ok(())
        }),
        name,
    );
    (unit, runs)
}

pub fn runs(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
