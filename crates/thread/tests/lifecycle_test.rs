//! Life-cycle of hierarchical schedulables: start collapse, cancel,
//! suspend/resume, failing actions, timers and blocking annotations.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use cougaar_thread::{
    action, begin_blocking, with_net_io, BlockingKind, Lane, Schedulable, SchedulableState, ThreadError,
    ThreadListener,
};

use common::{counting, hierarchical, runs, stays, wait_for, Gate};

#[test]
fn starts_while_running_collapse_into_one_rerun() {
    let rt = hierarchical(4);
    let service = rt.thread_service(rt.root()).unwrap();
    let gate = Gate::new();
    let (unit, count) = counting(service.as_ref(), "test", "collapse", &gate);

    unit.start();
    wait_for("first run", || runs(&count) == 1);
    assert_eq!(unit.state(), SchedulableState::Running);
    unit.start();
    unit.start();
    unit.start();

    gate.open();
    wait_for("one rerun", || runs(&count) == 2);
    wait_for("dormant", || unit.state() == SchedulableState::Dormant);
    stays("two runs", || runs(&count) == 2);
    rt.shutdown();
}

#[test]
fn concurrent_starts_on_an_idle_unit_run_once() {
    let rt = hierarchical(1);
    let service = rt.thread_service(rt.root()).unwrap();
    let control = rt.control(rt.root()).unwrap();
    let gate = Gate::new();

    // Keep the lane busy so the unit waits in the queue.
    let (blocker, _) = counting(service.as_ref(), "test", "blocker", &gate);
    blocker.start();
    wait_for("blocker running", || control.running_thread_count(Lane::BestEffort) == 1);

    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let unit = service.get_thread(
        "test",
        action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    let barrier = Arc::new(Barrier::new(2));
    let starters: Vec<_> = (0..2)
        .map(|_| {
            let (unit, barrier) = (Arc::clone(&unit), Arc::clone(&barrier));
            std::thread::spawn(move || {
                barrier.wait();
                unit.start();
            })
        })
        .collect();
    for starter in starters {
        starter.join().unwrap();
    }
    wait_for("unit queued", || unit.state() == SchedulableState::Pending);

    gate.open();
    wait_for("one run", || runs(&count) == 1);
    wait_for("dormant", || unit.state() == SchedulableState::Dormant);
    stays("exactly one run", || runs(&count) == 1);
    rt.shutdown();
}

#[test]
fn cancel_removes_a_queued_unit_and_is_sticky() {
    let rt = hierarchical(1);
    let service = rt.thread_service(rt.root()).unwrap();
    let control = rt.control(rt.root()).unwrap();
    let gate = Gate::new();

    let (blocker, _) = counting(service.as_ref(), "test", "blocker", &gate);
    blocker.start();
    wait_for("blocker running", || control.running_thread_count(Lane::BestEffort) == 1);

    let (queued, queued_runs) = counting(service.as_ref(), "test", "queued", &gate);
    queued.start();
    wait_for("unit queued", || control.pending_thread_count(Lane::BestEffort) == 1);

    assert!(queued.cancel());
    assert!(queued.cancel());
    assert_eq!(control.pending_thread_count(Lane::BestEffort), 0);
    queued.start();

    // A running unit cannot be cancelled out from under its thread.
    assert!(!blocker.cancel());

    gate.open();
    wait_for("rights returned", || control.running_thread_count(Lane::BestEffort) == 0);
    stays("cancelled unit never runs", || runs(&queued_runs) == 0);
    assert_eq!(queued.state(), SchedulableState::Dormant);
    rt.shutdown();
}

#[test]
fn cancelled_running_unit_does_not_restart() {
    let rt = hierarchical(4);
    let service = rt.thread_service(rt.root()).unwrap();
    let gate = Gate::new();
    let (unit, count) = counting(service.as_ref(), "test", "cancel-running", &gate);

    unit.start();
    wait_for("running", || runs(&count) == 1);
    unit.start();
    assert!(!unit.cancel());

    gate.open();
    wait_for("dormant", || unit.state() == SchedulableState::Dormant);
    stays("no restart", || runs(&count) == 1);
    rt.shutdown();
}

#[test]
fn suspend_idle_unit_fires_callback_at_once() {
    let rt = hierarchical(4);
    let service = rt.thread_service(rt.root()).unwrap();
    let gate = Gate::new();
    gate.open();
    let (unit, count) = counting(service.as_ref(), "test", "idle", &gate);

    let fired = Arc::new(AtomicUsize::new(0));
    let callback_count = Arc::clone(&fired);
    unit.suspend(Box::new(move |_| {
        callback_count.fetch_add(1, Ordering::SeqCst);
    }))
    .unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(unit.state(), SchedulableState::Suspended);

    unit.start();
    stays("no run while suspended", || runs(&count) == 0);

    unit.resume();
    wait_for("run after resume", || runs(&count) == 1);
    wait_for("dormant", || unit.state() == SchedulableState::Dormant);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    rt.shutdown();
}

#[test]
fn suspend_running_unit_waits_for_the_run_to_end() {
    let rt = hierarchical(4);
    let service = rt.thread_service(rt.root()).unwrap();
    let gate = Gate::new();
    let (unit, count) = counting(service.as_ref(), "test", "busy", &gate);

    unit.start();
    wait_for("running", || runs(&count) == 1);

    let fired = Arc::new(AtomicUsize::new(0));
    let callback_count = Arc::clone(&fired);
    unit.suspend(Box::new(move |suspended| {
        assert_eq!(suspended.name(), "busy");
        callback_count.fetch_add(1, Ordering::SeqCst);
    }))
    .unwrap();
    let second = unit.suspend(Box::new(|_| {}));
    assert!(matches!(second, Err(ThreadError::SuspendPending(_))));
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    gate.open();
    wait_for("suspension to take effect", || fired.load(Ordering::SeqCst) == 1);
    assert_eq!(unit.state(), SchedulableState::Suspended);

    // Nothing was started meanwhile, so resuming does not run it.
    unit.resume();
    stays("no run after resume", || runs(&count) == 1);
    unit.start();
    wait_for("second run", || runs(&count) == 2);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    rt.shutdown();
}

#[test]
fn failing_and_panicking_actions_release_their_rights() {
    let rt = hierarchical(1);
    let service = rt.thread_service(rt.root()).unwrap();
    let control = rt.control(rt.root()).unwrap();

    let failing = service.get_thread("test", action(|| Err(anyhow::anyhow!("boom"))));
    let panicking = service.get_thread("test", action(|| panic!("kaboom")));
    let ok_runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ok_runs);
    let healthy = service.get_thread(
        "test",
        action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    failing.start();
    panicking.start();
    healthy.start();
    wait_for("healthy unit runs", || runs(&ok_runs) == 1);
    wait_for("rights returned", || control.running_thread_count(Lane::BestEffort) == 0);

    let accounting = control.rights_accounting(Lane::BestEffort);
    assert_eq!(accounting.granted, accounting.released);
    for unit in [&failing, &panicking, &healthy] {
        wait_for("dormant", || unit.state() == SchedulableState::Dormant);
    }
    rt.shutdown();
}

#[test]
fn timers_start_the_unit() {
    let rt = hierarchical(4);
    let service = rt.thread_service(rt.root()).unwrap();
    let gate = Gate::new();
    gate.open();

    let (once, once_runs) = counting(service.as_ref(), "test", "once", &gate);
    once.schedule(Duration::from_millis(20));
    wait_for("delayed run", || runs(&once_runs) == 1);
    stays("one-shot runs once", || runs(&once_runs) == 1);

    let (repeating, repeat_runs) = counting(service.as_ref(), "test", "repeating", &gate);
    repeating.schedule_repeating(Duration::from_millis(10), Duration::from_millis(10));
    wait_for("three periodic runs", || runs(&repeat_runs) >= 3);
    repeating.cancel_timer();
    std::thread::sleep(Duration::from_millis(50));
    let settled = runs(&repeat_runs);
    stays("no runs after cancel_timer", || runs(&repeat_runs) == settled);
    rt.shutdown();
}

#[test]
fn repeating_timer_keeps_a_dropped_unit_running() {
    let rt = hierarchical(4);
    let service = rt.thread_service(rt.root()).unwrap();
    let gate = Gate::new();
    gate.open();

    let (unit, count) = counting(service.as_ref(), "test", "detached", &gate);
    let weak = Arc::downgrade(&unit);
    unit.schedule_repeating(Duration::from_millis(10), Duration::from_millis(10));
    drop(unit);
    wait_for("runs without a handle", || runs(&count) >= 3);
    assert!(weak.upgrade().is_some());

    // Cancelling the timer releases the unit once its queued firing is gone.
    weak.upgrade().unwrap().cancel_timer();
    wait_for("unit released", || weak.upgrade().is_none());
    rt.shutdown();
}

#[test]
fn blocking_annotation_shows_in_status() {
    let rt = hierarchical(4);
    let service = rt.thread_service(rt.root()).unwrap();
    let gate = Gate::new();

    let inner_gate = Arc::clone(&gate);
    let unit = service.get_thread_named(
        "test",
        action(move || {
            with_net_io("fetching peers", || inner_gate.wait());
            Ok(())
        }),
        "fetcher",
    );
    unit.start();
    wait_for("annotation visible", || {
        rt.status_snapshot()
            .iter()
            .any(|e| e.schedulable == "fetcher" && e.blocking == "Network I/O: fetching peers")
    });

    gate.open();
    wait_for("dormant", || unit.state() == SchedulableState::Dormant);
    assert!(unit.blocking().is_none());
    rt.shutdown();
}

#[test]
fn well_behaved_lane_rejects_io_annotations() {
    let rt = hierarchical(4);
    let service = rt.thread_service(rt.root()).unwrap();
    let accepted = Arc::new(Mutex::new(None));
    let result = Arc::clone(&accepted);
    let ran = Arc::new(AtomicBool::new(false));
    let ran_flag = Arc::clone(&ran);

    let unit = service.get_thread_in_lane(
        "test",
        action(move || {
            *result.lock().unwrap() = Some(begin_blocking(BlockingKind::NetIo, Some("socket")));
            ran_flag.store(true, Ordering::SeqCst);
            Ok(())
        }),
        Some("polite"),
        Lane::WellBehaved,
    );
    unit.start();
    wait_for("run", || ran.load(Ordering::SeqCst));
    assert_eq!(*accepted.lock().unwrap(), Some(false));
    rt.shutdown();
}

#[derive(Default)]
struct CountingListener {
    queued: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
    given: AtomicUsize,
    returned: AtomicUsize,
}

impl ThreadListener for CountingListener {
    fn thread_queued(&self, _: &dyn Schedulable, _: &str) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    fn thread_started(&self, _: &dyn Schedulable, _: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn thread_stopped(&self, _: &dyn Schedulable, _: &str) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn right_given(&self, _: &str) {
        self.given.fetch_add(1, Ordering::SeqCst);
    }

    fn right_returned(&self, _: &str) {
        self.returned.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn listeners_see_every_transition() {
    let rt = hierarchical(4);
    let listener = Arc::new(CountingListener::default());
    rt.listeners(rt.root())
        .unwrap()
        .add_listener(Arc::clone(&listener) as Arc<dyn ThreadListener>, Lane::BestEffort);

    let service = rt.thread_service(rt.root()).unwrap();
    let gate = Gate::new();
    gate.open();
    let (unit, count) = counting(service.as_ref(), "test", "observed", &gate);
    unit.start();
    wait_for("run", || runs(&count) == 1);
    wait_for("right returned", || listener.returned.load(Ordering::SeqCst) == 1);

    assert_eq!(listener.started.load(Ordering::SeqCst), 1);
    assert_eq!(listener.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(listener.given.load(Ordering::SeqCst), 1);
    assert_eq!(listener.queued.load(Ordering::SeqCst), 0);
    rt.shutdown();
}
