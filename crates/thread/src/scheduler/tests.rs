use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use cougaar_core::{Lane, ThreadConfig};

use crate::runtime::ThreadRuntime;
use crate::schedulable::{action, Schedulable, SchedulableState};
use crate::service::ThreadService;

use super::{ChildQualifier, QueueComparator, Qualifier, Scheduler, ShareCap};

// ── Helpers ─────────────────────────────────────────────────────────

fn runtime(best_effort: i64, slice_ms: u64) -> ThreadRuntime {
    let mut config = ThreadConfig::default();
    config.lanes.best_effort = best_effort;
    config.continuation_slice_ms = slice_ms;
    config.detector.enabled = false;
    ThreadRuntime::start(config).unwrap()
}

fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

fn gated(service: &dyn ThreadService, consumer: &str, name: &str, gate: &Arc<Gate>) -> Arc<dyn Schedulable> {
    let gate = Arc::clone(gate);
    service.get_thread_named(
        consumer,
        action(move || {
            gate.wait();
            Ok(())
        }),
        name,
    )
}

fn recording(
    service: &dyn ThreadService,
    consumer: &str,
    name: &'static str,
    log: &Arc<Mutex<Vec<&'static str>>>,
) -> Arc<dyn Schedulable> {
    let log = Arc::clone(log);
    service.get_thread_named(
        consumer,
        action(move || {
            log.lock().unwrap().push(name);
            Ok(())
        }),
        name,
    )
}

// ── Ordering ────────────────────────────────────────────────────────

#[test]
fn default_comparator_runs_queued_units_in_start_order() {
    let rt = runtime(1, 100);
    let service = rt.thread_service(rt.root()).unwrap();
    let control = rt.control(rt.root()).unwrap();
    let gate = Arc::new(Gate::default());
    let log = Arc::new(Mutex::new(Vec::new()));

    let blocker = gated(service.as_ref(), "test", "blocker", &gate);
    blocker.start();
    wait_for("blocker to run", || control.running_thread_count(Lane::BestEffort) == 1);

    let units: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|name| recording(service.as_ref(), "test", name, &log))
        .collect();
    for unit in &units {
        unit.start();
    }
    wait_for("three queued units", || control.pending_thread_count(Lane::BestEffort) == 3);
    assert_eq!(units[0].state(), SchedulableState::Pending);

    gate.open();
    wait_for("queued units to run", || log.lock().unwrap().len() == 3);
    assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);
    rt.shutdown();
}

#[test]
fn custom_comparator_reorders_the_queue() {
    let rt = runtime(1, 100);
    let service = rt.thread_service(rt.root()).unwrap();
    let control = rt.control(rt.root()).unwrap();
    let by_name_desc: QueueComparator = Arc::new(|a: &dyn Schedulable, b: &dyn Schedulable| b.name().cmp(a.name()));
    control.set_queue_comparator(Lane::BestEffort, Some(by_name_desc));

    let gate = Arc::new(Gate::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let blocker = gated(service.as_ref(), "test", "blocker", &gate);
    blocker.start();
    wait_for("blocker to run", || control.running_thread_count(Lane::BestEffort) == 1);

    let units: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|name| recording(service.as_ref(), "test", name, &log))
        .collect();
    for unit in &units {
        unit.start();
    }
    wait_for("three queued units", || control.pending_thread_count(Lane::BestEffort) == 3);

    gate.open();
    wait_for("queued units to run", || log.lock().unwrap().len() == 3);
    assert_eq!(*log.lock().unwrap(), ["c", "b", "a"]);
    rt.shutdown();
}

// ── Capacity ────────────────────────────────────────────────────────

#[test]
fn capacity_two_with_five_units() {
    let rt = runtime(2, 100);
    let service = rt.thread_service(rt.root()).unwrap();
    let control = rt.control(rt.root()).unwrap();
    let gate = Arc::new(Gate::default());
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let units: Vec<_> = (0..5)
        .map(|i| {
            let (gate, active, peak, done) =
                (Arc::clone(&gate), Arc::clone(&active), Arc::clone(&peak), Arc::clone(&done));
            service.get_thread_named(
                "test",
                action(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    gate.wait();
                    active.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                &format!("unit-{i}"),
            )
        })
        .collect();
    for unit in &units {
        unit.start();
    }

    wait_for("two running, three pending", || {
        control.running_thread_count(Lane::BestEffort) == 2 && control.pending_thread_count(Lane::BestEffort) == 3
    });
    assert_eq!(rt.pool(Lane::BestEffort).unwrap().in_use(), 2);

    gate.open();
    wait_for("all five runs", || done.load(Ordering::SeqCst) == 5);
    wait_for("rights returned", || control.running_thread_count(Lane::BestEffort) == 0);

    assert!(peak.load(Ordering::SeqCst) <= 2);
    let accounting = control.rights_accounting(Lane::BestEffort);
    assert_eq!(accounting.granted, accounting.released);
    assert_eq!(accounting.in_flight, 0);
    for unit in &units {
        wait_for("unit to go dormant", || unit.state() == SchedulableState::Dormant);
    }
    rt.shutdown();
}

#[test]
fn raising_the_max_starts_queued_units() {
    let rt = runtime(4, 100);
    let service = rt.thread_service(rt.root()).unwrap();
    let control = rt.control(rt.root()).unwrap();
    control.set_max_running_thread_count(Lane::BestEffort, Some(1));

    let gate = Arc::new(Gate::default());
    let units: Vec<_> = (0..3)
        .map(|i| gated(service.as_ref(), "test", &format!("unit-{i}"), &gate))
        .collect();
    for unit in &units {
        unit.start();
    }
    wait_for("one running", || {
        control.running_thread_count(Lane::BestEffort) == 1 && control.pending_thread_count(Lane::BestEffort) == 2
    });

    control.set_max_running_thread_count(Lane::BestEffort, Some(3));
    wait_for("three running", || control.running_thread_count(Lane::BestEffort) == 3);
    assert_eq!(control.pending_thread_count(Lane::BestEffort), 0);

    gate.open();
    wait_for("rights returned", || control.running_thread_count(Lane::BestEffort) == 0);
    rt.shutdown();
}

#[test]
fn lowering_the_max_below_running_holds_back_the_queue() {
    // No continuation slice, so every finished run returns its right.
    let rt = runtime(3, 0);
    let service = rt.thread_service(rt.root()).unwrap();
    let control = rt.control(rt.root()).unwrap();
    let gates: Vec<Arc<Gate>> = (0..3).map(|_| Arc::new(Gate::default())).collect();
    let units: Vec<_> = gates
        .iter()
        .enumerate()
        .map(|(i, gate)| gated(service.as_ref(), "test", &format!("busy-{i}"), gate))
        .collect();
    for unit in &units {
        unit.start();
    }
    wait_for("three running", || control.running_thread_count(Lane::BestEffort) == 3);

    let log = Arc::new(Mutex::new(Vec::new()));
    let waiting = recording(service.as_ref(), "test", "waiting", &log);
    waiting.start();
    wait_for("one queued", || control.pending_thread_count(Lane::BestEffort) == 1);

    control.set_max_running_thread_count(Lane::BestEffort, Some(1));

    gates[0].open();
    wait_for("two running", || control.running_thread_count(Lane::BestEffort) == 2);
    gates[1].open();
    wait_for("one running", || control.running_thread_count(Lane::BestEffort) == 1);
    std::thread::sleep(Duration::from_millis(100));
    assert!(log.lock().unwrap().is_empty(), "queued unit started above the new max");
    assert_eq!(control.pending_thread_count(Lane::BestEffort), 1);

    gates[2].open();
    wait_for("queued unit ran", || log.lock().unwrap().len() == 1);
    wait_for("rights returned", || control.running_thread_count(Lane::BestEffort) == 0);
    let accounting = control.rights_accounting(Lane::BestEffort);
    assert_eq!(accounting.granted, 4);
    assert_eq!(accounting.granted, accounting.released);
    rt.shutdown();
}

#[test]
fn unmatched_release_is_clamped_at_zero() {
    let rt = runtime(2, 100);
    let control = rt.control(rt.root()).unwrap();
    let scheduler = Arc::clone(control.scheduler(Lane::BestEffort));

    scheduler.release_rights("stray");
    let accounting = scheduler.rights_accounting();
    assert_eq!(accounting.running, 0);
    assert_eq!(accounting.released, 0);

    // The scheduler still grants its full capacity afterwards.
    let service = rt.thread_service(rt.root()).unwrap();
    let gate = Arc::new(Gate::default());
    let units: Vec<_> = (0..3)
        .map(|i| gated(service.as_ref(), "test", &format!("unit-{i}"), &gate))
        .collect();
    for unit in &units {
        unit.start();
    }
    wait_for("two running", || scheduler.running_thread_count() == 2);
    assert_eq!(scheduler.pending_thread_count(), 1);
    gate.open();
    wait_for("rights returned", || scheduler.running_thread_count() == 0);
    rt.shutdown();
}

#[test]
fn max_is_clamped_to_the_absolute_capacity() {
    let rt = runtime(4, 100);
    let control = rt.control(rt.root()).unwrap();

    control.set_max_running_thread_count(Lane::BestEffort, Some(10));
    assert_eq!(control.max_running_thread_count(Lane::BestEffort), Some(4));

    control.set_max_running_thread_count(Lane::BestEffort, None);
    assert_eq!(control.max_running_thread_count(Lane::BestEffort), Some(4));

    control.set_max_running_thread_count(Lane::WillBlock, None);
    assert_eq!(control.max_running_thread_count(Lane::WillBlock), None);
    rt.shutdown();
}

// ── Qualifiers ──────────────────────────────────────────────────────

#[test]
fn qualifier_parks_and_replays_units() {
    let rt = runtime(4, 100);
    let service = rt.thread_service(rt.root()).unwrap();
    let control = rt.control(rt.root()).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let only_allowed: Arc<dyn Qualifier> = Arc::new(|unit: &dyn Schedulable| unit.consumer() != "blocked");
    assert!(control.set_qualifier(Lane::BestEffort, Some(only_allowed)));

    let counter = Arc::clone(&runs);
    let unit = service.get_thread(
        "blocked",
        action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    unit.start();
    unit.start();
    wait_for("unit to be parked", || unit.state() == SchedulableState::Disqualified);
    assert_eq!(control.scheduler(Lane::BestEffort).disqualified_count(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    assert!(control.set_qualifier(Lane::BestEffort, None));
    wait_for("replayed run", || runs.load(Ordering::SeqCst) >= 1);
    wait_for("unit to go dormant", || unit.state() == SchedulableState::Dormant);
    // Two starts while parked collapse into one run.
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(control.scheduler(Lane::BestEffort).disqualified_count(), 0);
    rt.shutdown();
}

#[test]
fn second_qualifier_is_refused() {
    let rt = runtime(4, 100);
    let control = rt.control(rt.root()).unwrap();
    let accept_all: Arc<dyn Qualifier> = Arc::new(|_: &dyn Schedulable| true);

    assert!(control.set_qualifier(Lane::BestEffort, Some(Arc::clone(&accept_all))));
    assert!(!control.set_qualifier(Lane::BestEffort, Some(accept_all)));
    assert!(control.set_qualifier(Lane::BestEffort, None));

    assert!(control.set_child_qualifier(Lane::BestEffort, Some(Arc::new(ShareCap::new(0.5)))));
    assert!(!control.set_child_qualifier(Lane::BestEffort, Some(Arc::new(ShareCap::new(0.5)))));
    assert!(control.set_child_qualifier(Lane::BestEffort, None));
    rt.shutdown();
}

#[test]
fn child_qualifier_holds_back_a_child_until_cleared() {
    let rt = runtime(4, 100);
    let agent = rt.add_node("agent", rt.root()).unwrap();
    let root_control = rt.control(rt.root()).unwrap();
    let agent_control = rt.control(agent).unwrap();
    let service = rt.thread_service(agent).unwrap();

    let deny_agent = |_: &Scheduler, child: &Scheduler| child.name() != "agent";
    assert!(root_control.set_child_qualifier(Lane::BestEffort, Some(Arc::new(deny_agent))));

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let unit = service.get_thread(
        "agent",
        action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    unit.start();
    wait_for("unit queued in the agent", || agent_control.pending_thread_count(Lane::BestEffort) == 1);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    assert!(root_control.set_child_qualifier(Lane::BestEffort, None));
    wait_for("unit to run", || runs.load(Ordering::SeqCst) == 1);
    wait_for("rights returned", || root_control.running_thread_count(Lane::BestEffort) == 0);
    rt.shutdown();
}

// ── Propagation ─────────────────────────────────────────────────────

#[test]
fn child_limit_bounds_only_its_subtree() {
    let rt = runtime(4, 100);
    let agent = rt.add_node("agent", rt.root()).unwrap();
    let root_control = rt.control(rt.root()).unwrap();
    let agent_control = rt.control(agent).unwrap();
    agent_control.set_max_running_thread_count(Lane::BestEffort, Some(1));

    let gate = Arc::new(Gate::default());
    let agent_service = rt.thread_service(agent).unwrap();
    let agent_units: Vec<_> = (0..3)
        .map(|i| gated(agent_service.as_ref(), "agent", &format!("agent-{i}"), &gate))
        .collect();
    for unit in &agent_units {
        unit.start();
    }
    wait_for("agent at its limit", || {
        agent_control.running_thread_count(Lane::BestEffort) == 1
            && agent_control.pending_thread_count(Lane::BestEffort) == 2
    });
    assert_eq!(root_control.running_thread_count(Lane::BestEffort), 1);

    let root_service = rt.thread_service(rt.root()).unwrap();
    let root_unit = gated(root_service.as_ref(), "node", "root-unit", &gate);
    root_unit.start();
    wait_for("root unit to run", || root_control.running_thread_count(Lane::BestEffort) == 2);
    assert_eq!(agent_control.pending_thread_count(Lane::BestEffort), 2);

    gate.open();
    wait_for("all rights returned", || {
        root_control.running_thread_count(Lane::BestEffort) == 0
            && agent_control.running_thread_count(Lane::BestEffort) == 0
            && agent_control.pending_thread_count(Lane::BestEffort) == 0
    });
    let root = root_control.rights_accounting(Lane::BestEffort);
    let child = agent_control.rights_accounting(Lane::BestEffort);
    assert_eq!(root.granted, root.released);
    assert_eq!(child.granted, child.released);
    rt.shutdown();
}

#[test]
fn round_robin_alternates_between_children() {
    // No continuations, so every right goes back through the selector.
    let rt = runtime(1, 0);
    let a = rt.add_node("agent-a", rt.root()).unwrap();
    let b = rt.add_node("agent-b", rt.root()).unwrap();
    let root_control = rt.control(rt.root()).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(Gate::default());

    let root_service = rt.thread_service(rt.root()).unwrap();
    let blocker = gated(root_service.as_ref(), "node", "blocker", &gate);
    blocker.start();
    wait_for("blocker to run", || root_control.running_thread_count(Lane::BestEffort) == 1);

    let service_a = rt.thread_service(a).unwrap();
    let service_b = rt.thread_service(b).unwrap();
    let units = [
        recording(service_a.as_ref(), "agent-a", "a1", &log),
        recording(service_a.as_ref(), "agent-a", "a2", &log),
        recording(service_b.as_ref(), "agent-b", "b1", &log),
        recording(service_b.as_ref(), "agent-b", "b2", &log),
    ];
    for unit in &units {
        unit.start();
    }
    let control_a = rt.control(a).unwrap();
    let control_b = rt.control(b).unwrap();
    wait_for("both agents queued", || {
        control_a.pending_thread_count(Lane::BestEffort) == 2 && control_b.pending_thread_count(Lane::BestEffort) == 2
    });

    gate.open();
    wait_for("all four runs", || log.lock().unwrap().len() == 4);
    assert_eq!(*log.lock().unwrap(), ["a1", "b1", "a2", "b2"]);
    rt.shutdown();
}

#[test]
fn share_cap_admits_by_share_of_parent_capacity() {
    let rt = runtime(4, 100);
    let agent = rt.add_node("agent", rt.root()).unwrap();
    let root = rt.control(rt.root()).unwrap();
    let child = rt.control(agent).unwrap();

    let cap = ShareCap::new(0.5);
    assert!(cap.admit(root.scheduler(Lane::BestEffort), child.scheduler(Lane::BestEffort)));
    // Unbounded parents admit everyone.
    assert!(cap.admit(root.scheduler(Lane::WillBlock), child.scheduler(Lane::WillBlock)));
    rt.shutdown();
}
