//! Synthetic agents and units that keep the service busy.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cougaar_core::Lane;
use cougaar_thread::{
    action, with_wait, NodeId, PercentageLoadSelector, Schedulable, SchedulerWatcher, ThreadListener, ThreadRuntime,
};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;

/// Everything the load keeps alive while it runs.
pub struct SyntheticLoad {
    pub agents: Vec<(String, NodeId)>,
    pub watcher: Arc<SchedulerWatcher>,
    units: Vec<Arc<dyn Schedulable>>,
    _snapshotter: Option<Arc<dyn Schedulable>>,
}

impl SyntheticLoad {
    pub fn spawn(runtime: &ThreadRuntime, args: &CliArgs) -> Result<Self> {
        let watcher = Arc::new(SchedulerWatcher::new());
        let hierarchical = runtime.listeners(runtime.root()).is_ok();

        let snapshotter = if args.percentage && hierarchical {
            Some(install_percentage(runtime, args.lane)?)
        } else {
            if args.percentage {
                warn!(service = runtime.service_type().as_str(), "percentage selection needs the hierarchical service");
            }
            None
        };

        let mut agents = Vec::with_capacity(args.agents);
        let mut units = Vec::with_capacity(args.agents * args.units);
        for i in 0..args.agents {
            let name = format!("agent-{i}");
            let node = runtime
                .add_node(&name, runtime.root())
                .with_context(|| format!("failed to add node '{name}'"))?;

            if hierarchical {
                let control = runtime.control(node)?;
                if let Some(max) = args.agent_max {
                    control.set_max_running_thread_count(args.lane, Some(max));
                }
                control
                    .listeners()
                    .add_listener_all_lanes(Arc::clone(&watcher) as Arc<dyn ThreadListener>);
            }

            let service = runtime.thread_service(node)?;
            for j in 0..args.units {
                let work = Duration::from_millis(args.work_ms);
                let unit = service.get_thread_in_lane(
                    &name,
                    action(move || {
                        with_wait("simulated work", || std::thread::sleep(work));
                        Ok(())
                    }),
                    Some(&format!("{name}/unit-{j}")),
                    args.lane,
                );
                unit.schedule_repeating(Duration::ZERO, Duration::from_millis(args.restart_ms.max(1)));
                units.push(unit);
            }
            debug!(agent = %name, %node, units = args.units, "agent started");
            agents.push((name, node));
        }

        info!(
            agents = agents.len(),
            units = units.len(),
            lane = %args.lane,
            "synthetic load running"
        );
        Ok(Self {
            agents,
            watcher,
            units,
            _snapshotter: snapshotter,
        })
    }

    /// Stop restarting the units. Runs already in flight finish normally.
    pub fn stop(&self) {
        for unit in &self.units {
            unit.cancel_timer();
            unit.cancel();
        }
    }
}

fn install_percentage(runtime: &ThreadRuntime, lane: Lane) -> Result<Arc<dyn Schedulable>> {
    let control = runtime.control(runtime.root())?;
    let service = runtime.thread_service(runtime.root())?;
    let selector = Arc::new(PercentageLoadSelector::new(runtime.config().percentage_targets.clone()));
    info!(
        targets = runtime.config().percentage_targets.len(),
        %lane,
        "percentage selector installed on root"
    );
    Ok(selector.install(service.as_ref(), &control, lane))
}
