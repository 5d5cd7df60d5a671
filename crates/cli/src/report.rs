//! One report per interval: per-lane rights at the root, per-agent totals,
//! and the longest-running units.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use cougaar_core::Lane;
use cougaar_thread::{ConsumerStats, StatusEntry, StatusKind, ThreadRuntime};
use serde::Serialize;

use crate::load::SyntheticLoad;

const TOP_UNITS: usize = 8;

#[derive(Debug, Serialize)]
pub struct LaneRow {
    pub lane: Lane,
    pub max: Option<usize>,
    pub running: usize,
    pub pending: usize,
    pub granted: u64,
    pub released: u64,
}

#[derive(Debug, Serialize)]
pub struct AgentRow {
    pub agent: String,
    #[serde(flatten)]
    pub stats: ConsumerStats,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub at: DateTime<Utc>,
    pub service: &'static str,
    pub running: usize,
    pub queued: usize,
    pub lanes: Vec<LaneRow>,
    pub agents: Vec<AgentRow>,
    pub longest: Vec<StatusEntry>,
}

impl Report {
    pub fn collect(runtime: &ThreadRuntime, load: &SyntheticLoad) -> Self {
        let mut status = runtime.status_snapshot();
        let running = status.iter().filter(|e| e.kind == StatusKind::Running).count();
        let queued = status.len() - running;
        status.sort_by(|a, b| b.elapsed_ms.cmp(&a.elapsed_ms));
        status.truncate(TOP_UNITS);

        let lanes = match runtime.control(runtime.root()) {
            Ok(control) => Lane::ALL
                .into_iter()
                .map(|lane| {
                    let accounting = control.rights_accounting(lane);
                    LaneRow {
                        lane,
                        max: control.max_running_thread_count(lane),
                        running: control.running_thread_count(lane),
                        pending: control.pending_thread_count(lane),
                        granted: accounting.granted,
                        released: accounting.released,
                    }
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        let stats = load.watcher.snapshot();
        let agents = load
            .agents
            .iter()
            .map(|(name, _)| AgentRow {
                agent: name.clone(),
                stats: stats.get(name).cloned().unwrap_or_default(),
            })
            .collect();

        Self {
            at: Utc::now(),
            service: runtime.service_type().as_str(),
            running,
            queued,
            lanes,
            agents,
            longest: status,
        }
    }

    pub fn write_json(&self, out: &mut impl Write) -> Result<()> {
        serde_json::to_writer(&mut *out, self)?;
        writeln!(out)?;
        Ok(())
    }

    pub fn write_table(&self, out: &mut impl Write) -> Result<()> {
        writeln!(
            out,
            "{}  service={}  running={}  queued={}",
            self.at.format("%H:%M:%S%.3f"),
            self.service,
            self.running,
            self.queued
        )?;

        if !self.lanes.is_empty() {
            writeln!(out, "  {:<13} {:>9} {:>8} {:>8} {:>10} {:>10}", "LANE", "MAX", "RUNNING", "PENDING", "GRANTED", "RELEASED")?;
            for row in &self.lanes {
                let max = row.max.map_or_else(|| "-".to_string(), |m| m.to_string());
                writeln!(
                    out,
                    "  {:<13} {:>9} {:>8} {:>8} {:>10} {:>10}",
                    row.lane.as_str(),
                    max,
                    row.running,
                    row.pending,
                    row.granted,
                    row.released
                )?;
            }
        }

        if !self.agents.is_empty() {
            writeln!(out, "  {:<13} {:>8} {:>8} {:>10} {:>10}", "AGENT", "RIGHTS", "PENDING", "RUNS", "MEAN(ms)")?;
            for row in &self.agents {
                writeln!(
                    out,
                    "  {:<13} {:>8} {:>8} {:>10} {:>10.1}",
                    row.agent,
                    row.stats.outstanding,
                    row.stats.pending,
                    row.stats.runs_total,
                    row.stats.mean_run.as_secs_f64() * 1000.0
                )?;
            }
        }

        for entry in &self.longest {
            writeln!(
                out,
                "  {:<7} {:>6}ms  {:<24} {:<13} {}",
                match entry.kind {
                    StatusKind::Running => "RUN",
                    StatusKind::Queued => "QUEUED",
                },
                entry.elapsed_ms,
                entry.schedulable,
                entry.scheduler,
                entry.blocking
            )?;
        }
        writeln!(out)?;
        Ok(())
    }
}
