use std::path::PathBuf;

use clap::Parser;
use cougaar_core::{Lane, ServiceType};

/// Live view of a thread service under synthetic load.
///
/// Builds one tree node per agent, keeps a set of repeating units busy in
/// each of them and prints what is running and queued at every interval.
#[derive(Parser, Debug)]
#[command(name = "thread-top", about = "Watch the hierarchical thread service under synthetic load")]
pub struct CliArgs {
    /// Path to a TOML config file (defaults plus COUGAAR_THREAD_* env when omitted)
    #[arg(long, env = "COUGAAR_THREAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Service variant override: hierarchical, trivial or single
    #[arg(long)]
    pub service_type: Option<ServiceType>,

    /// Number of agent nodes under the root
    #[arg(long, default_value = "3")]
    pub agents: usize,

    /// Repeating units per agent
    #[arg(long, default_value = "4")]
    pub units: usize,

    /// Lane the synthetic units run in
    #[arg(long, default_value = "best_effort")]
    pub lane: Lane,

    /// Simulated work per run, in milliseconds
    #[arg(long, default_value = "40")]
    pub work_ms: u64,

    /// Interval between restarts of each unit, in milliseconds
    #[arg(long, default_value = "100")]
    pub restart_ms: u64,

    /// Per-agent cap on concurrent rights in the chosen lane
    #[arg(long)]
    pub agent_max: Option<usize>,

    /// Hand out root rights by target share instead of round-robin
    #[arg(long)]
    pub percentage: bool,

    /// Interval between reports, in milliseconds
    #[arg(long, default_value = "1000")]
    pub interval_ms: u64,

    /// How long to run before shutting down, in seconds
    #[arg(long, default_value = "10")]
    pub duration_secs: u64,

    /// Emit one JSON object per report instead of a table
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lane_and_service_type() {
        let args = CliArgs::try_parse_from([
            "thread-top",
            "--lane",
            "cpu-intense",
            "--service-type",
            "single",
            "--agent-max",
            "1",
            "--json",
        ])
        .unwrap();
        assert_eq!(args.lane, Lane::CpuIntense);
        assert_eq!(args.service_type, Some(ServiceType::Single));
        assert_eq!(args.agent_max, Some(1));
        assert!(args.json);
        assert_eq!(args.agents, 3);
    }

    #[test]
    fn rejects_unknown_lane() {
        assert!(CliArgs::try_parse_from(["thread-top", "--lane", "fast"]).is_err());
    }
}
