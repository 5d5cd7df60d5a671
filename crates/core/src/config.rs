use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::lane::Lane;

mod loading;
mod validation;


pub use loading::load_dotenv;

// ── Top-level config ────────────────────────────────────────────────

/// Startup configuration of the thread service.
///
/// Parsed from TOML with `COUGAAR_THREAD_*` environment overrides. Fixed once
/// the runtime has started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadConfig {
    /// Which service variant to build.
    #[serde(default)]
    pub service_type: ServiceType,

    /// Name of the root tree node.
    #[serde(default = "default_root_name")]
    pub root_name: String,

    /// Lane used when a caller does not name one.
    #[serde(default)]
    pub default_lane: Lane,

    /// Absolute per-lane capacities.
    #[serde(default)]
    pub lanes: LaneCapacities,

    /// How long a pooled thread may keep taking continuations, in milliseconds.
    #[serde(default = "default_continuation_slice_ms")]
    pub continuation_slice_ms: u64,

    /// Long-running thread detector.
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Target share of rights per consumer, used by the percentage selector.
    #[serde(default)]
    pub percentage_targets: HashMap<String, f64>,
}

fn default_root_name() -> String {
    "Node root".into()
}

fn default_continuation_slice_ms() -> u64 {
    100
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            service_type: ServiceType::default(),
            root_name: default_root_name(),
            default_lane: Lane::default(),
            lanes: LaneCapacities::default(),
            continuation_slice_ms: default_continuation_slice_ms(),
            detector: DetectorConfig::default(),
            percentage_targets: HashMap::new(),
        }
    }
}

// ── Service variant ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Tree of propagating schedulers with per-lane limits.
    #[default]
    Hierarchical,
    /// Every start runs at once on an unbounded pool.
    Trivial,
    /// Every start runs in FIFO order on one thread.
    Single,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Hierarchical => "hierarchical",
            ServiceType::Trivial => "trivial",
            ServiceType::Single => "single",
        }
    }
}

impl std::str::FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hierarchical" => Ok(ServiceType::Hierarchical),
            "trivial" => Ok(ServiceType::Trivial),
            "single" => Ok(ServiceType::Single),
            other => Err(format!(
                "invalid service type '{other}', expected 'hierarchical', 'trivial' or 'single'"
            )),
        }
    }
}

// ── Lane capacities ─────────────────────────────────────────────────

/// Absolute capacity per lane. A negative number means no maximum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneCapacities {
    #[serde(default = "default_best_effort")]
    pub best_effort: i64,
    #[serde(default = "default_unbounded")]
    pub will_block: i64,
    #[serde(default = "default_restricted")]
    pub cpu_intense: i64,
    #[serde(default = "default_restricted")]
    pub well_behaved: i64,
}

fn default_best_effort() -> i64 {
    30
}

fn default_unbounded() -> i64 {
    -1
}

fn default_restricted() -> i64 {
    2
}

impl Default for LaneCapacities {
    fn default() -> Self {
        Self {
            best_effort: default_best_effort(),
            will_block: default_unbounded(),
            cpu_intense: default_restricted(),
            well_behaved: default_restricted(),
        }
    }
}

impl LaneCapacities {
    /// Capacity of `lane`, `None` when unbounded.
    pub fn capacity(&self, lane: Lane) -> Option<usize> {
        let raw = self.raw(lane);
        usize::try_from(raw).ok()
    }

    /// Set the capacity of `lane`; `None` makes it unbounded.
    pub fn set_capacity(&mut self, lane: Lane, capacity: Option<usize>) {
        let raw = capacity.map_or(-1, |c| i64::try_from(c).unwrap_or(i64::MAX));
        match lane {
            Lane::BestEffort => self.best_effort = raw,
            Lane::WillBlock => self.will_block = raw,
            Lane::CpuIntense => self.cpu_intense = raw,
            Lane::WellBehaved => self.well_behaved = raw,
        }
    }

    fn raw(&self, lane: Lane) -> i64 {
        match lane {
            Lane::BestEffort => self.best_effort,
            Lane::WillBlock => self.will_block,
            Lane::CpuIntense => self.cpu_intense,
            Lane::WellBehaved => self.well_behaved,
        }
    }
}

// ── Detector ────────────────────────────────────────────────────────

/// Sampling thresholds for the long-running thread detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sample_period_ms")]
    pub sample_period_ms: u64,

    /// Runs older than this are logged as warnings.
    #[serde(default = "default_warn_time_secs")]
    pub warn_time_secs: u64,

    /// Runs older than this are logged at info level.
    #[serde(default = "default_info_time_secs")]
    pub info_time_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_sample_period_ms() -> u64 {
    5000
}

fn default_warn_time_secs() -> u64 {
    100
}

fn default_info_time_secs() -> u64 {
    10
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            sample_period_ms: default_sample_period_ms(),
            warn_time_secs: default_warn_time_secs(),
            info_time_secs: default_info_time_secs(),
        }
    }
}
