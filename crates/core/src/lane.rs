use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of independent scheduling lanes.
pub const LANE_COUNT: usize = 4;

/// A concurrency class. Every tree node has one scheduler per lane and
/// every lane has its own process-wide worker pool; budgets never cross lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Anything goes. The default lane.
    #[default]
    BestEffort,
    /// Work that is expected to block for long periods.
    WillBlock,
    /// Work that burns CPU; may only annotate lock waits or CPU use.
    CpuIntense,
    /// Short, non-blocking work; may only annotate lock waits.
    WellBehaved,
}

impl Lane {
    pub const ALL: [Lane; LANE_COUNT] = [
        Lane::BestEffort,
        Lane::WillBlock,
        Lane::CpuIntense,
        Lane::WellBehaved,
    ];

    pub fn index(self) -> usize {
        match self {
            Lane::BestEffort => 0,
            Lane::WillBlock => 1,
            Lane::CpuIntense => 2,
            Lane::WellBehaved => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Lane> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::BestEffort => "best_effort",
            Lane::WillBlock => "will_block",
            Lane::CpuIntense => "cpu_intense",
            Lane::WellBehaved => "well_behaved",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "best_effort" | "0" => Ok(Lane::BestEffort),
            "will_block" | "1" => Ok(Lane::WillBlock),
            "cpu_intense" | "2" => Ok(Lane::CpuIntense),
            "well_behaved" | "3" => Ok(Lane::WellBehaved),
            other => Err(format!("unknown lane '{other}'")),
        }
    }
}
