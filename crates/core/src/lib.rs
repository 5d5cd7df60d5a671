pub mod config;
pub mod error;
pub mod lane;

pub use config::{DetectorConfig, LaneCapacities, ServiceType, ThreadConfig};
pub use error::*;
pub use lane::{Lane, LANE_COUNT};
