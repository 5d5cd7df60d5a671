use std::env;
use std::path::Path;

use crate::error::ThreadError;
use crate::lane::Lane;

use super::ThreadConfig;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_opt(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

impl ThreadConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ThreadError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ThreadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ThreadError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, ThreadError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `COUGAAR_THREAD_*` overrides on top of the parsed values.
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parsed("COUGAAR_THREAD_SERVICE_TYPE") {
            self.service_type = v;
        }
        if let Some(v) = env_opt("COUGAAR_THREAD_ROOT_NAME") {
            self.root_name = v;
        }
        if let Some(v) = env_parsed("COUGAAR_THREAD_DEFAULT_LANE") {
            self.default_lane = v;
        }
        if let Some(v) = env_parsed("COUGAAR_THREAD_CONTINUATION_MS") {
            self.continuation_slice_ms = v;
        }
        for lane in Lane::ALL {
            let key = format!("COUGAAR_THREAD_{}_CAPACITY", lane.as_str().to_ascii_uppercase());
            if let Some(v) = env_parsed::<i64>(&key) {
                self.lanes.set_capacity(lane, usize::try_from(v).ok());
            }
        }
        if let Some(v) = env_parsed("COUGAAR_THREAD_DETECTOR_ENABLED") {
            self.detector.enabled = v;
        }
        if let Some(v) = env_parsed("COUGAAR_THREAD_DETECTOR_PERIOD_MS") {
            self.detector.sample_period_ms = v;
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Thread service config:");
        tracing::info!("  service:      {}", self.service_type.as_str());
        tracing::info!("  root:         {}", self.root_name);
        tracing::info!("  default lane: {}", self.default_lane);
        for lane in Lane::ALL {
            match self.lanes.capacity(lane) {
                Some(cap) => tracing::info!("  {:<13} max={}", lane.as_str(), cap),
                None => tracing::info!("  {:<13} max=unbounded", lane.as_str()),
            }
        }
        tracing::info!("  continuation: {}ms", self.continuation_slice_ms);
        tracing::info!(
            "  detector:     enabled={}, period={}ms",
            self.detector.enabled,
            self.detector.sample_period_ms
        );
    }

    /// Target share for a consumer, 0.05 unless configured.
    pub fn percentage_target(&self, consumer: &str) -> f64 {
        self.percentage_targets.get(consumer).copied().unwrap_or(0.05)
    }
}
