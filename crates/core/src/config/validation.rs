use crate::error::ThreadError;

use super::{ServiceType, ThreadConfig};

impl ThreadConfig {
    /// Validate the config: lane capacities, detector thresholds and targets.
    pub fn validate(&self) -> Result<(), ThreadError> {
        self.validate_root_name()?;
        self.validate_default_lane()?;
        self.validate_detector()?;
        self.validate_targets()?;
        Ok(())
    }

    fn validate_root_name(&self) -> Result<(), ThreadError> {
        if self.root_name.trim().is_empty() {
            return Err(ThreadError::Config("root_name must not be empty".into()));
        }
        Ok(())
    }

    /// A hierarchical service whose default lane has no capacity can never run anything.
    fn validate_default_lane(&self) -> Result<(), ThreadError> {
        if self.service_type == ServiceType::Hierarchical
            && self.lanes.capacity(self.default_lane) == Some(0)
        {
            return Err(ThreadError::Config(format!(
                "default lane '{}' has zero capacity",
                self.default_lane
            )));
        }
        Ok(())
    }

    fn validate_detector(&self) -> Result<(), ThreadError> {
        let d = &self.detector;
        if d.enabled && d.sample_period_ms == 0 {
            return Err(ThreadError::Config(
                "detector.sample_period_ms must be positive".into(),
            ));
        }
        if d.info_time_secs > d.warn_time_secs {
            return Err(ThreadError::Config(format!(
                "detector.info_time_secs ({}) exceeds warn_time_secs ({})",
                d.info_time_secs, d.warn_time_secs
            )));
        }
        Ok(())
    }

    fn validate_targets(&self) -> Result<(), ThreadError> {
        for (consumer, target) in &self.percentage_targets {
            if !(*target > 0.0 && *target <= 1.0) {
                return Err(ThreadError::Config(format!(
                    "percentage target for '{consumer}' must be in (0, 1], got {target}"
                )));
            }
        }
        Ok(())
    }
}
