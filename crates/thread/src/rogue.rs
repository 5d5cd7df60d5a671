//! Diagnostic sampler that logs units running far longer than they should.
//!
//! Runs on a plain OS thread rather than through the thread service, so a
//! saturated service cannot starve it. It only logs; nothing is interrupted.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cougaar_core::{DetectorConfig, ThreadError};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::runtime::{RuntimeInner, ThreadRuntime};
use crate::status::{StatusEntry, StatusKind};
use crate::sync::{lock, wait_timeout};

/// Multiples of twice the sample period at which a long run is reported.
const LIMIT_FACTORS: [u32; 7] = [1, 3, 10, 30, 100, 300, 1000];

/// What one sampling pass saw.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleReport {
    pub running: usize,
    pub queued: usize,
    /// Running units whose elapsed time fell into a reporting window.
    pub reported: Vec<StatusEntry>,
    /// All workers busy or work waiting.
    pub saturated: bool,
}

#[derive(Debug, Clone)]
pub struct RogueThreadDetector {
    period: Duration,
    warn_time: Duration,
    info_time: Duration,
    limits: Vec<Duration>,
}

impl RogueThreadDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        let period = Duration::from_millis(config.sample_period_ms);
        Self {
            period,
            warn_time: Duration::from_secs(config.warn_time_secs),
            info_time: Duration::from_secs(config.info_time_secs),
            limits: LIMIT_FACTORS.iter().map(|&k| period * 2 * k).collect(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn limits(&self) -> &[Duration] {
        &self.limits
    }

    /// True once per threshold: when `elapsed` lies in `[limit, limit + period)`.
    pub fn time_to_log(&self, elapsed: Duration) -> bool {
        self.limits
            .iter()
            .any(|&limit| elapsed >= limit && elapsed < limit + self.period)
    }

    /// Take one sample of `runtime` and log what deserves it.
    pub fn sample(&self, runtime: &ThreadRuntime) -> SampleReport {
        let mut report = SampleReport::default();
        runtime.iterate_over_status(&mut |entry| match entry.kind {
            StatusKind::Queued => report.queued += 1,
            StatusKind::Running => {
                report.running += 1;
                if self.time_to_log(entry.elapsed()) {
                    report.reported.push(entry.clone());
                }
            }
        });

        for entry in &report.reported {
            let elapsed = entry.elapsed();
            if elapsed >= self.warn_time {
                warn!(
                    scheduler = %entry.scheduler,
                    schedulable = %entry.schedulable,
                    consumer = %entry.consumer,
                    lane = %entry.lane,
                    blocking = %entry.blocking,
                    "schedulable has been running for {elapsed:?}"
                );
            } else if elapsed >= self.info_time {
                info!(
                    scheduler = %entry.scheduler,
                    schedulable = %entry.schedulable,
                    consumer = %entry.consumer,
                    lane = %entry.lane,
                    blocking = %entry.blocking,
                    "schedulable has been running for {elapsed:?}"
                );
            }
        }

        let at_limit = runtime
            .root_max_running()
            .is_some_and(|max| report.running >= max);
        report.saturated = at_limit || report.queued > 0;
        if report.saturated {
            warn!(
                running = report.running,
                queued = report.queued,
                "thread service is using all the pooled threads"
            );
        }
        report
    }

    /// Sample `runtime` every period on a dedicated thread until stopped or
    /// the runtime goes away.
    pub(crate) fn spawn(self, runtime: Weak<RuntimeInner>) -> Result<DetectorHandle, ThreadError> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);
        let period = self.period;
        let handle = std::thread::Builder::new()
            .name("RogueThreadDetector".into())
            .spawn(move || {
                let (stopped, wakeup) = &*signal;
                loop {
                    let deadline = Instant::now() + self.period;
                    let mut guard = lock(stopped);
                    while !*guard {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        guard = wait_timeout(wakeup, guard, deadline - now);
                    }
                    if *guard {
                        break;
                    }
                    drop(guard);
                    let Some(inner) = runtime.upgrade() else {
                        break;
                    };
                    self.sample(&ThreadRuntime::from_inner(inner));
                }
                debug!("rogue thread detector exiting");
            })?;
        info!(?period, "rogue thread detector started");
        Ok(DetectorHandle {
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }
}

/// Owner of a running detector thread.
pub(crate) struct DetectorHandle {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DetectorHandle {
    pub(crate) fn stop(&self) {
        let (stopped, wakeup) = &*self.stop;
        *lock(stopped) = true;
        wakeup.notify_all();
        if let Some(handle) = lock(&self.handle).take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("rogue thread detector panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(period_ms: u64) -> RogueThreadDetector {
        RogueThreadDetector::new(&DetectorConfig {
            enabled: true,
            sample_period_ms: period_ms,
            warn_time_secs: 100,
            info_time_secs: 10,
        })
    }

    #[test]
    fn limits_scale_with_the_period() {
        let d = detector(5000);
        let secs: Vec<u64> = d.limits().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, [10, 30, 100, 300, 1000, 3000, 10000]);
    }

    #[test]
    fn each_threshold_is_reported_once() {
        let d = detector(5000);
        assert!(!d.time_to_log(Duration::from_secs(9)));
        assert!(d.time_to_log(Duration::from_secs(10)));
        assert!(d.time_to_log(Duration::from_millis(14_999)));
        assert!(!d.time_to_log(Duration::from_secs(15)));
        assert!(!d.time_to_log(Duration::from_secs(29)));
        assert!(d.time_to_log(Duration::from_secs(31)));
    }
}
