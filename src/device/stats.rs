//! Device timing and the periodic stats reporter

use super::Device;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Startup and first-connect timestamps of a device
#[derive(Debug)]
pub struct DeviceStats {
    startup: Instant,
    started_at: DateTime<Utc>,
    connect_time: OnceCell<DateTime<Utc>>,
}

impl DeviceStats {
    pub fn new() -> Self {
        Self {
            startup: Instant::now(),
            started_at: Utc::now(),
            connect_time: OnceCell::new(),
        }
    }

    /// Wall-clock time the device was constructed
    pub fn startup_time(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time of the first successful connect, if any
    pub fn connect_time(&self) -> Option<DateTime<Utc>> {
        self.connect_time.get().copied()
    }

    /// Record the first successful connect; returns false if already recorded
    pub fn record_connect(&self) -> bool {
        self.connect_time.set(Utc::now()).is_ok()
    }

    /// Whole seconds since construction, monotonic
    pub fn uptime(&self) -> u64 {
        self.startup.elapsed().as_secs()
    }
}

impl Default for DeviceStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish `$stats/uptime` every `interval` while the device is connected.
///
/// The device does not own this task; abort the handle to stop it.
pub fn spawn_stats_reporter(device: Device, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // First tick completes immediately, bootstrap already reported

        loop {
            ticker.tick().await;

            if !device.is_connected() {
                debug!(device = %device.name(), "Stats: skipped, not connected");
                continue;
            }

            match device.publish_stats().await {
                Ok(()) => {
                    metrics().stats_reported();
                    info!(
                        device = %device.name(),
                        uptime_secs = device.stats().uptime(),
                        "Stats: published uptime"
                    );
                }
                Err(e) => {
                    error!(device = %device.name(), error = %e, "Stats: failed to publish uptime");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_time_recorded_once() {
        let stats = DeviceStats::new();
        assert!(stats.connect_time().is_none());

        assert!(stats.record_connect());
        let first = stats.connect_time();
        assert!(first.is_some());

        assert!(!stats.record_connect());
        assert_eq!(stats.connect_time(), first);
    }

    #[test]
    fn test_uptime_starts_at_zero_and_never_decreases() {
        let stats = DeviceStats::new();
        let first = stats.uptime();
        let second = stats.uptime();
        assert_eq!(first, 0);
        assert!(second >= first);
        assert!(stats.startup_time() <= Utc::now());
    }
}
