//! Thread-safe metrics collection
//!
//! Atomic counters for the MQTT session and the device lifecycle, readable
//! as a serializable snapshot.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics
pub struct MetricsCollector {
    // MQTT session
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    messages_received: AtomicU64,
    connection_start_time: AtomicU64,

    // Device lifecycle
    device_state: Mutex<String>,
    bootstraps_completed: AtomicU64,
    bootstrap_failures: AtomicU64,
    broadcasts_received: AtomicU64,
    stats_reports: AtomicU64,
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            device_state: Mutex::new("init".to_string()),
            bootstraps_completed: AtomicU64::new(0),
            bootstrap_failures: AtomicU64::new(0),
            broadcasts_received: AtomicU64::new(0),
            stats_reports: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    // Device metrics
    pub fn set_device_state(&self, state: &str) {
        let mut current = self
            .device_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = state.to_string();
    }

    pub fn bootstrap_completed(&self) {
        self.bootstraps_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bootstrap_failed(&self) {
        self.bootstrap_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_received(&self) {
        self.broadcasts_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats_reported(&self) {
        self.stats_reports.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_duration(&self, now: u64) -> u64 {
        if !self.mqtt_connected.load(Ordering::Relaxed) {
            return 0;
        }
        let start = self.connection_start_time.load(Ordering::Relaxed);
        if start == 0 {
            0
        } else {
            now.saturating_sub(start)
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();

        MetricsSnapshot {
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                connection_duration_seconds: self.connection_duration(now),
            },
            device: DeviceMetrics {
                current_state: self
                    .device_state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
                bootstraps_completed: self.bootstraps_completed.load(Ordering::Relaxed),
                bootstrap_failures: self.bootstrap_failures.load(Ordering::Relaxed),
                broadcasts_received: self.broadcasts_received.load(Ordering::Relaxed),
                stats_reports: self.stats_reports.load(Ordering::Relaxed),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub mqtt: MqttMetrics,
    pub device: DeviceMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct DeviceMetrics {
    pub current_state: String,
    pub bootstraps_completed: u64,
    pub bootstrap_failures: u64,
    pub broadcasts_received: u64,
    pub stats_reports: u64,
    pub uptime_seconds: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // A fresh collector per test, the global one is shared across tests

    #[test]
    fn test_connection_lifecycle_counters() {
        let collector = MetricsCollector::new();
        collector.mqtt_connection_attempt();
        collector.mqtt_connection_established();

        let snapshot = collector.get_metrics();
        assert!(snapshot.mqtt.connected);
        assert_eq!(snapshot.mqtt.connection_attempts, 1);
        assert_eq!(snapshot.mqtt.connections_established, 1);

        collector.mqtt_connection_lost();
        let snapshot = collector.get_metrics();
        assert!(!snapshot.mqtt.connected);
        assert_eq!(snapshot.mqtt.connections_lost, 1);
        assert_eq!(snapshot.mqtt.connection_duration_seconds, 0);
    }

    #[test]
    fn test_publish_counters() {
        let collector = MetricsCollector::new();
        collector.mqtt_message_published();
        collector.mqtt_message_published();
        collector.mqtt_publish_failed();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.mqtt.messages_published, 2);
        assert_eq!(snapshot.mqtt.publish_failures, 1);
    }

    #[test]
    fn test_device_counters_and_state() {
        let collector = MetricsCollector::new();
        collector.set_device_state("ready");
        collector.bootstrap_completed();
        collector.broadcast_received();
        collector.stats_reported();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.device.current_state, "ready");
        assert_eq!(snapshot.device.bootstraps_completed, 1);
        assert_eq!(snapshot.device.broadcasts_received, 1);
        assert_eq!(snapshot.device.stats_reports, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(MetricsCollector::new().get_metrics()).unwrap();
        assert_eq!(json["mqtt"]["connected"], false);
        assert_eq!(json["device"]["current_state"], "init");
    }
}
