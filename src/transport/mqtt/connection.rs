//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management
//! and mapping transport-neutral options onto rumqttc.

use crate::transport::ConnectOptions;
use rumqttc::v5::mqttbytes::v5::LastWill as MqttLastWill;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use tracing::debug;

/// rumqttc rejects keep-alive intervals shorter than this
pub const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No session has been requested yet
    Idle,
    /// First connection attempt in progress
    Connecting,
    /// Session established and ready for operations
    Connected,
    /// Session closed, with reason
    Disconnected(String),
    /// Auto-reconnect in progress (attempt count)
    Reconnecting(u32),
}

/// Reconnection backoff configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Backoff pattern in milliseconds, indexed by attempt
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Map transport-neutral options onto rumqttc options
pub fn configure_mqtt_options(options: &ConnectOptions) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(&options.client_id, &options.host, options.port);

    // rumqttc verifies the server certificate against the broker host
    if options.use_tls {
        debug!(server_name = %options.host, "Enabling TLS for broker session");
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some((username, password)) = &options.credentials {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(options.keep_alive.max(MIN_KEEP_ALIVE));
    mqtt_options.set_clean_start(true);

    let will = &options.last_will;
    mqtt_options.set_last_will(MqttLastWill::new(
        &will.topic,
        will.payload.clone(),
        will.qos,
        will.retain,
        None,
    ));

    mqtt_options
}
