//! Pure session monitoring and reconnection logic for MQTT client
//!
//! This module contains pure functions for reconnection decision making
//! and connection state tracking.

use super::connection::{ConnectionState, ReconnectConfig};
use tracing::{error, info, warn};

/// Pure session monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide what to do after the event loop reported an error (pure function)
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        auto_reconnect: bool,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }
        if !auto_reconnect {
            return ReconnectionDecision::AbortDisabled;
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::NetworkError(reason) => ConnectionState::Disconnected(reason),
            ConnectionEvent::ReconnectionStarted(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::DisconnectRequested => {
                ConnectionState::Disconnected("Client disconnected".to_string())
            }
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// True when an established session just dropped (pure function)
    pub fn is_session_loss(from: &ConnectionState, to: &ConnectionState) -> bool {
        matches!(from, ConnectionState::Connected)
            && matches!(to, ConnectionState::Disconnected(_))
    }

    /// Log connection state transition
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                warn!("MQTT connection lost: {}", reason);
            }
            (ConnectionState::Connecting, ConnectionState::Disconnected(reason)) => {
                error!("MQTT connection attempt failed: {}", reason);
            }
            (ConnectionState::Reconnecting(_), ConnectionState::Connected) => {
                info!("MQTT reconnection successful");
            }
            _ => {
                info!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}

/// Decision result after a session error
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Poll again after the delay; rumqttc reconnects on the next poll
    Proceed { attempt: u32, delay_ms: u64 },
    /// Stop - disconnect was requested
    AbortShutdownRequested,
    /// Stop - auto-reconnect is disabled
    AbortDisabled,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// ConnAck received from broker
    ConnAckReceived,
    /// Network or protocol error
    NetworkError(String),
    /// Reconnection attempt started
    ReconnectionStarted(u32),
    /// Client asked to close the session
    DisconnectRequested,
}
