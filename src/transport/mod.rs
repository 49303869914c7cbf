//! Transport layer for device communication
//!
//! This module provides the publish/subscribe capability the device runtime
//! is written against, plus the rumqttc-backed MQTT implementation.

use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

pub mod mqtt;

/// Handler invoked for every inbound message matching a subscription
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Publishing to {topic} failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Subscribing to {filter} failed")]
    SubscribeFailed {
        filter: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Transport session already started")]
    AlreadyStarted,
}

/// Last will registered with the broker at connect time
#[derive(Debug, Clone, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Transport-neutral session parameters derived by the device
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Encrypt the session; the server certificate is verified against `host`
    pub use_tls: bool,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
    pub auto_reconnect: bool,
    pub last_will: LastWill,
}

/// Callbacks a transport fires from its own execution context whenever
/// the broker session changes state
#[async_trait]
pub trait ConnectionObserver: Send + Sync {
    /// A session was established (initial connect or auto-reconnect)
    async fn on_connect(&self);

    /// An established session dropped
    async fn on_connection_lost(&self, reason: &str);
}

/// Pending result of a connect request.
///
/// Resolves once the first connection attempt either succeeds or fails.
#[derive(Debug)]
pub struct ConnectToken {
    rx: oneshot::Receiver<Result<(), String>>,
}

/// Completion side of a [`ConnectToken`]
#[derive(Debug)]
pub struct ConnectCompletion {
    tx: Option<oneshot::Sender<Result<(), String>>>,
}

impl ConnectToken {
    /// Create a pending token and the handle used to resolve it
    pub fn pending() -> (ConnectCompletion, ConnectToken) {
        let (tx, rx) = oneshot::channel();
        (ConnectCompletion { tx: Some(tx) }, ConnectToken { rx })
    }

    /// Create an already resolved token
    pub fn resolved(result: Result<(), String>) -> ConnectToken {
        let (mut completion, token) = Self::pending();
        completion.complete(result);
        token
    }

    /// Wait at most `timeout` for the outcome.
    ///
    /// Returns `None` while the attempt is still in progress.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<(), String>> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(_)) => Some(Err(
                "transport dropped the connection attempt".to_string()
            )),
            Err(_) => None,
        }
    }
}

impl ConnectCompletion {
    /// Resolve the token; later calls are ignored
    pub fn complete(&mut self, result: Result<(), String>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }

    pub fn is_completed(&self) -> bool {
        self.tx.is_none()
    }
}

/// Publish/subscribe capability consumed by the device runtime
///
/// Implementations own their session lifecycle and report state changes
/// through the [`ConnectionObserver`] handed to [`Transport::connect`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting; the returned token resolves on the first outcome
    async fn connect(
        &self,
        options: ConnectOptions,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<ConnectToken, TransportError>;

    /// Publish a message
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Subscribe to a topic filter; a repeated filter replaces its handler
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), TransportError>;

    /// Close the session, allowing `grace` for in-flight messages
    async fn disconnect(&self, grace: Duration) -> Result<(), TransportError>;

    /// Check if the session is currently established
    fn is_connected(&self) -> bool;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_token_resolves() {
        let (mut completion, mut token) = ConnectToken::pending();
        assert!(!completion.is_completed());

        completion.complete(Ok(()));
        assert!(completion.is_completed());

        let result = token.wait_timeout(Duration::from_millis(50)).await;
        assert_eq!(result, Some(Ok(())));
    }

    #[tokio::test]
    async fn test_connect_token_pending_times_out() {
        let (_completion, mut token) = ConnectToken::pending();
        let result = token.wait_timeout(Duration::from_millis(10)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_connect_token_first_outcome_wins() {
        let (mut completion, mut token) = ConnectToken::pending();
        completion.complete(Err("refused".to_string()));
        completion.complete(Ok(()));

        let result = token.wait_timeout(Duration::from_millis(50)).await;
        assert_eq!(result, Some(Err("refused".to_string())));
    }

    #[tokio::test]
    async fn test_connect_token_dropped_completion_is_failure() {
        let (completion, mut token) = ConnectToken::pending();
        drop(completion);

        let result = token.wait_timeout(Duration::from_millis(50)).await;
        assert!(matches!(result, Some(Err(_))));
    }

    #[tokio::test]
    async fn test_resolved_token() {
        let mut token = ConnectToken::resolved(Ok(()));
        assert_eq!(token.wait_timeout(Duration::from_millis(1)).await, Some(Ok(())));
    }
}
