//! Mock implementations for testing
//!
//! [`MockTransport`] records every publish and subscription and drives the
//! device's session callbacks synchronously, so tests can assert on exact
//! publish order without a broker.

use crate::transport::mqtt::SubscriptionTable;
use crate::transport::{
    ConnectOptions, ConnectToken, ConnectionObserver, MessageCallback, Transport, TransportError,
};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A message captured by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Mock transport for testing
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    should_fail: bool,
    unbacked_session: bool,
    fail_publish: AtomicBool,
    connect_calls: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
    subscribed: Mutex<Vec<String>>,
    subscriptions: SubscriptionTable,
    observer: Mutex<Option<Arc<dyn ConnectionObserver>>>,
    last_options: Mutex<Option<ConnectOptions>>,
    disconnect_grace: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect attempt resolves with an error
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Connect reports success and fires `on_connect`, but `is_connected`
    /// stays false
    pub fn with_unbacked_session() -> Self {
        Self {
            unbacked_session: true,
            ..Default::default()
        }
    }

    /// Make subsequent publishes fail
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Payloads published on one topic, oldest first
    pub fn payloads_for(&self, topic: &str) -> Vec<String> {
        self.published_messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload_str())
            .collect()
    }

    /// Filters passed to `subscribe`, in call order
    pub fn subscribed_filters(&self) -> Vec<String> {
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.last_options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn disconnect_grace(&self) -> Option<Duration> {
        *self
            .disconnect_grace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear_history(&self) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn observer(&self) -> Option<Arc<dyn ConnectionObserver>> {
        self.observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the session and notify the observer
    pub async fn simulate_connection_lost(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(observer) = self.observer() {
            observer.on_connection_lost(reason).await;
        }
    }

    /// Re-establish the session and notify the observer
    pub async fn simulate_reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        if let Some(observer) = self.observer() {
            observer.on_connect().await;
        }
    }

    /// Fire `on_connect` without touching the connected flag
    pub async fn replay_on_connect(&self) {
        if let Some(observer) = self.observer() {
            observer.on_connect().await;
        }
    }

    /// Deliver an inbound message; returns how many handlers ran
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        self.subscriptions.dispatch(topic, payload)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        options: ConnectOptions,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<ConnectToken, TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_options
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(options);

        if self.should_fail {
            return Ok(ConnectToken::resolved(Err(
                "Mock connection failure".to_string()
            )));
        }

        *self.observer.lock().unwrap_or_else(PoisonError::into_inner) = Some(observer.clone());
        self.connected
            .store(!self.unbacked_session, Ordering::SeqCst);
        observer.on_connect().await;
        Ok(ConnectToken::resolved(Ok(())))
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                source: "Mock publish failure".into(),
            });
        }

        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PublishedMessage {
                topic: topic.to_string(),
                qos,
                retain,
                payload,
            });
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.subscriptions.insert(filter, qos, callback);
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(filter.to_string());
        Ok(())
    }

    async fn disconnect(&self, grace: Duration) -> Result<(), TransportError> {
        *self
            .disconnect_grace
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(grace);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
