//! Impure I/O operations for MQTT client
//!
//! This module handles all impure I/O operations including network communication,
//! async coordination, and integration with the rumqttc client.

use super::connection::{configure_mqtt_options, ConnectionState, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler, SubscriptionTable};
use crate::mqtt_span;
use crate::observability::metrics;
use crate::transport::{
    ConnectCompletion, ConnectOptions, ConnectToken, ConnectionObserver, MessageCallback,
    Transport, TransportError,
};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the request channel between `AsyncClient` and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Session changes forwarded to the observer task
#[derive(Debug)]
enum SessionEvent {
    Connected,
    Lost(String),
}

/// rumqttc-backed transport
pub struct MqttClient {
    client: Mutex<Option<AsyncClient>>,
    subscriptions: Arc<SubscriptionTable>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: std::sync::Mutex<Option<watch::Sender<bool>>>,
    closing: Arc<AtomicBool>,
    event_loop_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    reconnect_config: ReconnectConfig,
}

/// Everything the event loop task owns for one session
struct EventLoopContext {
    client_id: String,
    client: AsyncClient,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown_rx: watch::Receiver<bool>,
    subscriptions: Arc<SubscriptionTable>,
    reconnect_config: ReconnectConfig,
    auto_reconnect: bool,
    closing: Arc<AtomicBool>,
    completion: ConnectCompletion,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Default for MqttClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttClient {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        Self {
            client: Mutex::new(None),
            subscriptions: Arc::new(SubscriptionTable::new()),
            state_tx: Arc::new(state_tx),
            state_rx,
            shutdown_tx: std::sync::Mutex::new(None),
            closing: Arc::new(AtomicBool::new(false)),
            event_loop_handle: std::sync::Mutex::new(None),
            reconnect_config: ReconnectConfig::default(),
        }
    }

    /// Override the delays used between reconnection attempts
    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect_config = config;
        self
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn session_running(&self) -> bool {
        self.event_loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn current_client(&self) -> Result<AsyncClient, TransportError> {
        if !HealthMonitor::can_publish(&self.state_rx.borrow()) {
            return Err(TransportError::NotConnected);
        }
        self.client
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn set_state(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
        let previous = state_tx.send_replace(next.clone());
        if previous != next {
            HealthMonitor::log_state_transition(&previous, &next);
        }
    }

    /// Deliver session changes to the observer in order, off the event loop
    fn spawn_observer_task(
        observer: Arc<dyn ConnectionObserver>,
        mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = session_rx.recv().await {
                match event {
                    SessionEvent::Connected => observer.on_connect().await,
                    SessionEvent::Lost(reason) => observer.on_connection_lost(&reason).await,
                }
            }
        });
    }

    async fn run_event_loop(mut event_loop: EventLoop, mut ctx: EventLoopContext) {
        info!("Starting MQTT event loop for client: {}", ctx.client_id);
        let mut reconnect_attempts = 0u32;

        loop {
            let mut shutdown_rx = ctx.shutdown_rx.clone();
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            Self::process_event_route(route, &mut ctx, &mut reconnect_attempts)
                        }
                        Err(e) => {
                            Self::handle_event_loop_error(e, &mut ctx, &mut reconnect_attempts)
                                .await
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        info!("MQTT event loop stopped for client: {}", ctx.client_id);
    }

    /// Returns true to keep polling, false to stop the session
    fn process_event_route(
        route: EventRoute,
        ctx: &mut EventLoopContext,
        reconnect_attempts: &mut u32,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                let resumed = *reconnect_attempts > 0;
                *reconnect_attempts = 0;
                Self::set_state(
                    &ctx.state_tx,
                    HealthMonitor::determine_next_state(ConnectionEvent::ConnAckReceived),
                );
                metrics().mqtt_connection_established();

                if resumed {
                    Self::resubscribe(&ctx.client, &ctx.subscriptions);
                }
                ctx.completion.complete(Ok(()));
                let _ = ctx.session_tx.send(SessionEvent::Connected);
                true
            }
            EventRoute::MessageReceived { topic, payload } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                metrics().mqtt_message_received();
                ctx.subscriptions.dispatch(&topic, &payload);
                true
            }
            EventRoute::DisconnectedByBroker => {
                warn!("Broker sent DISCONNECT for client: {}", ctx.client_id);
                true
            }
            EventRoute::DisconnectSent => {
                debug!(target: "mqtt_transport", "DISCONNECT flushed to broker");
                Self::set_state(
                    &ctx.state_tx,
                    HealthMonitor::determine_next_state(ConnectionEvent::DisconnectRequested),
                );
                false
            }
            EventRoute::SubscriptionConfirmed { packet_id } => {
                debug!(target: "mqtt_transport", "Subscription confirmed: {}", packet_id);
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Returns true to keep polling (rumqttc reconnects on the next poll)
    async fn handle_event_loop_error(
        error: rumqttc::v5::ConnectionError,
        ctx: &mut EventLoopContext,
        reconnect_attempts: &mut u32,
    ) -> bool {
        let reason = error.to_string();

        if ctx.closing.load(Ordering::SeqCst) {
            debug!(target: "mqtt_transport", "Event loop error while closing: {}", reason);
            return false;
        }

        // The first attempt failing is reported through the connect token only
        if !ctx.completion.is_completed() {
            metrics().mqtt_connection_failed();
            Self::set_state(
                &ctx.state_tx,
                HealthMonitor::determine_next_state(ConnectionEvent::NetworkError(reason.clone())),
            );
            ctx.completion.complete(Err(reason));
            return false;
        }

        let previous = ctx.state_tx.borrow().clone();
        let lost =
            HealthMonitor::determine_next_state(ConnectionEvent::NetworkError(reason.clone()));
        if HealthMonitor::is_session_loss(&previous, &lost) {
            error!("MQTT event loop error for client {}: {}", ctx.client_id, reason);
            metrics().mqtt_connection_lost();
            Self::set_state(&ctx.state_tx, lost.clone());
            let _ = ctx.session_tx.send(SessionEvent::Lost(reason.clone()));
        } else {
            debug!(target: "mqtt_transport", "Reconnection attempt failed: {}", reason);
            metrics().mqtt_connection_failed();
        }

        let decision = HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            &ctx.reconnect_config,
            ctx.auto_reconnect,
            *ctx.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                Self::set_state(
                    &ctx.state_tx,
                    HealthMonitor::determine_next_state(ConnectionEvent::ReconnectionStarted(
                        attempt,
                    )),
                );
                metrics().mqtt_connection_attempt();
                info!("Attempting reconnection {} after {}ms delay", attempt, delay_ms);
                Self::interruptible_sleep(ctx.shutdown_rx.clone(), delay_ms).await
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortDisabled => {
                info!("Auto-reconnect disabled, closing session");
                Self::set_state(&ctx.state_tx, lost);
                false
            }
        }
    }

    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Restore broker-side subscriptions after a clean-start reconnect.
    ///
    /// Runs on the event loop task, so it must not wait on the request channel.
    fn resubscribe(client: &AsyncClient, subscriptions: &SubscriptionTable) {
        for (filter, qos) in subscriptions.filters() {
            match client.try_subscribe(filter.as_str(), qos) {
                Ok(()) => debug!(target: "mqtt_transport", "Re-subscribed to: {}", filter),
                Err(e) => error!("Failed to re-subscribe to {}: {}", filter, e),
            }
        }
    }

    fn stop_event_loop(&self) {
        if let Some(shutdown_tx) = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self
            .event_loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    async fn connect(
        &self,
        options: ConnectOptions,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<ConnectToken, TransportError> {
        if self.session_running() {
            return Err(TransportError::AlreadyStarted);
        }

        info!(
            host = %options.host,
            port = options.port,
            tls = options.use_tls,
            "Connecting to MQTT broker"
        );
        metrics().mqtt_connection_attempt();

        let mqtt_options = configure_mqtt_options(&options);
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        *self.client.lock().await = Some(client.clone());

        let (completion, token) = ConnectToken::pending();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        self.closing.store(false, Ordering::SeqCst);
        Self::set_state(&self.state_tx, ConnectionState::Connecting);

        Self::spawn_observer_task(observer, session_rx);

        let ctx = EventLoopContext {
            client_id: options.client_id.clone(),
            client,
            state_tx: self.state_tx.clone(),
            shutdown_rx,
            subscriptions: self.subscriptions.clone(),
            reconnect_config: self.reconnect_config.clone(),
            auto_reconnect: options.auto_reconnect,
            closing: self.closing.clone(),
            completion,
            session_tx,
        };
        let handle = tokio::spawn(Self::run_event_loop(event_loop, ctx));

        *self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(shutdown_tx);
        *self
            .event_loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(token)
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let span = mqtt_span!(operation = "publish", topic = %topic, retain);
        async move {
            let client = self.current_client().await?;

            match client.publish(topic, qos, retain, payload).await {
                Ok(()) => {
                    metrics().mqtt_message_published();
                    debug!(target: "mqtt_transport", "Published message");
                    Ok(())
                }
                Err(e) => {
                    metrics().mqtt_publish_failed();
                    Err(TransportError::PublishFailed {
                        topic: topic.to_string(),
                        source: Box::new(e),
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), TransportError> {
        let span = mqtt_span!(operation = "subscribe", filter = %filter);
        async move {
            let client = self.current_client().await?;

            // Registered first so a retained message arriving right after SUBACK is seen
            self.subscriptions.insert(filter, qos, callback);
            client
                .subscribe(filter, qos)
                .await
                .map_err(|e| TransportError::SubscribeFailed {
                    filter: filter.to_string(),
                    source: Box::new(e),
                })?;

            debug!(target: "mqtt_transport", "Subscribed");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn disconnect(&self, grace: Duration) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);

        let client = self.client.lock().await.take();
        let handle = self
            .event_loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(client) = client else {
            debug!(target: "mqtt_transport", "Disconnect requested without a session");
            return Ok(());
        };

        if let Err(e) = client.disconnect().await {
            // The event loop is already gone; nothing left to flush
            debug!(target: "mqtt_transport", "DISCONNECT not queued: {}", e);
        }

        if let Some(mut handle) = handle {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => info!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event loop task didn't shut down within {:?}, forcing abort", grace);
                    handle.abort();
                }
            }
        }

        if let Some(shutdown_tx) = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = shutdown_tx.send(true);
        }

        Self::set_state(
            &self.state_tx,
            HealthMonitor::determine_next_state(ConnectionEvent::DisconnectRequested),
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        HealthMonitor::can_publish(&self.state_rx.borrow())
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.stop_event_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LastWill;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingObserver {
        connects: AtomicUsize,
        losses: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionObserver for CountingObserver {
        async fn on_connect(&self) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_connection_lost(&self, _reason: &str) {
            self.losses.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn unreachable_options() -> ConnectOptions {
        ConnectOptions {
            // Port 1 on loopback refuses immediately
            host: "127.0.0.1".to_string(),
            port: 1,
            use_tls: false,
            client_id: "sensor1".to_string(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            auto_reconnect: true,
            last_will: LastWill {
                topic: "homie/sensor1/$state".to_string(),
                payload: b"lost".to_vec(),
                qos: QoS::AtLeastOnce,
                retain: true,
            },
        }
    }

    #[tokio::test]
    async fn test_publish_requires_session() {
        let client = MqttClient::new();
        assert!(!client.is_connected());
        assert_eq!(client.connection_state(), ConnectionState::Idle);

        let result = client
            .publish("homie/sensor1/$state", QoS::AtLeastOnce, true, b"ready".to_vec())
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_subscribe_requires_session() {
        let client = MqttClient::new();
        let result = client
            .subscribe("homie/$broadcast/+", QoS::AtLeastOnce, Arc::new(|_: &str, _: &[u8]| {}))
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_noop() {
        let client = MqttClient::new();
        assert!(client.disconnect(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_refused_first_attempt_resolves_token_with_error() {
        let client = MqttClient::new();
        let observer = Arc::new(CountingObserver::default());

        let mut token = client
            .connect(unreachable_options(), observer.clone())
            .await
            .unwrap();

        let outcome = token.wait_timeout(Duration::from_secs(5)).await;
        assert!(matches!(outcome, Some(Err(_))));
        assert!(!client.is_connected());
        assert!(matches!(
            client.connection_state(),
            ConnectionState::Disconnected(_)
        ));

        // A failed first attempt is not a lost session
        assert_eq!(observer.connects.load(Ordering::SeqCst), 0);
        assert_eq!(observer.losses.load(Ordering::SeqCst), 0);
    }
}
