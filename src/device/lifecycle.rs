//! Connection lifecycle of a device
//!
//! Derives transport options from the configuration, starts the session and
//! waits for the first outcome. Session changes reported later by the
//! transport arrive through [`DeviceObserver`].

use super::{Device, WeakDevice};
use crate::config::DeviceConfig;
use crate::device_span;
use crate::error::{DeviceError, DeviceResult};
use crate::observability::metrics;
use crate::protocol::{device_topic, DeviceState, STATE_ATTRIBUTE};
use crate::transport::{ConnectOptions, ConnectionObserver, LastWill, TransportError};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};
use url::Url;

/// Slice the connect call waits on the transport before checking again
pub const CONNECT_WAIT_SLICE: Duration = Duration::from_secs(3);

const TLS_SCHEMES: [&str; 3] = ["mqtts", "ssl", "tls"];
const PLAIN_SCHEMES: [&str; 2] = ["mqtt", "tcp"];
const DEFAULT_TLS_PORT: u16 = 8883;
const DEFAULT_PLAIN_PORT: u16 = 1883;

/// Link to the broker as seen by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Never connected
    Idle,
    /// Handshake in progress, or the transport is re-establishing the session
    Connecting,
    /// Session established and bootstrapped
    Connected,
    /// Closed by `disconnect` or after a failed first attempt
    Disconnected,
    /// The transport announced a session while reporting no connection;
    /// bootstrap was refused
    Faulted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Idle => "idle",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Build the transport options for a device (pure function)
pub fn connect_options(config: &DeviceConfig) -> DeviceResult<ConnectOptions> {
    let broker_url = &config.mqtt.broker_url;
    let url = Url::parse(broker_url)
        .map_err(|e| DeviceError::InvalidBrokerUrl(format!("{broker_url}: {e}")))?;

    let scheme = url.scheme();
    let use_tls = TLS_SCHEMES.contains(&scheme);
    if !use_tls && !PLAIN_SCHEMES.contains(&scheme) {
        return Err(DeviceError::InvalidBrokerUrl(format!(
            "{broker_url}: unsupported scheme '{scheme}'"
        )));
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| DeviceError::InvalidBrokerUrl(format!("{broker_url}: missing host")))?
        .to_string();
    let port = url.port().unwrap_or(if use_tls {
        DEFAULT_TLS_PORT
    } else {
        DEFAULT_PLAIN_PORT
    });

    let section = &config.device;
    Ok(ConnectOptions {
        host,
        port,
        use_tls,
        client_id: section.name.clone(),
        credentials: config.mqtt.credentials(),
        keep_alive: Duration::from_secs(config.mqtt.keep_alive_secs),
        auto_reconnect: config.mqtt.auto_reconnect,
        last_will: LastWill {
            topic: device_topic(&section.base_topic, &section.name, STATE_ATTRIBUTE),
            payload: DeviceState::Lost.as_str().as_bytes().to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
        },
    })
}

impl Device {
    /// Connect to the broker and wait for the first outcome.
    ///
    /// Bootstrap runs from the transport's context; returning `Ok` does not
    /// imply it has finished. A device with a live or pending session
    /// rejects the call with [`TransportError::AlreadyStarted`].
    pub async fn connect(&self) -> DeviceResult<()> {
        let span = device_span!(step = "connect", device = %self.name());
        async move {
            let current = self.state();
            if matches!(current, LinkState::Connecting | LinkState::Connected) {
                warn!(device = %self.name(), state = %current, "Session already active, ignoring connect");
                return Err(TransportError::AlreadyStarted.into());
            }

            let options = connect_options(self.config())?;
            info!(
                device = %self.name(),
                host = %options.host,
                port = options.port,
                tls = options.use_tls,
                "Connecting device"
            );
            self.set_link(LinkState::Connecting);

            let observer = Arc::new(DeviceObserver {
                device: self.downgrade(),
            });
            let mut token = match self.inner.transport.connect(options, observer).await {
                Ok(token) => token,
                Err(TransportError::AlreadyStarted) => {
                    return Err(TransportError::AlreadyStarted.into());
                }
                Err(e) => {
                    self.set_link(LinkState::Disconnected);
                    return Err(e.into());
                }
            };

            loop {
                match token.wait_timeout(CONNECT_WAIT_SLICE).await {
                    Some(Ok(())) if self.state() == LinkState::Faulted => {
                        return Err(DeviceError::BootstrapWhileDisconnected);
                    }
                    Some(Ok(())) => {
                        info!(device = %self.name(), "Connected to broker");
                        return Ok(());
                    }
                    Some(Err(reason)) => {
                        error!(device = %self.name(), reason = %reason, "Connection failed");
                        if self.state() == LinkState::Connecting {
                            self.set_link(LinkState::Disconnected);
                        }
                        return Err(DeviceError::connect_failed(reason));
                    }
                    None => {
                        debug!(device = %self.name(), "Still waiting for broker handshake");
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Internal on-connect: mark connected, bootstrap, then the user hook.
    ///
    /// A session the transport does not back moves the device to
    /// [`LinkState::Faulted`] and skips everything else.
    pub(crate) async fn handle_connect(&self) {
        if !self.is_connected() {
            self.refuse_bootstrap();
            return;
        }

        self.set_link(LinkState::Connected);
        if self.inner.stats.record_connect() {
            debug!(device = %self.name(), "Recorded first connect time");
        }

        match self.bootstrap().await {
            Ok(()) => metrics().bootstrap_completed(),
            Err(DeviceError::BootstrapWhileDisconnected) => {
                self.refuse_bootstrap();
                return;
            }
            Err(e) => {
                metrics().bootstrap_failed();
                error!(device = %self.name(), error = %e, "Bootstrap failed");
            }
        }

        if let Some(handler) = &self.inner.handlers.on_connect {
            handler(self);
        }
    }

    fn refuse_bootstrap(&self) {
        metrics().bootstrap_failed();
        error!(
            device = %self.name(),
            error = %DeviceError::BootstrapWhileDisconnected,
            "Transport announced a session it does not hold"
        );
        self.set_link(LinkState::Faulted);
    }

    /// User hook first, then the internal hook
    pub(crate) fn handle_connection_lost(&self, reason: &str) {
        if let Some(handler) = &self.inner.handlers.on_connection_lost {
            handler(self, reason);
        }
        self.on_connection_lost_internal(reason);
    }

    fn on_connection_lost_internal(&self, reason: &str) {
        warn!(device = %self.name(), reason = %reason, "Connection lost");
        metrics().set_device_state(DeviceState::Lost.as_str());
        let next = if self.config().mqtt.auto_reconnect {
            LinkState::Connecting
        } else {
            LinkState::Disconnected
        };
        self.set_link(next);
    }
}

/// Bridges transport session events to the device without keeping it alive
pub struct DeviceObserver {
    device: WeakDevice,
}

#[async_trait]
impl ConnectionObserver for DeviceObserver {
    async fn on_connect(&self) {
        if let Some(device) = self.device.upgrade() {
            device.handle_connect().await;
        }
    }

    async fn on_connection_lost(&self, reason: &str) {
        if let Some(device) = self.device.upgrade() {
            device.handle_connection_lost(reason);
        }
    }
}
