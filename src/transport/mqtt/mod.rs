//! MQTT transport built on rumqttc
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - Connection state and option mapping
//! - [`message_handler`] - Event routing and subscription dispatch
//! - [`health_monitor`] - Session loss detection and reconnection decisions
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use homie_device::{Device, DeviceConfig, DeviceHandlers};
//! use homie_device::transport::mqtt::MqttClient;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = DeviceConfig::new("sensor1", "homie/", "mqtt://localhost:1883");
//! let device = Device::new(config, DeviceHandlers::default(), Arc::new(MqttClient::new()))?;
//! device.connect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionState, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler, SubscriptionTable};
