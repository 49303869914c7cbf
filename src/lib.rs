//! Homie device runtime
//!
//! Device-side implementation of the Homie convention over MQTT: a device
//! made of nodes and properties is mapped onto a topic tree, announced on
//! every established session and retracted on disconnect.
//!
//! # Quick Start
//!
//! ```rust
//! use homie_device::testing::MockTransport;
//! use homie_device::{Device, DeviceConfig, DeviceHandlers, Property, PropertyDataType};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = DeviceConfig::new("sensor1", "home/", "mqtt://localhost:1883");
//! let transport = Arc::new(MockTransport::new());
//! let device = Device::new(config, DeviceHandlers::default(), transport.clone())?;
//!
//! let node = device.new_node("temp", "sensor")?;
//! node.add_property(Property::new("temperature", PropertyDataType::Float).with_unit("°C"))?;
//!
//! device.connect().await?;
//! assert_eq!(transport.payloads_for("home/sensor1/$state"), vec!["ready"]);
//!
//! node.set_value("temperature", "21.5").await?;
//! device.disconnect().await?;
//! # Ok::<(), homie_device::DeviceError>(())
//! # });
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod handlers;
pub mod node;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, DeviceConfig, MqttSection, NodeConfig, PropertyConfig};
pub use device::{spawn_stats_reporter, Device, DeviceStats, LinkState, WeakDevice};
pub use error::{DeviceError, DeviceResult, ErrorKind};
pub use handlers::{device_publisher, node_publisher, DeviceHandlers};
pub use node::{BasicNode, Node, Property};
pub use protocol::*;
pub use transport::mqtt::MqttClient;
pub use transport::{Transport, TransportError};
