//! Test helpers and utilities for integration tests

use homie_device::testing::MockTransport;
use homie_device::{Device, DeviceConfig, DeviceHandlers};
use std::sync::Arc;

/// Configuration of the reference device: `sensor1` under `home/`
#[allow(dead_code)]
pub fn test_config() -> DeviceConfig {
    let mut config = DeviceConfig::new("sensor1", "home/", "mqtt://localhost:1883");
    config.device.local_ip = Some("10.0.0.5".parse().unwrap());
    config
}

/// Device on a fresh mock transport
#[allow(dead_code)]
pub fn mock_device(handlers: DeviceHandlers) -> (Device, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let device = Device::new(test_config(), handlers, transport.clone()).unwrap();
    (device, transport)
}

/// Published topics relative to `home/sensor1/`, in publish order
#[allow(dead_code)]
pub fn relative_topics(transport: &MockTransport) -> Vec<String> {
    transport
        .published_messages()
        .into_iter()
        .map(|m| {
            m.topic
                .strip_prefix("home/sensor1/")
                .unwrap_or(&m.topic)
                .to_string()
        })
        .collect()
}
