//! Configuration file loading

use homie_device::testing::MockTransport;
use homie_device::{BasicNode, ConfigError, Device, DeviceConfig, DeviceError, DeviceHandlers};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_minimal_file_uses_defaults() {
    let file = write_config(
        r#"
[device]
name = "sensor1"

[mqtt]
broker_url = "mqtt://localhost"
"#,
    );

    let config = DeviceConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.device.base_topic, "homie/");
    assert_eq!(config.device.stats_interval_secs, 60);
    assert!(config.mqtt.auto_reconnect);
    assert!(config.nodes.is_empty());
}

#[test]
fn test_invalid_device_name_rejected() {
    let file = write_config(
        r#"
[device]
name = "Sensor_1"

[mqtt]
broker_url = "mqtt://localhost"
"#,
    );

    let error = DeviceConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(error, ConfigError::InvalidDeviceName(_)));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let error = DeviceConfig::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(error, ConfigError::FileRead(_)));
}

#[test]
fn test_malformed_toml() {
    let file = write_config("[device\nname = ");
    let error = DeviceConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(error, ConfigError::TomlParse(_)));
}

#[test]
fn test_device_rejects_invalid_base_topic() {
    let config = DeviceConfig::new("sensor1", "home", "mqtt://localhost");
    let error = Device::new(
        config,
        DeviceHandlers::default(),
        Arc::new(MockTransport::new()),
    )
    .unwrap_err();

    assert!(matches!(
        error,
        DeviceError::Config(ConfigError::InvalidBaseTopic(_))
    ));
    assert!(error.is_fatal());
}

#[tokio::test]
async fn test_configured_nodes_are_announced() {
    let file = write_config(
        r#"
[device]
name = "porch"
base_topic = "house/"
stats_interval_secs = 15
local_ip = "192.168.1.20"

[mqtt]
broker_url = "mqtt://broker.local:1884"
username = "device"
password = "secret"

[[nodes]]
name = "light"
type = "switch"

[[nodes.properties]]
name = "on"
datatype = "boolean"
settable = true
"#,
    );
    let config = DeviceConfig::load_from_file(file.path()).unwrap();
    let transport = Arc::new(MockTransport::new());
    let device = Device::new(config.clone(), DeviceHandlers::default(), transport.clone()).unwrap();
    for node in &config.nodes {
        device
            .add_node(Arc::new(BasicNode::from_config(node).unwrap()))
            .unwrap();
    }

    device.connect().await.unwrap();

    let options = transport.last_options().unwrap();
    assert_eq!(options.port, 1884);
    assert_eq!(
        options.credentials,
        Some(("device".to_string(), "secret".to_string()))
    );
    assert_eq!(transport.payloads_for("house/porch/$localip"), vec!["192.168.1.20"]);
    assert_eq!(transport.payloads_for("house/porch/$stats/interval"), vec!["15"]);
    assert_eq!(transport.payloads_for("house/porch/light/$properties"), vec!["on"]);
    assert_eq!(
        transport.subscribed_filters(),
        vec!["house/porch/light/on/set", "house/$broadcast/+"]
    );
}
