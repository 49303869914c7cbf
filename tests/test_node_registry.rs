//! Node registry, property announcement and `/set` routing

mod test_helpers;

use async_trait::async_trait;
use homie_device::{
    node_publisher, BasicNode, Device, DeviceError, DeviceHandlers, DeviceResult, Node, Property,
    PropertyDataType, WeakDevice,
};
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex};
use test_helpers::{mock_device, relative_topics};

/// Node that records which bootstrap steps reached it
struct RecordingNode {
    name: String,
    device: OnceCell<WeakDevice>,
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingNode {
    fn new(name: &str, events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            device: OnceCell::new(),
            events,
        }
    }

    fn record(&self, step: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{step}:{}", self.name));
    }
}

#[async_trait]
impl Node for RecordingNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> &str {
        "recorder"
    }

    fn attach(&self, device: WeakDevice) {
        let _ = self.device.set(device);
    }

    fn device(&self) -> Option<Device> {
        self.device.get().and_then(WeakDevice::upgrade)
    }

    async fn publish(&self, _device: &Device) -> DeviceResult<()> {
        self.record("publish");
        Ok(())
    }

    async fn subscribe(&self, _device: &Device) -> DeviceResult<()> {
        self.record("subscribe");
        Ok(())
    }

    fn node_publisher(&self) -> Option<homie_device::handlers::NodePublisher> {
        let events = self.events.clone();
        Some(node_publisher(move |node| {
            let events = events.clone();
            async move {
                events
                    .lock()
                    .unwrap()
                    .push(format!("publisher:{}", node.name()));
                Ok(())
            }
        }))
    }
}

#[test]
fn test_duplicate_node_rejected_and_registry_unchanged() {
    let (device, _transport) = mock_device(DeviceHandlers::default());
    let first = device.new_node("temp", "sensor").unwrap();

    let error = device.new_node("temp", "other").unwrap_err();
    assert!(matches!(error, DeviceError::DuplicateNode(_)));
    assert!(error.is_fatal());

    let registered = device.get_node("temp").unwrap();
    assert_eq!(registered.node_type(), "sensor");
    assert_eq!(device.node_names(), vec!["temp"]);
    assert!(first.device().is_some());
}

#[test]
fn test_get_node_absent() {
    let (device, _transport) = mock_device(DeviceHandlers::default());
    assert!(device.get_node("nope").is_none());
}

#[test]
fn test_nodes_announced_sorted_by_name() {
    let (device, _transport) = mock_device(DeviceHandlers::default());
    device.new_node("zeta", "sensor").unwrap();
    device.new_node("alpha", "sensor").unwrap();
    device.new_node("mid", "sensor").unwrap();

    assert_eq!(device.node_names(), vec!["alpha", "mid", "zeta"]);
}

#[tokio::test]
async fn test_nodes_attribute_lists_every_node() {
    let (device, transport) = mock_device(DeviceHandlers::default());
    device.new_node("zeta", "sensor").unwrap();
    device.new_node("alpha", "sensor").unwrap();

    device.connect().await.unwrap();

    assert_eq!(
        transport.payloads_for("home/sensor1/$nodes"),
        vec!["alpha,zeta"]
    );
}

#[tokio::test]
async fn test_node_steps_run_in_bootstrap_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (device, _transport) = mock_device(DeviceHandlers::default());
    device
        .add_node(Arc::new(RecordingNode::new("b", events.clone())))
        .unwrap();
    device
        .add_node(Arc::new(RecordingNode::new("a", events.clone())))
        .unwrap();

    device.connect().await.unwrap();

    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[
            "publish:a",
            "publish:b",
            "subscribe:a",
            "publisher:a",
            "subscribe:b",
            "publisher:b",
        ]
    );
}

#[tokio::test]
async fn test_custom_node_is_attached_on_add() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (device, _transport) = mock_device(DeviceHandlers::default());
    let node = Arc::new(RecordingNode::new("custom", events));
    device.add_node(node.clone()).unwrap();

    assert_eq!(node.device().unwrap().name(), "sensor1");
}

#[tokio::test]
async fn test_properties_announced_with_metadata() {
    let (device, transport) = mock_device(DeviceHandlers::default());
    let node = device.new_node("climate", "sensor").unwrap();
    node.add_property(Property::new("temperature", PropertyDataType::Float).with_unit("°C"))
        .unwrap();
    node.add_property(
        Property::new("target", PropertyDataType::Integer)
            .settable()
            .retained(false),
    )
    .unwrap();
    node.set_value("temperature", "21.5").await.unwrap();

    device.connect().await.unwrap();

    let topics = relative_topics(&transport);
    let start = topics.iter().position(|t| t == "climate/$name").unwrap();
    let expected = [
        "climate/$name",
        "climate/$type",
        "climate/$properties",
        "climate/temperature/$name",
        "climate/temperature/$datatype",
        "climate/temperature/$settable",
        "climate/temperature/$retained",
        "climate/temperature/$unit",
        "climate/temperature",
        "climate/target/$name",
        "climate/target/$datatype",
        "climate/target/$settable",
        "climate/target/$retained",
    ];
    assert_eq!(&topics[start..start + expected.len()], &expected[..]);

    assert_eq!(
        transport.payloads_for("home/sensor1/climate/$properties"),
        vec!["temperature,target"]
    );
    assert_eq!(
        transport.payloads_for("home/sensor1/climate/temperature/$unit"),
        vec!["°C"]
    );
    assert_eq!(
        transport.payloads_for("home/sensor1/climate/target/$settable"),
        vec!["true"]
    );
    assert_eq!(
        transport.payloads_for("home/sensor1/climate/target/$retained"),
        vec!["false"]
    );
    assert_eq!(
        transport.payloads_for("home/sensor1/climate/temperature"),
        vec!["21.5"]
    );
    assert!(transport
        .payloads_for("home/sensor1/climate/target")
        .is_empty());
    assert_eq!(
        transport.subscribed_filters(),
        vec!["home/sensor1/climate/target/set", "home/$broadcast/+"]
    );
}

#[tokio::test]
async fn test_set_message_stores_value_without_handler() {
    let (device, transport) = mock_device(DeviceHandlers::default());
    let node = device.new_node("climate", "sensor").unwrap();
    node.add_property(Property::new("target", PropertyDataType::Integer).settable())
        .unwrap();
    device.connect().await.unwrap();

    let handled = transport.deliver("home/sensor1/climate/target/set", b"22");

    assert_eq!(handled, 1);
    assert_eq!(
        node.get_property("target").unwrap().value().as_deref(),
        Some("22")
    );
}

#[tokio::test]
async fn test_set_message_goes_to_handler() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let (device, transport) = mock_device(DeviceHandlers::default());
    let node = device.new_node("relay", "switch").unwrap();
    node.add_property(
        Property::new("power", PropertyDataType::Boolean)
            .settable()
            .on_set(move |property, value| {
                sink.lock()
                    .unwrap()
                    .push(format!("{}={value}", property.name()));
            }),
    )
    .unwrap();
    device.connect().await.unwrap();

    transport.deliver("home/sensor1/relay/power/set", b"true");

    assert_eq!(received.lock().unwrap().as_slice(), &["power=true"]);
    assert!(node.get_property("power").unwrap().value().is_none());
}

#[tokio::test]
async fn test_set_value_publishes_while_connected() {
    let (device, transport) = mock_device(DeviceHandlers::default());
    let node = device.new_node("climate", "sensor").unwrap();
    node.add_property(Property::new("humidity", PropertyDataType::Float).retained(false))
        .unwrap();
    device.connect().await.unwrap();
    transport.clear_history();

    node.set_value("humidity", "40.2").await.unwrap();

    let published = transport.published_messages();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "home/sensor1/climate/humidity");
    assert_eq!(published[0].payload_str(), "40.2");
    assert!(!published[0].retain);
}

#[tokio::test]
async fn test_set_value_unknown_property_on_attached_node() {
    let (device, transport) = mock_device(DeviceHandlers::default());
    let node = device.new_node("climate", "sensor").unwrap();
    device.connect().await.unwrap();
    transport.clear_history();

    let error = node.set_value("missing", "1").await.unwrap_err();

    assert!(matches!(error, DeviceError::InvalidProperty { .. }));
    assert!(transport.published_messages().is_empty());
}

#[tokio::test]
async fn test_node_added_from_config_is_announced() {
    let (device, transport) = mock_device(DeviceHandlers::default());
    let config = homie_device::NodeConfig {
        name: "door".to_string(),
        node_type: "contact".to_string(),
        properties: vec![homie_device::PropertyConfig {
            name: "open".to_string(),
            datatype: PropertyDataType::Boolean,
            settable: false,
            retained: true,
            unit: None,
            format: None,
        }],
    };
    device
        .add_node(Arc::new(BasicNode::from_config(&config).unwrap()))
        .unwrap();

    device.connect().await.unwrap();

    assert_eq!(
        transport.payloads_for("home/sensor1/door/open/$datatype"),
        vec!["boolean"]
    );
}
