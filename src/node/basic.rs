//! Node made of typed properties

use super::{Node, Property};
use crate::config::NodeConfig;
use crate::device::{Device, WeakDevice};
use crate::error::{DeviceError, DeviceResult};
use crate::handlers::NodePublisher;
use crate::protocol::{NAME_ATTRIBUTE, PROPERTIES_ATTRIBUTE, SET_SUFFIX, TYPE_ATTRIBUTE};
use crate::transport::MessageCallback;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

pub struct BasicNode {
    name: String,
    node_type: String,
    device: OnceCell<WeakDevice>,
    properties: RwLock<Vec<Arc<Property>>>,
    publisher: Mutex<Option<NodePublisher>>,
}

impl BasicNode {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, node_type: T) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            device: OnceCell::new(),
            properties: RwLock::new(Vec::new()),
            publisher: Mutex::new(None),
        }
    }

    /// Build a node and its properties from the configuration file
    pub fn from_config(config: &NodeConfig) -> DeviceResult<Self> {
        let node = Self::new(config.name.clone(), config.node_type.clone());
        for property in &config.properties {
            node.add_property(Property::from_config(property))?;
        }
        Ok(node)
    }

    /// Append a property; names are unique within the node
    pub fn add_property(&self, property: Property) -> DeviceResult<Arc<Property>> {
        let mut properties = self
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if properties.iter().any(|p| p.name() == property.name()) {
            return Err(DeviceError::DuplicateProperty {
                node: self.name.clone(),
                property: property.name().to_string(),
            });
        }

        let property = Arc::new(property);
        properties.push(property.clone());
        Ok(property)
    }

    pub fn get_property(&self, name: &str) -> Option<Arc<Property>> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// Property names in insertion order
    pub fn property_names(&self) -> Vec<String> {
        self.properties()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    fn properties(&self) -> Vec<Arc<Property>> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_node_publisher(&self, publisher: NodePublisher) {
        *self
            .publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(publisher);
    }

    /// Store a property value and publish it while the device is connected.
    ///
    /// Disconnected values are announced by the next bootstrap.
    pub async fn set_value(&self, property: &str, value: &str) -> DeviceResult<()> {
        let target = self
            .get_property(property)
            .ok_or_else(|| DeviceError::InvalidProperty {
                node: self.name.clone(),
                property: property.to_string(),
            })?;
        target.store(value);

        let Some(device) = self.device() else {
            return Ok(());
        };
        if !device.is_connected() {
            debug!(node = %self.name, property = %property, "Value stored while disconnected");
            return Ok(());
        }

        device
            .publish(
                &format!("{}/{}", self.name, property),
                value,
                target.is_retained(),
            )
            .await
    }
}

#[async_trait]
impl Node for BasicNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn attach(&self, device: WeakDevice) {
        if self.device.set(device).is_err() {
            debug!(node = %self.name, "Node already attached, keeping first device");
        }
    }

    fn device(&self) -> Option<Device> {
        self.device.get().and_then(WeakDevice::upgrade)
    }

    async fn publish(&self, device: &Device) -> DeviceResult<()> {
        let properties = self.properties();
        let names: Vec<&str> = properties.iter().map(|p| p.name()).collect();

        let attributes = [
            (NAME_ATTRIBUTE, self.name.clone()),
            (TYPE_ATTRIBUTE, self.node_type.clone()),
            (PROPERTIES_ATTRIBUTE, names.join(",")),
        ];
        for (attribute, value) in attributes {
            device
                .send_message(&format!("{}/{attribute}", self.name), value)
                .await?;
        }

        for property in &properties {
            property.publish(device, &self.name).await?;
        }
        Ok(())
    }

    async fn subscribe(&self, device: &Device) -> DeviceResult<()> {
        for property in self.properties().into_iter().filter(|p| p.is_settable()) {
            let part = format!("{}/{}/{SET_SUFFIX}", self.name, property.name());
            let target = property.clone();
            let callback: MessageCallback = Arc::new(move |_topic: &str, payload: &[u8]| {
                target.handle_set(payload);
            });
            device.subscribe(&part, callback).await?;
        }
        Ok(())
    }

    fn node_publisher(&self) -> Option<NodePublisher> {
        self.publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for BasicNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicNode")
            .field("name", &self.name)
            .field("node_type", &self.node_type)
            .field("properties", &self.property_names())
            .finish()
    }
}
