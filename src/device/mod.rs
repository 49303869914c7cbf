//! The Homie device: node registry, topic space and session entry points
//!
//! A [`Device`] is a cheap, cloneable handle. Transport callbacks hold a
//! [`WeakDevice`] so a dropped device also stops reacting to its session.

pub mod bootstrap;
pub mod lifecycle;
pub mod stats;

pub use lifecycle::{connect_options, DeviceObserver, LinkState, CONNECT_WAIT_SLICE};
pub use stats::{spawn_stats_reporter, DeviceStats};

use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::handlers::{DeviceHandlers, DevicePublisher};
use crate::node::{BasicNode, Node};
use crate::observability::metrics;
use crate::protocol::{device_topic, DeviceState, STATE_ATTRIBUTE, STATS_UPTIME_ATTRIBUTE};
use crate::transport::{MessageCallback, Transport};
use rumqttc::v5::mqttbytes::QoS;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Time granted to the transport to flush in-flight messages on disconnect
pub const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Handle to a Homie device
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

/// Non-owning handle, see [`Device::downgrade`]
#[derive(Clone, Default)]
pub struct WeakDevice {
    inner: Weak<DeviceInner>,
}

struct DeviceInner {
    config: DeviceConfig,
    handlers: DeviceHandlers,
    nodes: RwLock<BTreeMap<String, Arc<dyn Node>>>,
    stats: DeviceStats,
    publisher: Mutex<Option<DevicePublisher>>,
    link: watch::Sender<LinkState>,
    transport: Arc<dyn Transport>,
}

impl WeakDevice {
    pub fn upgrade(&self) -> Option<Device> {
        self.inner.upgrade().map(|inner| Device { inner })
    }
}

impl Device {
    /// Create a device after validating its configuration
    pub fn new(
        config: DeviceConfig,
        handlers: DeviceHandlers,
        transport: Arc<dyn Transport>,
    ) -> DeviceResult<Self> {
        config.validate()?;

        let (link, _) = watch::channel(LinkState::Idle);
        info!(
            device = %config.device.name,
            base_topic = %config.device.base_topic,
            "Device created"
        );

        Ok(Self {
            inner: Arc::new(DeviceInner {
                config,
                handlers,
                nodes: RwLock::new(BTreeMap::new()),
                stats: DeviceStats::new(),
                publisher: Mutex::new(None),
                link,
                transport,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.device.name
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.inner.stats
    }

    pub fn downgrade(&self) -> WeakDevice {
        WeakDevice {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        *self.inner.link.borrow()
    }

    /// Watch link state changes
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.inner.link.subscribe()
    }

    /// True while the transport reports an established session
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    pub(crate) fn set_link(&self, next: LinkState) {
        let previous = self.inner.link.send_replace(next);
        if previous != next {
            info!(device = %self.name(), from = %previous, to = %next, "Link state changed");
        }
    }

    /// Fully qualified topic for a path below this device
    pub fn topic(&self, part: &str) -> String {
        device_topic(&self.inner.config.device.base_topic, self.name(), part)
    }

    /// Create a [`BasicNode`] and register it
    pub fn new_node(&self, name: &str, node_type: &str) -> DeviceResult<Arc<BasicNode>> {
        let node = Arc::new(BasicNode::new(name, node_type));
        self.add_node(node.clone())?;
        Ok(node)
    }

    /// Register a node; a second node under the same name is rejected
    pub fn add_node(&self, node: Arc<dyn Node>) -> DeviceResult<()> {
        let name = node.name().to_string();
        let mut nodes = self
            .inner
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if nodes.contains_key(&name) {
            return Err(DeviceError::DuplicateNode(name));
        }

        node.attach(self.downgrade());
        nodes.insert(name.clone(), node);
        debug!(device = %self.name(), node = %name, "Node added");
        Ok(())
    }

    pub fn get_node(&self, name: &str) -> Option<Arc<dyn Node>> {
        self.inner
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered node names, sorted
    pub fn node_names(&self) -> Vec<String> {
        self.inner
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of the registered nodes in name order
    pub fn nodes(&self) -> Vec<Arc<dyn Node>> {
        self.inner
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Retained, at-least-once publish below the device topic
    pub async fn send_message<V: Into<Vec<u8>>>(&self, part: &str, value: V) -> DeviceResult<()> {
        self.publish(part, value, true).await
    }

    /// At-least-once publish below the device topic
    pub async fn publish<V: Into<Vec<u8>>>(
        &self,
        part: &str,
        value: V,
        retain: bool,
    ) -> DeviceResult<()> {
        let topic = self.topic(part);
        self.inner
            .transport
            .publish(&topic, QoS::AtLeastOnce, retain, value.into())
            .await?;
        debug!(topic = %topic, retain, "Published");
        Ok(())
    }

    /// Subscribe to a path below the device topic
    pub async fn subscribe(&self, part: &str, handler: MessageCallback) -> DeviceResult<()> {
        let topic = self.topic(part);
        self.inner
            .transport
            .subscribe(&topic, QoS::AtLeastOnce, handler)
            .await?;
        debug!(topic = %topic, "Subscribed");
        Ok(())
    }

    pub fn device_publisher(&self) -> Option<DevicePublisher> {
        self.inner
            .publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install the device publisher; only the first assignment is accepted
    pub fn set_device_publisher(&self, publisher: DevicePublisher) -> DeviceResult<()> {
        let mut slot = self
            .inner
            .publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(DeviceError::DevicePublisherAlreadySet);
        }
        *slot = Some(publisher);
        Ok(())
    }

    /// Publish whole seconds since startup on `$stats/uptime`
    pub async fn publish_stats(&self) -> DeviceResult<()> {
        let uptime = self.inner.stats.uptime();
        self.send_message(STATS_UPTIME_ATTRIBUTE, uptime.to_string())
            .await
    }

    /// Announce `disconnected` and close the session.
    ///
    /// Transport failures are logged, never returned.
    pub async fn disconnect(&self) -> DeviceResult<()> {
        info!(device = %self.name(), "Disconnecting device");

        if let Err(e) = self
            .send_message(STATE_ATTRIBUTE, DeviceState::Disconnected.as_str())
            .await
        {
            warn!(device = %self.name(), error = %e, "Failed to announce disconnected state");
        }

        if let Err(e) = self.inner.transport.disconnect(DISCONNECT_GRACE).await {
            warn!(device = %self.name(), error = %e, "Transport disconnect failed");
        }

        metrics().set_device_state(DeviceState::Disconnected.as_str());
        self.set_link(LinkState::Disconnected);
        Ok(())
    }

    /// Connect, stay up until `shutdown` turns true (or its sender is
    /// dropped), then disconnect.
    ///
    /// Returns [`DeviceError::BootstrapWhileDisconnected`] if a later session
    /// leaves the device [`LinkState::Faulted`].
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> DeviceResult<()> {
        self.connect().await?;

        let mut link = self.subscribe_state();
        let faulted = tokio::select! {
            dropped = async { shutdown.wait_for(|stop| *stop).await.is_err() } => {
                if dropped {
                    debug!(device = %self.name(), "Shutdown sender dropped");
                }
                info!(device = %self.name(), "Shutdown requested");
                false
            }
            _ = async { link.wait_for(|state| *state == LinkState::Faulted).await.is_ok() } => true,
        };

        self.disconnect().await?;
        if faulted {
            return Err(DeviceError::BootstrapWhileDisconnected);
        }
        Ok(())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("nodes", &self.node_names())
            .finish()
    }
}

impl fmt::Debug for WeakDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDevice")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}
