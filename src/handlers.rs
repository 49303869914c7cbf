//! Optional callbacks a device invokes at fixed points of its lifecycle
//!
//! Connection and broadcast hooks are plain synchronous closures. Publishers
//! run inside the bootstrap sequence and may publish, so they are async.

use crate::device::Device;
use crate::error::DeviceResult;
use crate::node::Node;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Called after the bootstrap sequence of every established session
pub type ConnectHandler = Arc<dyn Fn(&Device) + Send + Sync>;

/// Called with the transport's reason when an established session drops
pub type ConnectionLostHandler = Arc<dyn Fn(&Device, &str) + Send + Sync>;

/// Called with the broadcast level and raw payload
pub type BroadcastHandler = Arc<dyn Fn(&Device, &str, &[u8]) + Send + Sync>;

/// Device-level publisher run at the end of bootstrap
pub type DevicePublisher =
    Arc<dyn Fn(Device) -> BoxFuture<'static, DeviceResult<()>> + Send + Sync>;

/// Per-node publisher run right after the node subscribed
pub type NodePublisher =
    Arc<dyn Fn(Arc<dyn Node>) -> BoxFuture<'static, DeviceResult<()>> + Send + Sync>;

/// Wrap an async closure as a [`DevicePublisher`]
pub fn device_publisher<F, Fut>(f: F) -> DevicePublisher
where
    F: Fn(Device) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DeviceResult<()>> + Send + 'static,
{
    Arc::new(move |device| Box::pin(f(device)))
}

/// Wrap an async closure as a [`NodePublisher`]
pub fn node_publisher<F, Fut>(f: F) -> NodePublisher
where
    F: Fn(Arc<dyn Node>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DeviceResult<()>> + Send + 'static,
{
    Arc::new(move |node| Box::pin(f(node)))
}

/// Named handler slots, all optional
#[derive(Clone, Default)]
pub struct DeviceHandlers {
    pub on_connect: Option<ConnectHandler>,
    pub on_connection_lost: Option<ConnectionLostHandler>,
    pub on_broadcast: Option<BroadcastHandler>,
}

impl DeviceHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Device) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(handler));
        self
    }

    pub fn on_connection_lost<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Device, &str) + Send + Sync + 'static,
    {
        self.on_connection_lost = Some(Arc::new(handler));
        self
    }

    pub fn on_broadcast<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Device, &str, &[u8]) + Send + Sync + 'static,
    {
        self.on_broadcast = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for DeviceHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_connection_lost", &self.on_connection_lost.is_some())
            .field("on_broadcast", &self.on_broadcast.is_some())
            .finish()
    }
}
