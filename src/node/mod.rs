//! Nodes and properties published below a device
//!
//! [`Node`] is the seam the device drives during bootstrap. [`BasicNode`]
//! and [`Property`] cover the common case of a node with typed properties.

pub mod basic;
pub mod property;

pub use basic::BasicNode;
pub use property::{Property, SetHandler};

use crate::device::{Device, WeakDevice};
use crate::error::DeviceResult;
use crate::handlers::NodePublisher;
use async_trait::async_trait;

/// A node registered with a [`Device`]
#[async_trait]
pub trait Node: Send + Sync {
    /// Node ID, unique within the device
    fn name(&self) -> &str;

    /// Free-form type tag published on `$type`
    fn node_type(&self) -> &str;

    /// Record the owning device; the first attachment wins
    fn attach(&self, device: WeakDevice);

    /// Owning device, if attached and still alive
    fn device(&self) -> Option<Device>;

    /// Publish the node's description topics
    async fn publish(&self, device: &Device) -> DeviceResult<()>;

    /// Wire up the node's inbound subscriptions
    async fn subscribe(&self, device: &Device) -> DeviceResult<()>;

    /// Publisher invoked after [`Node::subscribe`] during bootstrap
    fn node_publisher(&self) -> Option<NodePublisher> {
        None
    }
}
