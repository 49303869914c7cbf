//! Announcement sequence run on every established session
//!
//! Order matters to observers discovering the device top-down: device
//! attributes, `$nodes`, node descriptions, node subscriptions and
//! publishers, the device publisher, uptime, and finally the broadcast
//! subscription.

use super::Device;
use crate::device_span;
use crate::error::{DeviceError, DeviceResult};
use crate::observability::metrics;
use crate::protocol::{
    broadcast_filter, broadcast_level, DeviceState, HOMIE_ATTRIBUTE, HOMIE_VERSION,
    IMPLEMENTATION, IMPLEMENTATION_ATTRIBUTE, LOCAL_IP_ATTRIBUTE, NAME_ATTRIBUTE,
    NODES_ATTRIBUTE, STATE_ATTRIBUTE, STATS_INTERVAL_ATTRIBUTE,
};
use crate::transport::MessageCallback;
use rumqttc::v5::mqttbytes::QoS;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn, Instrument};

/// Routable address used to find the outbound interface; nothing is sent
const OUTBOUND_PROBE_ADDR: &str = "8.8.8.8:80";

/// Address of the interface used for outbound traffic
pub async fn outbound_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(OUTBOUND_PROBE_ADDR).await?;
    Ok(socket.local_addr()?.ip())
}

/// Configured address, else the outbound interface, else loopback
pub async fn resolve_local_ip(configured: Option<IpAddr>) -> IpAddr {
    if let Some(ip) = configured {
        return ip;
    }
    match outbound_ip().await {
        Ok(ip) => ip,
        Err(e) => {
            warn!(error = %e, "Could not determine outbound address, announcing loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

impl Device {
    /// Run the announcement sequence; only valid while the transport is connected
    pub(crate) async fn bootstrap(&self) -> DeviceResult<()> {
        let span = device_span!(step = "bootstrap", device = %self.name());
        async move {
            if !self.is_connected() {
                return Err(DeviceError::BootstrapWhileDisconnected);
            }

            self.publish_attributes().await?;
            metrics().set_device_state(DeviceState::Ready.as_str());

            let nodes = self.nodes();
            for node in &nodes {
                node.publish(self).await?;
            }

            for node in &nodes {
                node.subscribe(self).await?;
                if let Some(publisher) = node.node_publisher() {
                    if let Err(e) = publisher(node.clone()).await {
                        error!(node = %node.name(), error = %e, "Node publisher failed");
                    }
                }
            }

            if let Some(publisher) = self.device_publisher() {
                if let Err(e) = publisher(self.clone()).await {
                    error!(device = %self.name(), error = %e, "Device publisher failed");
                }
            }

            self.publish_stats().await?;
            self.subscribe_broadcast().await?;

            info!(device = %self.name(), nodes = nodes.len(), "Bootstrap complete");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn publish_attributes(&self) -> DeviceResult<()> {
        let section = &self.config().device;
        let local_ip = resolve_local_ip(section.local_ip).await;

        let attributes = [
            (HOMIE_ATTRIBUTE, HOMIE_VERSION.to_string()),
            (NAME_ATTRIBUTE, self.name().to_string()),
            (LOCAL_IP_ATTRIBUTE, local_ip.to_string()),
            (IMPLEMENTATION_ATTRIBUTE, IMPLEMENTATION.to_string()),
            (STATE_ATTRIBUTE, DeviceState::Ready.to_string()),
            (
                STATS_INTERVAL_ATTRIBUTE,
                section.stats_interval_secs.to_string(),
            ),
            (NODES_ATTRIBUTE, self.node_names().join(",")),
        ];

        for (attribute, value) in attributes {
            self.send_message(attribute, value).await?;
        }
        Ok(())
    }

    async fn subscribe_broadcast(&self) -> DeviceResult<()> {
        let base_topic = self.config().device.base_topic.clone();
        let filter = broadcast_filter(&base_topic);
        let weak = self.downgrade();

        let callback: MessageCallback = Arc::new(move |topic: &str, payload: &[u8]| {
            let Some(device) = weak.upgrade() else {
                return;
            };
            metrics().broadcast_received();
            let level = broadcast_level(&base_topic, topic);
            debug!(device = %device.name(), level = %level, "Broadcast received");

            if let Some(handler) = &device.inner.handlers.on_broadcast {
                handler(&device, level, payload);
            }
        });

        self.inner
            .transport
            .subscribe(&filter, QoS::AtLeastOnce, callback)
            .await?;
        debug!(filter = %filter, "Subscribed to broadcasts");
        Ok(())
    }
}
