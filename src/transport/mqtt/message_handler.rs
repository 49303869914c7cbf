//! Pure message routing for MQTT events and subscription dispatch
//!
//! This module turns rumqttc events into routing decisions and delivers
//! inbound publishes to the handlers registered per topic filter.

use crate::protocol::topic_matches;
use crate::transport::MessageCallback;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, trace};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => {
                use rumqttc::v5::mqttbytes::v5::Packet;
                match incoming {
                    Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                    Packet::Publish(publish) => EventRoute::MessageReceived {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.to_vec(),
                    },
                    Packet::Disconnect(_) => EventRoute::DisconnectedByBroker,
                    Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                        packet_id: suback.pkid,
                    },
                    other => EventRoute::InfrastructureEvent(format!("{other:?}")),
                }
            }
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker sent DISCONNECT; the following poll reports the error
    DisconnectedByBroker,
    /// Our DISCONNECT reached the wire
    DisconnectSent,
    /// Subscription confirmed
    SubscriptionConfirmed { packet_id: u16 },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

struct Subscription {
    qos: QoS,
    callback: MessageCallback,
}

/// Filter -> handler table shared between the client and its event loop
#[derive(Default)]
pub struct SubscriptionTable {
    entries: RwLock<HashMap<String, Subscription>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; an existing handler for the same filter is replaced
    pub fn insert(&self, filter: &str, qos: QoS, callback: MessageCallback) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries
            .insert(filter.to_string(), Subscription { qos, callback })
            .is_some()
        {
            debug!(filter = %filter, "Replaced subscription handler");
        }
    }

    /// Filters currently registered, with their QoS
    pub fn filters(&self) -> Vec<(String, QoS)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|(filter, sub)| (filter.clone(), sub.qos))
            .collect()
    }

    /// Deliver a message to every matching handler; returns how many ran
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        let matching: Vec<MessageCallback> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .iter()
                .filter(|(filter, _)| topic_matches(filter, topic))
                .map(|(_, sub)| sub.callback.clone())
                .collect()
        };

        if matching.is_empty() {
            trace!(topic = %topic, "No handler for inbound message");
        }
        for callback in &matching {
            callback(topic, payload);
        }
        matching.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
