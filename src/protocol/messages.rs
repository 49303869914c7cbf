//! Homie attribute names and payload vocabulary
//!
//! Device attributes are published retained with QoS 1 so late subscribers
//! can rebuild the whole device tree from the broker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the Homie convention announced on `$homie`
pub const HOMIE_VERSION: &str = "3.0.1";

/// Implementation identifier announced on `$implementation`
pub const IMPLEMENTATION: &str = "homie-rs";

pub const HOMIE_ATTRIBUTE: &str = "$homie";
pub const NAME_ATTRIBUTE: &str = "$name";
pub const LOCAL_IP_ATTRIBUTE: &str = "$localip";
pub const IMPLEMENTATION_ATTRIBUTE: &str = "$implementation";
pub const STATE_ATTRIBUTE: &str = "$state";
pub const STATS_INTERVAL_ATTRIBUTE: &str = "$stats/interval";
pub const STATS_UPTIME_ATTRIBUTE: &str = "$stats/uptime";
pub const NODES_ATTRIBUTE: &str = "$nodes";
pub const BROADCAST_ATTRIBUTE: &str = "$broadcast";

pub const TYPE_ATTRIBUTE: &str = "$type";
pub const PROPERTIES_ATTRIBUTE: &str = "$properties";
pub const DATATYPE_ATTRIBUTE: &str = "$datatype";
pub const SETTABLE_ATTRIBUTE: &str = "$settable";
pub const RETAINED_ATTRIBUTE: &str = "$retained";
pub const UNIT_ATTRIBUTE: &str = "$unit";
pub const FORMAT_ATTRIBUTE: &str = "$format";

/// Suffix of the command topic a settable property listens on
pub const SET_SUFFIX: &str = "set";

/// Device lifecycle state published on `$state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Announced at the end of the metadata block of every bootstrap
    Ready,
    /// Last will, delivered by the broker on unclean disconnect
    Lost,
    /// Announced by an orderly disconnect
    Disconnected,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Ready => "ready",
            DeviceState::Lost => "lost",
            DeviceState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Property datatypes defined by the convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyDataType {
    Integer,
    Float,
    Boolean,
    #[default]
    String,
    Enum,
    Color,
}

impl PropertyDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyDataType::Integer => "integer",
            PropertyDataType::Float => "float",
            PropertyDataType::Boolean => "boolean",
            PropertyDataType::String => "string",
            PropertyDataType::Enum => "enum",
            PropertyDataType::Color => "color",
        }
    }
}

impl fmt::Display for PropertyDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a boolean attribute the way the convention expects (`true`/`false`)
pub fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_state_payloads() {
        assert_eq!(DeviceState::Ready.as_str(), "ready");
        assert_eq!(DeviceState::Lost.as_str(), "lost");
        assert_eq!(DeviceState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_datatype_serialization() {
        let json = serde_json::to_string(&PropertyDataType::Float).unwrap();
        assert_eq!(json, "\"float\"");

        let parsed: PropertyDataType = serde_json::from_str("\"color\"").unwrap();
        assert_eq!(parsed, PropertyDataType::Color);
    }

    #[test]
    fn test_datatype_default_is_string() {
        assert_eq!(PropertyDataType::default(), PropertyDataType::String);
    }

    #[test]
    fn test_format_bool() {
        assert_eq!(format_bool(true), "true");
        assert_eq!(format_bool(false), "false");
    }
}
