//! Configuration for a Homie device
//!
//! The file format is TOML with a `[device]` section, an `[mqtt]` section and
//! an optional list of `[[nodes]]`. Runtime callbacks are not configured here,
//! see [`crate::handlers::DeviceHandlers`].

use crate::protocol::PropertyDataType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

/// Main device configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// Device identity and reporting settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device ID, also used as MQTT client identity (must match [a-z0-9-]+)
    pub name: String,
    /// Root of the Homie topic tree, must end with '/'
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    /// Interval announced on `$stats/interval`, in seconds
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    /// Address announced on `$localip`; resolved from the outbound route when absent
    pub local_ip: Option<IpAddr>,
}

fn default_base_topic() -> String {
    "homie/".to_string()
}

fn default_stats_interval() -> u64 {
    60
}

/// MQTT broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, e.g. `mqtts://broker.local:8883`
    pub broker_url: String,
    /// Literal username (takes precedence over `username_env`)
    pub username: Option<String>,
    /// Literal password (takes precedence over `password_env`)
    pub password: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Let the transport re-establish a dropped session
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_auto_reconnect() -> bool {
    true
}

impl MqttSection {
    /// Section for a broker URL with everything else defaulted
    pub fn new<S: Into<String>>(broker_url: S) -> Self {
        Self {
            broker_url: broker_url.into(),
            username: None,
            password: None,
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            auto_reconnect: default_auto_reconnect(),
        }
    }

    /// Resolve credentials, literal values first, then environment variables.
    ///
    /// Returns `None` when no username is available.
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self
            .username
            .clone()
            .or_else(|| get_env_var_optional(self.username_env.as_ref()))?;
        let password = self
            .password
            .clone()
            .or_else(|| get_env_var_optional(self.password_env.as_ref()))
            .unwrap_or_default();
        Some((username, password))
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// Node declared in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

/// Property declared under a node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyConfig {
    pub name: String,
    #[serde(default)]
    pub datatype: PropertyDataType,
    #[serde(default)]
    pub settable: bool,
    #[serde(default = "default_retained")]
    pub retained: bool,
    pub unit: Option<String>,
    pub format: Option<String>,
}

fn default_retained() -> bool {
    true
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid device name: {0}")]
    InvalidDeviceName(String),
    #[error("Base topic must end with '/': {0}")]
    InvalidBaseTopic(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeviceConfig {
    /// Minimal configuration for a device on the given broker
    pub fn new<N, B, U>(name: N, base_topic: B, broker_url: U) -> Self
    where
        N: Into<String>,
        B: Into<String>,
        U: Into<String>,
    {
        Self {
            device: DeviceSection {
                name: name.into(),
                base_topic: base_topic.into(),
                stats_interval_secs: default_stats_interval(),
                local_ip: None,
            },
            mqtt: MqttSection::new(broker_url),
            nodes: Vec::new(),
        }
    }

    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: DeviceConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the device runtime relies on.
    ///
    /// The broker URL is checked when connecting, not here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_name(&self.device.name)?;

        if !self.device.base_topic.ends_with('/') {
            return Err(ConfigError::InvalidBaseTopic(
                self.device.base_topic.clone(),
            ));
        }

        if self.device.stats_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "stats_interval_secs must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "node '{}' declared more than once",
                    node.name
                )));
            }
        }

        Ok(())
    }
}

/// Validate a Homie device ID: lowercase letters, digits and hyphens,
/// not starting with a hyphen
fn validate_device_name(name: &str) -> Result<(), ConfigError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if name.is_empty() || !valid_chars || name.starts_with('-') {
        return Err(ConfigError::InvalidDeviceName(format!(
            "Device name '{name}' must match pattern [a-z0-9-]+"
        )));
    }

    Ok(())
}
