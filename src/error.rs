//! Error types for the Homie device runtime
//!
//! Every failure is classified as either a configuration defect (a mistake
//! discoverable at development time, such as a duplicate node name) or an
//! environmental condition (broker unreachable, session dropped). Callers
//! terminate on the former and retry or report the latter.

use crate::config::ConfigError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for device operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("Node {0} already added")]
    DuplicateNode(String),

    #[error("Property {property} already added to node {node}")]
    DuplicateProperty { node: String, property: String },

    #[error("Node {node} has no property {property}")]
    InvalidProperty { node: String, property: String },

    #[error("Device publisher is already configured")]
    DevicePublisherAlreadySet,

    #[error("Bootstrap invoked while transport reports disconnected")]
    BootstrapWhileDisconnected,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection failed: {reason}")]
    ConnectFailed { reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Coarse classification of a [`DeviceError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Programming or configuration mistake; not worth retrying
    Configuration,
    /// Network or broker condition; may clear on its own
    Environmental,
}

impl DeviceError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::InvalidBrokerUrl(_)
            | DeviceError::DuplicateNode(_)
            | DeviceError::DuplicateProperty { .. }
            | DeviceError::InvalidProperty { .. }
            | DeviceError::DevicePublisherAlreadySet
            | DeviceError::BootstrapWhileDisconnected
            | DeviceError::Config(_) => ErrorKind::Configuration,
            DeviceError::ConnectFailed { .. } | DeviceError::Transport(_) => {
                ErrorKind::Environmental
            }
        }
    }

    /// True for errors the process should not try to recover from
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Create connection failure error
    pub fn connect_failed<S: Into<String>>(reason: S) -> Self {
        Self::ConnectFailed {
            reason: reason.into(),
        }
    }
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
