//! Testing utilities
//!
//! Mock implementations for exercising a device without an MQTT broker.

pub mod mocks;

pub use mocks::*;
