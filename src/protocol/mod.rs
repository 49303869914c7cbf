//! Homie convention wire protocol
//!
//! Topic construction, attribute names and payload vocabulary shared by the
//! device runtime and the transport adapter.

pub mod messages;
pub mod topics;

// Re-export commonly used types
pub use messages::*;
pub use topics::*;
