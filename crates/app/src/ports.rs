//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the device tree and the outside world.
//! They are defined here (in `app`) so that both the engine and the adapter
//! crates can depend on them without creating circular dependencies.

pub mod transport;

pub use transport::{BeforeDisconnectHook, InboundMessage, Message, Qos, Transport};
