//! # homie-app
//!
//! Application layer — the device tree engine and its **port definitions**.
//!
//! ## Responsibilities
//! - Define the `Transport` **port** that broker adapters implement
//! - Own the **device tree**: lifecycle (`start`, `create_device`,
//!   `remove_device`), value publishing, description publishing
//! - **Reconfigure** live devices and clear the topics of removed properties
//! - **Route** inbound `/set` commands to the callbacks of the addressed device
//!
//! ## Dependency rule
//! Depends on `homie-domain` only (plus `tokio` for locks, channels and the
//! dispatcher task). Never imports adapter crates. Adapters depend on *this*
//! crate, not the reverse.

pub mod command;
pub mod device;
pub mod ports;
pub mod reconfigure;
pub mod root;

mod tree;

#[cfg(test)]
mod test_support;

pub use command::{Command, CommandSubscription};
pub use device::Device;
pub use root::{RootDevice, RootDeviceBuilder};
