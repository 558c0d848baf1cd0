//! # homie-domain
//!
//! Pure domain model for the Homie (v5) device convention.
//!
//! ## Responsibilities
//! - Foundational types: validated identifiers, device states, error conventions
//! - Define the **configuration** of a device (nodes and properties)
//! - Validate and coerce raw **values** against a property's datatype and format
//! - Produce the deterministic, versioned **description** of a device
//! - Compute the **patches** between two configurations
//! - Match concrete **topics** against subscription patterns
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod state;

pub mod config;
pub mod datatype;
pub mod description;
pub mod format;
pub mod patch;
pub mod topic;
pub mod value;
