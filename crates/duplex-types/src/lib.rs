//! Core types for the duplex peer-to-peer messaging overlay.
//!
//! This crate defines the data structures shared by the wire protocol engine
//! and the command-line node. It contains no business logic.

pub mod capability;
pub mod config;
pub mod serde_compat;

pub use capability::CapabilitySet;
pub use config::{NodeConfig, VersionInfo};
