//! Command implementations.

pub mod config;
pub mod ping;
pub mod start;
