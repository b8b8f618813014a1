//! qab-core: Configuration for the qml-agent-bridge inspector client
//!
//! This crate holds the settings shared by every client component: where the
//! bridge listens, how long calls may take, and how connection attempts back off.

pub mod config;
pub mod error;

pub use config::{BackoffConfig, ClientConfig};
pub use error::ConfigError;
