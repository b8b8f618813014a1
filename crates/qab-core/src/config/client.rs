//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;

/// Well-known address the bridge listens on
pub const DEFAULT_ADDRESS: &str = "ws://127.0.0.1:7777";

/// Configuration for an inspector client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bridge endpoint.
    ///
    /// `ws://` and `wss://` addresses use the bridge's WebSocket transport;
    /// `tcp://host:port` uses newline-delimited JSON over plain TCP.
    pub address: String,

    /// Default deadline for a single call
    #[serde(with = "duration_millis")]
    pub call_timeout: Duration,

    /// Total time to keep retrying while the bridge is not yet accepting connections
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Upper bound on flushing the transport when a session closes
    #[serde(with = "duration_millis")]
    pub close_timeout: Duration,

    /// Prefix of generated request ids (`"{prefix}-{n}"`)
    pub request_id_prefix: String,

    /// Backoff between connection attempts
    pub backoff: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            call_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(1),
            request_id_prefix: "qab".to_string(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at another address
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
