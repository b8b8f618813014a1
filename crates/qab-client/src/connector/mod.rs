//! Establishing a session with a bridge that may still be starting up

mod backoff;

pub use backoff::ExponentialBackoff;

use std::io;

use tokio::time::Instant;

use qab_core::ClientConfig;

use crate::error::{ClientError, TransportError};
use crate::session::{Session, SessionOptions};
use crate::transport::Endpoint;

/// Connect to `config.address`, retrying with backoff until
/// `config.connect_timeout` is spent.
///
/// Unsupported addresses fail at once; connection failures are retried.
pub async fn connect_with_retry(config: &ClientConfig) -> Result<Session, ClientError> {
    let endpoint =
        Endpoint::parse(&config.address).map_err(|source| ClientError::NotConnected {
            address: config.address.clone(),
            attempts: 0,
            source,
        })?;

    let deadline = Instant::now() + config.connect_timeout;
    let mut backoff = ExponentialBackoff::from_config(&config.backoff);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let error = match tokio::time::timeout_at(deadline, endpoint.open()).await {
            Ok(Ok((sink, stream))) => {
                tracing::info!(endpoint = %endpoint, attempts, "Connected to bridge");
                return Ok(Session::start(sink, stream, SessionOptions::from(config)));
            }
            Ok(Err(e)) => e,
            Err(_) => TransportError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection attempt timed out",
            )),
        };

        let delay = backoff.next_delay();
        if Instant::now() + delay >= deadline {
            tracing::warn!(endpoint = %endpoint, attempts, error = %error, "Giving up on bridge");
            return Err(ClientError::NotConnected {
                address: config.address.clone(),
                attempts,
                source: error,
            });
        }

        tracing::debug!(
            endpoint = %endpoint,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Bridge not reachable yet, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
