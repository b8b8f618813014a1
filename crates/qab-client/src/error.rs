//! Client error types

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_util::codec::LinesCodecError;

use qab_protocol::{ProtocolError, RemoteError, SubscriptionId};

/// Failures of the underlying byte stream
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol or connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Line framing error (oversized line, I/O)
    #[error("Line framing error: {0}")]
    Lines(#[from] LinesCodecError),

    /// Address scheme is not one of `ws://`, `wss://`, `tcp://`
    #[error("Unsupported address: {0}")]
    UnsupportedAddress(String),
}

/// Failures of a call or event wait on a [`Session`](crate::Session)
#[derive(Error, Debug)]
pub enum SessionError {
    /// No response (or event) before the deadline
    #[error("Timed out after {after:?} waiting for {context}")]
    Timeout { context: String, after: Duration },

    /// Another outstanding request already uses this id
    #[error("Request id already in flight: {0}")]
    DuplicateId(String),

    /// The bridge answered with an error object
    #[error("{method} failed: {error}")]
    Remote { method: String, error: RemoteError },

    /// The connection is gone, either closed explicitly or after a fatal read error
    #[error("Connection closed")]
    ConnectionClosed,

    /// Writing the request to the connection failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The request could not be encoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// `events` was asked for a subscription that is not tracked
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),
}

impl SessionError {
    /// Whether this is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout { .. })
    }

    /// Whether the session can no longer be used
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectionClosed | SessionError::Transport(_)
        )
    }
}

/// Failures of the typed inspector API
#[derive(Error, Debug)]
pub enum ClientError {
    /// Session-level failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The bridge answered, but not in the shape this method returns
    #[error("Unexpected result for {method}: {source}")]
    UnexpectedResult {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// `evaluate` reported an error in the expression itself
    #[error("Evaluation failed: {message}")]
    Evaluation { message: String, line: Option<i64> },

    /// `hello` came back from something that is not the bridge
    #[error("Handshake failed: peer speaks {protocol:?}")]
    Handshake { protocol: String },

    /// The bridge did not accept a connection within the connect budget
    #[error("Could not connect to {address} after {attempts} attempts: {source}")]
    NotConnected {
        address: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

impl ClientError {
    /// The remote error object, if the bridge rejected the call
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            ClientError::Session(SessionError::Remote { error, .. }) => Some(error),
            _ => None,
        }
    }

    /// Whether the call hit its deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Session(e) if e.is_timeout())
    }
}
