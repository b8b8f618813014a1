//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or classifying frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame is not valid JSON
    #[error("Invalid JSON frame: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// Frame is valid JSON but not an object
    #[error("Frame is not a JSON object")]
    NotAnObject,

    /// Object that is neither a response nor an event
    #[error("Unrecognized frame: {0}")]
    UnrecognizedFrame(String),

    /// A recognized frame whose members have the wrong shape
    #[error("Malformed {kind} frame: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Request could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
}
