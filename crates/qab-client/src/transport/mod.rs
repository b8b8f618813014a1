//! Text frame transports
//!
//! The session only needs an ordered, reliable channel of UTF-8 text frames
//! in each direction. Two carriers provide one: WebSocket text messages
//! (what the bridge listens on) and newline-delimited JSON over any byte
//! stream.

pub mod lines;
pub mod websocket;

use std::fmt;
use std::pin::Pin;

use futures::{Sink, Stream};

use crate::error::TransportError;

/// Outbound half: accepts one text frame per item
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half: yields text frames in arrival order, ends on close
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Where the bridge is listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `ws://` or `wss://` URL
    WebSocket(String),
    /// `host:port` carrying newline-delimited JSON
    Tcp(String),
}

impl Endpoint {
    /// Parse a configured address.
    ///
    /// `ws://` and `wss://` select the WebSocket transport, `tcp://host:port`
    /// selects line-delimited TCP.
    pub fn parse(address: &str) -> Result<Self, TransportError> {
        let address = address.trim();
        if address.starts_with("ws://") || address.starts_with("wss://") {
            return Ok(Endpoint::WebSocket(address.to_string()));
        }
        match address.strip_prefix("tcp://") {
            Some(host_port) if !host_port.is_empty() => Ok(Endpoint::Tcp(host_port.to_string())),
            _ => Err(TransportError::UnsupportedAddress(address.to_string())),
        }
    }

    /// Open a connection to the endpoint
    pub async fn open(&self) -> Result<(FrameSink, FrameStream), TransportError> {
        match self {
            Endpoint::WebSocket(url) => websocket::connect(url).await,
            Endpoint::Tcp(addr) => lines::connect(addr).await,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::WebSocket(url) => write!(f, "{}", url),
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}
