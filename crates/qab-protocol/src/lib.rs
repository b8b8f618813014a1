//! qab-protocol: Wire protocol for the qml-agent-bridge inspector
//!
//! This crate defines the JSON frames exchanged between an inspector client
//! and the bridge running inside a QML application: requests, responses,
//! pushed events, and the closed set of typed records for every method the
//! bridge understands. It performs no I/O.

pub mod codec;
pub mod error;
pub mod ids;
pub mod message;
pub mod methods;

pub use codec::{decode_inbound, encode_request, InboundFrame, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use ids::{ObjectId, SubscriptionId};
pub use message::{
    Event, EventKind, RemoteError, Request, Response, EVENT_METHOD, PROTOCOL_NAME,
    PROTOCOL_VERSION,
};
pub use methods::MethodCall;
