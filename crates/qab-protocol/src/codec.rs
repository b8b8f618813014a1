//! Text frame encoding and inbound frame classification

use serde_json::Value;

use crate::error::ProtocolError;
use crate::message::{Event, Request, Response, EVENT_METHOD};

/// Largest text frame accepted on line-delimited transports (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// A frame received from the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Answer to an earlier request
    Response(Response),
    /// Unsolicited push
    Event(Event),
}

/// Serialize a request into one compact JSON text frame
pub fn encode_request(request: &Request) -> Result<String, ProtocolError> {
    serde_json::to_string(request).map_err(ProtocolError::Serialization)
}

/// Classify and decode one inbound text frame.
///
/// An object with a string `id` is a response. An object without `id` whose
/// `method` is `"event"` is an event. Everything else is rejected, including
/// the id-less error replies the bridge sends for unparseable requests.
pub fn decode_inbound(text: &str) -> Result<InboundFrame, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    let Value::Object(mut obj) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    if matches!(obj.get("id"), Some(Value::String(_))) {
        let response: Response = serde_json::from_value(Value::Object(obj))
            .map_err(|source| ProtocolError::Malformed {
                kind: "response",
                source,
            })?;
        return Ok(InboundFrame::Response(response));
    }

    match obj.get("method").and_then(Value::as_str) {
        Some(EVENT_METHOD) if !obj.contains_key("id") => {
            let params = obj.remove("params").unwrap_or(Value::Null);
            let event: Event = match params {
                Value::Null => Event::default(),
                params => serde_json::from_value(params).map_err(|source| {
                    ProtocolError::Malformed {
                        kind: "event",
                        source,
                    }
                })?,
            };
            Ok(InboundFrame::Event(event))
        }
        _ => Err(ProtocolError::UnrecognizedFrame(summarize(&obj))),
    }
}

/// Short description of an unrecognized object for diagnostics
fn summarize(obj: &serde_json::Map<String, Value>) -> String {
    let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
    format!("object with keys [{}]", keys.join(", "))
}
