//! Frame records for the qml-agent-bridge protocol
//!
//! Three kinds of frame travel over the connection, one JSON object each:
//!
//! - **Request** (client → bridge): `{"id", "method", "params"?}`
//! - **Response** (bridge → client): `{"id", "result"?, "error"?}`, exactly one
//!   per request, correlated by `id`
//! - **Event** (bridge → client, unsolicited): `{"method": "event", "params": {...}}`,
//!   never carries an `id`
//!
//! Responses and events interleave freely on the wire. Events belonging to a
//! single subscription arrive in emission order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::ids::{ObjectId, SubscriptionId};

/// Protocol name reported by `hello`.
pub const PROTOCOL_NAME: &str = "qml-agent-bridge";

/// Protocol version this client was written against.
pub const PROTOCOL_VERSION: &str = "0.2";

/// `method` value carried by every pushed event frame.
pub const EVENT_METHOD: &str = "event";

/// Outbound request frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, unique among outstanding requests on the connection
    pub id: String,
    /// Method name (`inspect`, `set_property`, ...)
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a new request
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a failed response.
///
/// The bridge reports `code` as one of `not_found`, `bad_request`, `failed`
/// or `not_implemented`. Any other members are kept untouched in `data`.
/// Decoding never fails: shapes that do not fit are folded into `code` and
/// `message` (see the `From<Value>` impl).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl From<Value> for RemoteError {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(mut data) => {
                let code = data.remove("code").map(scalar_text).unwrap_or_default();
                let message = data.remove("message").map(scalar_text).unwrap_or_default();
                Self { code, message, data }
            }
            Value::Null => Self::default(),
            other => Self {
                message: scalar_text(other),
                ..Self::default()
            },
        }
    }
}

/// Text of a string value, or its compact JSON form otherwise
fn scalar_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code.is_empty(), self.message.is_empty()) {
            (false, false) => write!(f, "{}: {}", self.code, self.message),
            (false, true) => write!(f, "{}", self.code),
            (true, false) => write!(f, "{}", self.message),
            (true, true) => write!(f, "unspecified remote error"),
        }
    }
}

/// Inbound response frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers
    pub id: String,
    /// Method-specific result object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present when the bridge failed the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Response {
    /// Successful response
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Failed response
    pub fn err(id: impl Into<String>, error: RemoteError) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Split into the result or the remote error.
    ///
    /// An `error` member always wins, even if a `result` is also present.
    /// A response with neither yields an empty object.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or_else(|| Value::Object(Map::new()))),
        }
    }
}

/// What a subscription observes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Property value change (carries `value`)
    Property,
    /// Signal emission (may carry `snapshot`)
    Signal,
    /// Any kind this client does not know about
    #[serde(other)]
    Other,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Property => write!(f, "property"),
            EventKind::Signal => write!(f, "signal"),
            EventKind::Other => write!(f, "other"),
        }
    }
}

/// Parameters of a pushed event frame
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Subscription that produced the event, when the bridge reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<SubscriptionId>,
    /// Object the event originates from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<ObjectId>,
    /// Property name, or signal name with or without its signature (`"ping()"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EventKind>,
    /// New property value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Auxiliary property values captured when a signal fired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Map<String, Value>>,
}

impl Event {
    /// Whether this is a signal emission
    pub fn is_signal(&self) -> bool {
        self.kind == Some(EventKind::Signal)
    }

    /// Whether this is a property change
    pub fn is_property(&self) -> bool {
        self.kind == Some(EventKind::Property)
    }

    /// Look up a value captured in the signal snapshot
    pub fn snapshot_value(&self, property: &str) -> Option<&Value> {
        self.snapshot.as_ref().and_then(|s| s.get(property))
    }
}
