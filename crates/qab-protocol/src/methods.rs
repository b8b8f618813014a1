//! Typed request and result records for every bridge method
//!
//! The bridge speaks loosely-typed JSON. These records pin down the shape of
//! each method's parameters and result at the boundary so the rest of the
//! client never handles raw objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::ids::{ObjectId, SubscriptionId};
use crate::message::Request;

/// One model row: role name → value
pub type Row = Map<String, Value>;

/// A call to one of the recognized bridge methods
#[derive(Debug, Clone, PartialEq)]
pub enum MethodCall {
    Hello,
    ListRoots,
    FindByName {
        name: String,
    },
    Inspect {
        object_id: ObjectId,
    },
    ListChildren {
        object_id: ObjectId,
    },
    SetProperty {
        object_id: ObjectId,
        name: String,
        value: Value,
    },
    CallMethod {
        object_id: ObjectId,
        name: String,
        args: Vec<Value>,
    },
    Evaluate {
        object_id: ObjectId,
        expression: String,
    },
    SubscribeProperty {
        object_id: ObjectId,
        name: String,
    },
    SubscribeSignal {
        object_id: ObjectId,
        signal: String,
        /// Properties to capture atomically with every emission
        snapshot: Option<Vec<String>>,
    },
    Unsubscribe {
        subscription_id: SubscriptionId,
    },
    ModelInfo {
        object_id: ObjectId,
    },
    ModelFetch {
        object_id: ObjectId,
        start: usize,
        count: usize,
        /// Empty means "all roles"
        roles: Vec<String>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectParams<'a> {
    object_id: &'a ObjectId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetPropertyParams<'a> {
    object_id: &'a ObjectId,
    name: &'a str,
    value: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallMethodParams<'a> {
    object_id: &'a ObjectId,
    name: &'a str,
    args: &'a [Value],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateParams<'a> {
    object_id: &'a ObjectId,
    expression: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribePropertyParams<'a> {
    object_id: &'a ObjectId,
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeSignalParams<'a> {
    object_id: &'a ObjectId,
    signal: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<&'a [String]>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnsubscribeParams<'a> {
    subscription_id: &'a SubscriptionId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelFetchParams<'a> {
    object_id: &'a ObjectId,
    start: usize,
    count: usize,
    #[serde(skip_serializing_if = "no_roles")]
    roles: &'a [String],
}

fn no_roles(roles: &&[String]) -> bool {
    roles.is_empty()
}

impl MethodCall {
    /// Wire name of the method
    pub fn method_name(&self) -> &'static str {
        match self {
            MethodCall::Hello => "hello",
            MethodCall::ListRoots => "list_roots",
            MethodCall::FindByName { .. } => "find_by_name",
            MethodCall::Inspect { .. } => "inspect",
            MethodCall::ListChildren { .. } => "list_children",
            MethodCall::SetProperty { .. } => "set_property",
            MethodCall::CallMethod { .. } => "call_method",
            MethodCall::Evaluate { .. } => "evaluate",
            MethodCall::SubscribeProperty { .. } => "subscribe_property",
            MethodCall::SubscribeSignal { .. } => "subscribe_signal",
            MethodCall::Unsubscribe { .. } => "unsubscribe",
            MethodCall::ModelInfo { .. } => "model_info",
            MethodCall::ModelFetch { .. } => "model_fetch",
        }
    }

    /// Build the `params` object, `None` for parameterless methods
    pub fn params(&self) -> Result<Option<Value>, ProtocolError> {
        let value = match self {
            MethodCall::Hello | MethodCall::ListRoots => return Ok(None),
            MethodCall::FindByName { name } => serde_json::json!({ "name": name }),
            MethodCall::Inspect { object_id }
            | MethodCall::ListChildren { object_id }
            | MethodCall::ModelInfo { object_id } => to_value(&ObjectParams { object_id })?,
            MethodCall::SetProperty {
                object_id,
                name,
                value,
            } => to_value(&SetPropertyParams {
                object_id,
                name,
                value,
            })?,
            MethodCall::CallMethod {
                object_id,
                name,
                args,
            } => to_value(&CallMethodParams {
                object_id,
                name,
                args,
            })?,
            MethodCall::Evaluate {
                object_id,
                expression,
            } => to_value(&EvaluateParams {
                object_id,
                expression,
            })?,
            MethodCall::SubscribeProperty { object_id, name } => {
                to_value(&SubscribePropertyParams { object_id, name })?
            }
            MethodCall::SubscribeSignal {
                object_id,
                signal,
                snapshot,
            } => to_value(&SubscribeSignalParams {
                object_id,
                signal,
                snapshot: snapshot.as_deref(),
            })?,
            MethodCall::Unsubscribe { subscription_id } => {
                to_value(&UnsubscribeParams { subscription_id })?
            }
            MethodCall::ModelFetch {
                object_id,
                start,
                count,
                roles,
            } => to_value(&ModelFetchParams {
                object_id,
                start: *start,
                count: *count,
                roles,
            })?,
        };
        Ok(Some(value))
    }

    /// Build the request frame for this call
    pub fn into_request(self, id: impl Into<String>) -> Result<Request, ProtocolError> {
        let params = self.params()?;
        Ok(Request::new(id, self.method_name(), params))
    }
}

fn to_value<T: Serialize>(params: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(params).map_err(ProtocolError::Serialization)
}

/// Result of `hello`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloInfo {
    pub protocol: String,
    pub version: String,
    /// Methods the bridge advertises
    pub capabilities: Vec<String>,
}

/// Reference to a remote object as returned by listing methods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub object_id: ObjectId,
    /// Meta-object class name
    #[serde(default, rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub object_name: String,
}

/// Result of `list_roots`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RootsResult {
    #[serde(default)]
    pub roots: Vec<ObjectRef>,
}

/// Result of `find_by_name`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchesResult {
    #[serde(default)]
    pub matches: Vec<ObjectRef>,
}

/// Result of `list_children`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChildrenResult {
    #[serde(default)]
    pub children: Vec<ObjectRef>,
}

/// Row count summary attached to `inspect` for model objects
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSummary {
    pub row_count: u64,
}

/// Result of `inspect`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectInfo {
    pub object_id: Option<ObjectId>,
    #[serde(rename = "type")]
    pub type_name: String,
    pub object_name: String,
    /// Readable property values
    pub properties: Map<String, Value>,
    /// Method signatures
    pub methods: Vec<String>,
    /// Signal signatures (`"ping()"`, `"message(QString)"`)
    pub signals: Vec<String>,
    pub children_count: u64,
    pub model: Option<ModelSummary>,
}

/// `{ok}` acknowledgment returned by mutating methods
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AckResult {
    #[serde(default)]
    pub ok: bool,
}

/// `{result}` returned by `call_method`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValueResult {
    #[serde(default)]
    pub result: Option<Value>,
}

/// Expression error reported inside an `evaluate` result
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct EvaluationError {
    pub message: String,
    pub line: Option<i64>,
}

/// Result of `evaluate`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EvaluationResult {
    pub result: Option<Value>,
    pub error: Option<EvaluationError>,
}

/// Result of `subscribe_property` and `subscribe_signal`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResult {
    pub subscription_id: SubscriptionId,
}

/// Result of `model_info`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelInfo {
    /// Role names in the model's declared order
    pub roles: Vec<String>,
    pub row_count: Option<u64>,
    pub column_count: Option<u64>,
}

/// One row of a multi-column model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableRow {
    pub row: u64,
    pub columns: Vec<Row>,
}

/// Result of `model_fetch`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelFetchResult {
    pub row_count: Option<u64>,
    pub column_count: Option<u64>,
    /// Rows of a single-column (list) model
    pub items: Option<Vec<Row>>,
    /// Rows of a multi-column (table) model
    pub rows: Option<Vec<TableRow>>,
}
