//! Shared fixtures for integration tests
//!
//! `ScriptedBridge` is the far end of a session driven step by step by the
//! test. `FakeApp` answers requests like a bridge embedded in a small QML
//! application and pushes the events its subscriptions produce.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

use qab_client::transport::{lines, websocket, FrameSink, FrameStream};
use qab_client::{InspectorClient, Session, SessionOptions};

/// Call timeout used by fixtures
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a test waits for something that should happen promptly
pub const STEP: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Session whose peer is a test-controlled [`ScriptedBridge`]
pub fn scripted_session() -> (Session, ScriptedBridge) {
    init_tracing();
    let (client_io, bridge_io) = tokio::io::duplex(1 << 20);
    let (sink, stream) = lines::framed(client_io);
    let session = Session::start(sink, stream, SessionOptions::default());
    let (sink, stream) = lines::framed(bridge_io);
    (session, ScriptedBridge { sink, stream })
}

/// Bridge side of a session, driven frame by frame
pub struct ScriptedBridge {
    sink: FrameSink,
    stream: FrameStream,
}

impl ScriptedBridge {
    /// Wait for the next request frame
    pub async fn next_request(&mut self) -> Value {
        let line = tokio::time::timeout(STEP, self.stream.next())
            .await
            .expect("No request before timeout")
            .expect("Client closed the connection")
            .expect("Read failed");
        serde_json::from_str(&line).expect("Request is not JSON")
    }

    /// Next frame if one arrives within `within`; `None` on silence or EOF
    pub async fn next_frame_within(&mut self, within: Duration) -> Option<String> {
        match tokio::time::timeout(within, self.stream.next()).await {
            Ok(Some(Ok(line))) => Some(line),
            _ => None,
        }
    }

    /// Send a raw text frame
    pub async fn send_raw(&mut self, text: &str) {
        self.sink
            .send(text.to_string())
            .await
            .expect("Failed to send frame");
    }

    /// Answer `request` with a result
    pub async fn reply(&mut self, request: &Value, result: Value) {
        let frame = json!({"id": request["id"], "result": result});
        self.send_raw(&frame.to_string()).await;
    }

    /// Answer `request` with an error object
    pub async fn reply_error(&mut self, request: &Value, code: &str, message: &str) {
        let frame = json!({"id": request["id"], "error": {"code": code, "message": message}});
        self.send_raw(&frame.to_string()).await;
    }

    /// Push an event
    pub async fn send_event(&mut self, params: Value) {
        let frame = json!({"method": "event", "params": params});
        self.send_raw(&frame.to_string()).await;
    }

    /// Close the connection
    pub async fn hang_up(mut self) {
        let _ = self.sink.close().await;
    }
}

/// Client connected in-process to a [`FakeApp`]
pub fn start_app(app: FakeApp) -> InspectorClient {
    init_tracing();
    let (client_io, app_io) = tokio::io::duplex(1 << 20);
    let (sink, stream) = lines::framed(app_io);
    tokio::spawn(serve(app, sink, stream));
    let (sink, stream) = lines::framed(client_io);
    InspectorClient::from_session(
        Session::start(sink, stream, SessionOptions::default()),
        CALL_TIMEOUT,
    )
}

/// Serve a fresh [`FakeApp`] per connection on a line-delimited TCP listener
pub async fn spawn_tcp_bridge() -> SocketAddr {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let (sink, stream) = lines::framed(stream);
            tokio::spawn(serve(FakeApp::new(), sink, stream));
        }
    });
    addr
}

/// Serve a fresh [`FakeApp`] per connection on a WebSocket listener
pub async fn spawn_ws_bridge() -> SocketAddr {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    let (sink, stream) = websocket::split(ws);
                    serve(FakeApp::new(), sink, stream).await;
                }
            });
        }
    });
    addr
}

/// Answer every request on the connection until it closes
pub async fn serve(mut app: FakeApp, mut sink: FrameSink, mut stream: FrameStream) {
    while let Some(Ok(line)) = stream.next().await {
        for frame in app.handle_frame(&line) {
            if sink.send(frame).await.is_err() {
                return;
            }
        }
    }
}

struct FakeModel {
    roles: Vec<String>,
    /// Rows of column cells; list models have one column
    rows: Vec<Vec<Map<String, Value>>>,
}

struct FakeObject {
    type_name: &'static str,
    object_name: &'static str,
    properties: Map<String, Value>,
    methods: Vec<&'static str>,
    signals: Vec<&'static str>,
    children: Vec<String>,
    model: Option<FakeModel>,
}

enum Watch {
    Property(String),
    Signal(String),
}

struct FakeSubscription {
    object_id: String,
    watch: Watch,
    snapshot: Vec<String>,
}

type Failure = (&'static str, String);

/// Bridge embedded in a small QML application
pub struct FakeApp {
    objects: BTreeMap<String, FakeObject>,
    subscriptions: BTreeMap<u64, FakeSubscription>,
    next_subscription: u64,
    /// Leave `subscriptionId` out of pushed events
    anonymous_events: bool,
}

fn props(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn signal_base(signal: &str) -> &str {
    signal.split('(').next().unwrap_or(signal)
}

impl FakeApp {
    /// Window with a button, a checkbox, a text field, a fruit list model,
    /// a custom emitter and a two-column table model
    pub fn new() -> Self {
        let mut objects = BTreeMap::new();
        let child_ids: Vec<String> = (2..=7).map(|n| format!("qobj:{:x}", n)).collect();

        objects.insert(
            "qobj:1".to_string(),
            FakeObject {
                type_name: "QQuickApplicationWindow",
                object_name: "mainWindow",
                properties: props(json!({"title": "Fixture", "visible": true})),
                methods: vec![],
                signals: vec!["closing()"],
                children: child_ids,
                model: None,
            },
        );
        objects.insert(
            "qobj:2".to_string(),
            FakeObject {
                type_name: "QQuickButton",
                object_name: "helloButton",
                properties: props(json!({"text": "Hello"})),
                methods: vec!["click()"],
                signals: vec!["clicked()", "textChanged()"],
                children: vec![],
                model: None,
            },
        );
        objects.insert(
            "qobj:3".to_string(),
            FakeObject {
                type_name: "QQuickCheckBox",
                object_name: "toggleBox",
                properties: props(json!({"checked": true, "text": "Toggle"})),
                methods: vec!["toggle()"],
                signals: vec!["checkedChanged()", "toggled()", "textChanged()"],
                children: vec![],
                model: None,
            },
        );
        objects.insert(
            "qobj:4".to_string(),
            FakeObject {
                type_name: "QQuickTextField",
                object_name: "nameField",
                properties: props(json!({"text": ""})),
                methods: vec![],
                signals: vec!["textChanged()", "accepted()"],
                children: vec![],
                model: None,
            },
        );
        let fruits = [
            ("Apple", "red"),
            ("Banana", "yellow"),
            ("Cherry", "red"),
            ("Grape", "purple"),
            ("Orange", "orange"),
        ];
        objects.insert(
            "qobj:5".to_string(),
            FakeObject {
                type_name: "QQmlListModel",
                object_name: "fruitsModel",
                properties: props(json!({"count": fruits.len()})),
                methods: vec!["get(int)"],
                signals: vec!["countChanged()"],
                children: vec![],
                model: Some(FakeModel {
                    roles: vec!["name".into(), "color".into()],
                    rows: fruits
                        .iter()
                        .map(|(name, color)| vec![props(json!({"name": name, "color": color}))])
                        .collect(),
                }),
            },
        );
        objects.insert(
            "qobj:6".to_string(),
            FakeObject {
                type_name: "CustomEmitter",
                object_name: "customEmitter",
                properties: props(json!({"count": 0})),
                methods: vec!["ping()", "add(int,int)"],
                signals: vec!["ping()", "countChanged()"],
                children: vec![],
                model: None,
            },
        );
        objects.insert(
            "qobj:7".to_string(),
            FakeObject {
                type_name: "TableModel",
                object_name: "scoreTable",
                properties: props(json!({})),
                methods: vec![],
                signals: vec![],
                children: vec![],
                model: Some(FakeModel {
                    roles: vec!["display".into()],
                    rows: vec![
                        vec![props(json!({"display": "alice"})), props(json!({"display": 12}))],
                        vec![props(json!({"display": "bob"})), props(json!({"display": 7}))],
                    ],
                }),
            },
        );

        Self {
            objects,
            subscriptions: BTreeMap::new(),
            next_subscription: 1,
            anonymous_events: false,
        }
    }

    /// Push events without `subscriptionId`, forcing member-based routing
    pub fn with_anonymous_events(mut self) -> Self {
        self.anonymous_events = true;
        self
    }

    /// Events first, then the response, as the bridge emits change
    /// notifications synchronously while handling the request
    pub fn handle_frame(&mut self, line: &str) -> Vec<String> {
        let request: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                return vec![
                    json!({"error": {"code": "bad_request", "message": "Invalid JSON"}}).to_string(),
                ]
            }
        };
        let id = request["id"].clone();
        let method = request["method"].as_str().unwrap_or_default().to_string();
        let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

        let mut events = Vec::new();
        let outcome = self.handle(&method, &params, &mut events);

        let mut frames: Vec<String> = events
            .into_iter()
            .map(|params| json!({"method": "event", "params": params}).to_string())
            .collect();
        let mut response = match outcome {
            Ok(result) => json!({"result": result}),
            Err((code, message)) => json!({"error": {"code": code, "message": message}}),
        };
        if let Some(id) = id.as_str().filter(|id| !id.is_empty()) {
            response["id"] = json!(id);
        }
        frames.push(response.to_string());
        frames
    }

    fn object(&self, params: &Value) -> Result<(&String, &FakeObject), Failure> {
        let id = params["objectId"].as_str().unwrap_or_default();
        self.objects
            .get_key_value(id)
            .ok_or_else(|| ("not_found", "Object not found".to_string()))
    }

    fn object_ref(&self, id: &str) -> Value {
        let object = &self.objects[id];
        json!({"objectId": id, "type": object.type_name, "objectName": object.object_name})
    }

    fn handle(
        &mut self,
        method: &str,
        params: &Value,
        events: &mut Vec<Value>,
    ) -> Result<Value, Failure> {
        match method {
            "hello" => Ok(json!({
                "protocol": "qml-agent-bridge",
                "version": "0.2",
                "capabilities": [
                    "list_roots", "find_by_name", "inspect", "list_children", "set_property",
                    "call_method", "evaluate", "subscribe_property", "subscribe_signal",
                    "unsubscribe", "model_info", "model_fetch"
                ],
            })),
            "list_roots" => Ok(json!({"roots": [self.object_ref("qobj:1")]})),
            "find_by_name" => {
                let name = params["name"].as_str().unwrap_or_default();
                let matches: Vec<Value> = self
                    .objects
                    .iter()
                    .filter(|(_, object)| object.object_name == name)
                    .map(|(id, _)| self.object_ref(id))
                    .collect();
                Ok(json!({"matches": matches}))
            }
            "inspect" => {
                let (id, object) = self.object(params)?;
                let mut info = json!({
                    "objectId": id,
                    "type": object.type_name,
                    "objectName": object.object_name,
                    "properties": object.properties,
                    "methods": object.methods,
                    "signals": object.signals,
                    "childrenCount": object.children.len(),
                });
                if let Some(model) = &object.model {
                    info["model"] = json!({"rowCount": model.rows.len()});
                }
                Ok(info)
            }
            "list_children" => {
                let (_, object) = self.object(params)?;
                let children: Vec<Value> =
                    object.children.iter().map(|id| self.object_ref(id)).collect();
                Ok(json!({"children": children}))
            }
            "set_property" => {
                let (id, _) = self.object(params)?;
                let id = id.clone();
                let name = params["name"].as_str().unwrap_or_default().to_string();
                self.set_property(&id, &name, params["value"].clone(), events);
                Ok(json!({"ok": true}))
            }
            "call_method" => self.call_method(params, events),
            "evaluate" => {
                let (_, object) = self.object(params)?;
                let expression = params["expression"].as_str().unwrap_or_default();
                Ok(match expression {
                    "1 + 2" => json!({"result": 3}),
                    "objectName" => json!({"result": object.object_name}),
                    "undefined" => json!({}),
                    _ => json!({"error": {"message": format!("ReferenceError: {} is not defined", expression), "line": 1}}),
                })
            }
            "subscribe_property" => {
                let (id, object) = self.object(params)?;
                let name = params["name"].as_str().unwrap_or_default().to_string();
                if !object.properties.contains_key(&name) {
                    return Err(("failed", format!("No property {}", name)));
                }
                let id = id.clone();
                Ok(self.add_subscription(id, Watch::Property(name), Vec::new()))
            }
            "subscribe_signal" => {
                let (id, object) = self.object(params)?;
                let signal = params["signal"].as_str().unwrap_or_default().to_string();
                let known = object
                    .signals
                    .iter()
                    .any(|s| signal_base(s) == signal_base(&signal));
                if !known {
                    return Err(("failed", format!("No signal {}", signal)));
                }
                let snapshot = params["snapshot"]
                    .as_array()
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(|n| n.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let id = id.clone();
                Ok(self.add_subscription(id, Watch::Signal(signal), snapshot))
            }
            "unsubscribe" => {
                let sid = params["subscriptionId"].as_str().unwrap_or_default();
                let removed = sid
                    .strip_prefix("sub:")
                    .and_then(|n| n.parse::<u64>().ok())
                    .and_then(|n| self.subscriptions.remove(&n));
                match removed {
                    Some(_) => Ok(json!({"ok": true})),
                    None => Err(("not_found", "Subscription not found".to_string())),
                }
            }
            "model_info" => {
                let (_, object) = self.object(params)?;
                let model = object
                    .model
                    .as_ref()
                    .ok_or_else(|| ("bad_request", "Object is not a model".to_string()))?;
                Ok(json!({
                    "rowCount": model.rows.len(),
                    "columnCount": model.rows.first().map_or(1, Vec::len),
                    "roles": model.roles,
                }))
            }
            "model_fetch" => {
                let (_, object) = self.object(params)?;
                let model = object
                    .model
                    .as_ref()
                    .ok_or_else(|| ("bad_request", "Object is not a model".to_string()))?;
                Ok(fetch(model, params))
            }
            other => Err(("not_implemented", format!("Unknown method: {}", other))),
        }
    }

    fn add_subscription(&mut self, object_id: String, watch: Watch, snapshot: Vec<String>) -> Value {
        let n = self.next_subscription;
        self.next_subscription += 1;
        self.subscriptions.insert(
            n,
            FakeSubscription {
                object_id,
                watch,
                snapshot,
            },
        );
        json!({"subscriptionId": format!("sub:{}", n)})
    }

    fn call_method(&mut self, params: &Value, events: &mut Vec<Value>) -> Result<Value, Failure> {
        let (id, _) = self.object(params)?;
        let id = id.clone();
        let name = params["name"].as_str().unwrap_or_default();
        let args = params["args"].as_array().cloned().unwrap_or_default();

        let result = match (self.objects[&id].object_name, name) {
            ("toggleBox", "toggle") => {
                let checked = self.objects[&id].properties["checked"].as_bool().unwrap_or(false);
                self.set_property(&id, "checked", json!(!checked), events);
                self.emit_signal(&id, "toggled", events);
                Value::Null
            }
            ("helloButton", "click") => {
                self.emit_signal(&id, "clicked", events);
                Value::Null
            }
            ("customEmitter", "ping") => {
                self.emit_signal(&id, "ping", events);
                let count = self.objects[&id].properties["count"].as_i64().unwrap_or(0);
                self.set_property(&id, "count", json!(count + 1), events);
                Value::Null
            }
            ("customEmitter", "add") => {
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                json!(sum)
            }
            _ => return Err(("failed", format!("Cannot invoke {}", name))),
        };
        Ok(json!({"ok": true, "result": result}))
    }

    fn set_property(&mut self, id: &str, name: &str, value: Value, events: &mut Vec<Value>) {
        let Some(object) = self.objects.get_mut(id) else {
            return;
        };
        if object.properties.get(name) == Some(&value) {
            return;
        }
        object.properties.insert(name.to_string(), value.clone());

        for (n, sub) in &self.subscriptions {
            if sub.object_id != id {
                continue;
            }
            if let Watch::Property(watched) = &sub.watch {
                if watched == name {
                    let mut event = json!({
                        "objectId": id,
                        "kind": "property",
                        "name": name,
                        "value": value,
                    });
                    self.tag(&mut event, *n);
                    events.push(event);
                }
            }
        }
        self.emit_signal(id, &format!("{}Changed", name), events);
    }

    fn emit_signal(&self, id: &str, base: &str, events: &mut Vec<Value>) {
        for (n, sub) in &self.subscriptions {
            if sub.object_id != id {
                continue;
            }
            let Watch::Signal(signal) = &sub.watch else {
                continue;
            };
            if signal_base(signal) != base {
                continue;
            }
            let mut event = json!({
                "objectId": id,
                "kind": "signal",
                "name": format!("{}()", base),
                "args": [],
            });
            if !sub.snapshot.is_empty() {
                let properties = &self.objects[id].properties;
                let snapshot: Map<String, Value> = sub
                    .snapshot
                    .iter()
                    .map(|p| (p.clone(), properties.get(p).cloned().unwrap_or(Value::Null)))
                    .collect();
                event["snapshot"] = Value::Object(snapshot);
            }
            self.tag(&mut event, *n);
            events.push(event);
        }
    }

    fn tag(&self, event: &mut Value, n: u64) {
        if !self.anonymous_events {
            event["subscriptionId"] = json!(format!("sub:{}", n));
        }
    }
}

fn fetch(model: &FakeModel, params: &Value) -> Value {
    let row_count = model.rows.len();
    let column_count = model.rows.first().map_or(1, Vec::len);
    let start = (params["start"].as_u64().unwrap_or(0) as usize).min(row_count);
    let count = params["count"].as_u64().unwrap_or(20) as usize;
    let end = (start + count).min(row_count);
    let roles: Vec<String> = params["roles"]
        .as_array()
        .map(|r| r.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_else(|| model.roles.clone());

    let project = |cell: &Map<String, Value>| -> Value {
        let projected: Map<String, Value> = roles
            .iter()
            .filter_map(|role| cell.get(role).map(|v| (role.clone(), v.clone())))
            .collect();
        Value::Object(projected)
    };

    let mut result = json!({"rowCount": row_count, "columnCount": column_count});
    if column_count <= 1 {
        let items: Vec<Value> = model.rows[start..end].iter().map(|row| project(&row[0])).collect();
        result["items"] = json!(items);
    } else {
        let rows: Vec<Value> = (start..end)
            .map(|r| json!({"row": r, "columns": model.rows[r].iter().map(&project).collect::<Vec<_>>()}))
            .collect();
        result["rows"] = json!(rows);
    }
    result
}
