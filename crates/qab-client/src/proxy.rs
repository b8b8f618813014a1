//! Typed inspector API over a [`Session`]
//!
//! Each method builds the matching [`MethodCall`], sends it with the
//! client's call timeout and decodes the result record. Remote errors come
//! back unchanged inside [`ClientError::Session`].

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use qab_core::ClientConfig;
use qab_protocol::methods::{
    AckResult, ChildrenResult, EvaluationResult, HelloInfo, MatchesResult, ModelFetchResult,
    ModelInfo, ObjectInfo, ObjectRef, RootsResult, Row, SubscribeResult, TableRow, ValueResult,
};
use qab_protocol::{EventKind, MethodCall, ObjectId, SubscriptionId, PROTOCOL_NAME};

use crate::connector::connect_with_retry;
use crate::error::{ClientError, SessionError};
use crate::session::{EventStream, Session, SubscriptionTarget};

/// An active subscription and the stream of its events
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub object_id: ObjectId,
    /// Property or signal name as subscribed
    pub member: String,
    pub kind: EventKind,
    pub events: EventStream,
}

/// One page of model rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelPage {
    /// Index of the first row, after the bridge clamped it
    pub start: usize,
    /// Roles present in the page, requested order first
    pub roles: Vec<String>,
    /// Rows of a list model, one role map per row
    pub items: Vec<Row>,
    /// Rows of a table model, one role map per column
    pub table_rows: Vec<TableRow>,
    pub row_count: Option<u64>,
    pub column_count: Option<u64>,
}

impl ModelPage {
    fn from_result(start: usize, requested: &[String], result: ModelFetchResult) -> Self {
        let items = result.items.unwrap_or_default();
        let table_rows = result.rows.unwrap_or_default();

        let mut roles: Vec<String> = requested.to_vec();
        let cells = items
            .iter()
            .chain(table_rows.iter().flat_map(|row| row.columns.iter()));
        for cell in cells {
            for role in cell.keys() {
                if !roles.contains(role) {
                    roles.push(role.clone());
                }
            }
        }

        let start = match result.row_count {
            Some(rows) => start.min(rows as usize),
            None => start,
        };

        Self {
            start,
            roles,
            items,
            table_rows,
            row_count: result.row_count,
            column_count: result.column_count,
        }
    }

    /// Number of rows in the page
    pub fn len(&self) -> usize {
        self.items.len().max(self.table_rows.len())
    }

    /// Check if the page holds no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of `role` in the page's `index`-th list row
    pub fn value(&self, index: usize, role: &str) -> Option<&Value> {
        self.items.get(index).and_then(|row| row.get(role))
    }
}

/// Client for one bridge connection
#[derive(Debug, Clone)]
pub struct InspectorClient {
    session: Session,
    timeout: Duration,
}

impl InspectorClient {
    /// Connect to the bridge and verify it with `hello`
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let session = connect_with_retry(config).await?;
        let client = Self::from_session(session, config.call_timeout);

        let hello = match client.hello().await {
            Ok(hello) => hello,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };
        if hello.protocol != PROTOCOL_NAME {
            client.close().await;
            return Err(ClientError::Handshake {
                protocol: hello.protocol,
            });
        }

        tracing::info!(
            address = %config.address,
            version = %hello.version,
            capabilities = ?hello.capabilities,
            "Bridge handshake complete"
        );
        Ok(client)
    }

    /// Wrap an already running session
    pub fn from_session(session: Session, call_timeout: Duration) -> Self {
        Self {
            session,
            timeout: call_timeout,
        }
    }

    /// Same connection with another call timeout
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            session: self.session.clone(),
            timeout,
        }
    }

    /// Underlying session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Call timeout applied to every method
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Close the connection
    pub async fn close(&self) {
        self.session.close().await;
    }

    async fn call(&self, call: MethodCall) -> Result<Value, ClientError> {
        let id = self.session.next_request_id();
        let request = call.into_request(id).map_err(SessionError::from)?;
        Ok(self.session.send_request(request, self.timeout).await?)
    }

    async fn invoke<T: DeserializeOwned>(&self, call: MethodCall) -> Result<T, ClientError> {
        let method = call.method_name();
        let result = self.call(call).await?;
        decode(method, result)
    }

    /// Protocol identity and capabilities
    pub async fn hello(&self) -> Result<HelloInfo, ClientError> {
        self.invoke(MethodCall::Hello).await
    }

    /// Top-level objects of the application
    pub async fn list_roots(&self) -> Result<Vec<ObjectRef>, ClientError> {
        let result: RootsResult = self.invoke(MethodCall::ListRoots).await?;
        Ok(result.roots)
    }

    /// Every object whose `objectName` equals `name`
    pub async fn find_by_name(&self, name: &str) -> Result<Vec<ObjectRef>, ClientError> {
        let result: MatchesResult = self
            .invoke(MethodCall::FindByName {
                name: name.to_string(),
            })
            .await?;
        Ok(result.matches)
    }

    /// First object named `name`, if any
    pub async fn first_by_name(&self, name: &str) -> Result<Option<ObjectRef>, ClientError> {
        Ok(self.find_by_name(name).await?.into_iter().next())
    }

    /// Properties, methods, signals and model summary of an object
    pub async fn inspect(&self, object_id: &ObjectId) -> Result<ObjectInfo, ClientError> {
        self.invoke(MethodCall::Inspect {
            object_id: object_id.clone(),
        })
        .await
    }

    /// Direct children of an object
    pub async fn list_children(&self, object_id: &ObjectId) -> Result<Vec<ObjectRef>, ClientError> {
        let result: ChildrenResult = self
            .invoke(MethodCall::ListChildren {
                object_id: object_id.clone(),
            })
            .await?;
        Ok(result.children)
    }

    /// Write a property; returns the bridge's acknowledgement
    pub async fn set_property(
        &self,
        object_id: &ObjectId,
        name: &str,
        value: Value,
    ) -> Result<bool, ClientError> {
        let result: AckResult = self
            .invoke(MethodCall::SetProperty {
                object_id: object_id.clone(),
                name: name.to_string(),
                value,
            })
            .await?;
        Ok(result.ok)
    }

    /// Invoke a method; returns its return value, if it has one
    pub async fn call_method(
        &self,
        object_id: &ObjectId,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ClientError> {
        let result: ValueResult = self
            .invoke(MethodCall::CallMethod {
                object_id: object_id.clone(),
                name: name.to_string(),
                args,
            })
            .await?;
        Ok(result.result)
    }

    /// Evaluate a JavaScript expression in the object's context.
    ///
    /// An exception thrown by the expression is returned as
    /// [`ClientError::Evaluation`]; `undefined` comes back as `Null`.
    pub async fn evaluate(&self, object_id: &ObjectId, expression: &str) -> Result<Value, ClientError> {
        let result: EvaluationResult = self
            .invoke(MethodCall::Evaluate {
                object_id: object_id.clone(),
                expression: expression.to_string(),
            })
            .await?;
        match result.error {
            Some(error) => Err(ClientError::Evaluation {
                message: error.message,
                line: error.line,
            }),
            None => Ok(result.result.unwrap_or(Value::Null)),
        }
    }

    /// Subscribe to changes of a property
    pub async fn subscribe_property(
        &self,
        object_id: &ObjectId,
        name: &str,
    ) -> Result<Subscription, ClientError> {
        let call = MethodCall::SubscribeProperty {
            object_id: object_id.clone(),
            name: name.to_string(),
        };
        self.subscribe(call, SubscriptionTarget::property(object_id.clone(), name))
            .await
    }

    /// Subscribe to a signal.
    ///
    /// `snapshot` names properties the bridge captures with every emission;
    /// pass an empty slice for none.
    pub async fn subscribe_signal(
        &self,
        object_id: &ObjectId,
        signal: &str,
        snapshot: &[&str],
    ) -> Result<Subscription, ClientError> {
        let snapshot = if snapshot.is_empty() {
            None
        } else {
            Some(snapshot.iter().map(|s| s.to_string()).collect())
        };
        let call = MethodCall::SubscribeSignal {
            object_id: object_id.clone(),
            signal: signal.to_string(),
            snapshot,
        };
        self.subscribe(call, SubscriptionTarget::signal(object_id.clone(), signal))
            .await
    }

    async fn subscribe(
        &self,
        call: MethodCall,
        target: SubscriptionTarget,
    ) -> Result<Subscription, ClientError> {
        let method = call.method_name();
        let request = call
            .into_request(self.session.next_request_id())
            .map_err(SessionError::from)?;

        let (result, events) = self
            .session
            .subscribe(request, target.clone(), self.timeout)
            .await?;
        let SubscribeResult { subscription_id } = decode(method, result)?;

        tracing::debug!(
            subscription_id = %subscription_id,
            object_id = %target.object_id,
            member = %target.member,
            "Subscribed"
        );
        Ok(Subscription {
            id: subscription_id,
            object_id: target.object_id,
            member: target.member,
            kind: target.kind,
            events,
        })
    }

    /// Cancel a subscription.
    ///
    /// Local routing stops first, so no event for `id` is delivered after
    /// this is called even if the bridge then rejects it. Unsubscribing an
    /// id the bridge no longer knows fails with its `not_found` error and
    /// leaves the session usable.
    pub async fn unsubscribe(&self, subscription_id: &SubscriptionId) -> Result<bool, ClientError> {
        self.session.untrack(subscription_id);
        let result: AckResult = self
            .invoke(MethodCall::Unsubscribe {
                subscription_id: subscription_id.clone(),
            })
            .await?;
        Ok(result.ok)
    }

    /// Roles and dimensions of a model
    pub async fn model_info(&self, object_id: &ObjectId) -> Result<ModelInfo, ClientError> {
        self.invoke(MethodCall::ModelInfo {
            object_id: object_id.clone(),
        })
        .await
    }

    /// Fetch up to `count` rows starting at `start`.
    ///
    /// An empty `roles` fetches every role.
    pub async fn model_fetch(
        &self,
        object_id: &ObjectId,
        start: usize,
        count: usize,
        roles: &[&str],
    ) -> Result<ModelPage, ClientError> {
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        let result: ModelFetchResult = self
            .invoke(MethodCall::ModelFetch {
                object_id: object_id.clone(),
                start,
                count,
                roles: roles.clone(),
            })
            .await?;
        Ok(ModelPage::from_result(start, &roles, result))
    }
}

fn decode<T: DeserializeOwned>(method: &'static str, result: Value) -> Result<T, ClientError> {
    serde_json::from_value(result).map_err(|source| ClientError::UnexpectedResult { method, source })
}
