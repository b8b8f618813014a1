//! Registry of in-flight requests awaiting their response

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use qab_protocol::Response;

use crate::error::SessionError;

/// Action run on the reader task when a call succeeds, before the caller
/// is woken and before the next inbound frame is dispatched.
pub(crate) type ResultHook = Box<dyn FnOnce(&Value) + Send + Sync>;

type Completion = oneshot::Sender<Result<Value, SessionError>>;

struct PendingCall {
    /// Distinguishes this registration from later ones reusing the id
    token: u64,
    method: String,
    reply: Completion,
    on_success: Option<ResultHook>,
}

/// In-flight calls keyed by request id
pub struct PendingCalls {
    calls: DashMap<String, PendingCall>,
    closed: AtomicBool,
    next_token: AtomicU64,
}

impl PendingCalls {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
            closed: AtomicBool::new(false),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register a call that must be answered before `deadline`.
    ///
    /// Fails with `DuplicateId` if `id` is already outstanding and with
    /// `ConnectionClosed` once [`fail_all`](Self::fail_all) has run.
    pub(crate) fn register(
        self: &Arc<Self>,
        id: &str,
        method: &str,
        deadline: Instant,
        timeout: Duration,
        on_success: Option<ResultHook>,
    ) -> Result<PendingReply, SessionError> {
        if self.is_closed() {
            return Err(SessionError::ConnectionClosed);
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();

        match self.calls.entry(id.to_string()) {
            Entry::Occupied(_) => return Err(SessionError::DuplicateId(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(PendingCall {
                    token,
                    method: method.to_string(),
                    reply,
                    on_success,
                });
            }
        }

        // fail_all may have drained the map between the check above and the insert
        if self.is_closed() {
            self.remove(id, token);
            return Err(SessionError::ConnectionClosed);
        }

        tracing::trace!(id, method, "Registered pending call");

        Ok(PendingReply {
            id: id.to_string(),
            method: method.to_string(),
            token,
            deadline,
            timeout,
            rx,
            registry: Arc::clone(self),
        })
    }

    /// Resolve the call matching `response.id`.
    ///
    /// Returns `false` if no call is waiting for that id (already timed out,
    /// cancelled, or never sent); the response is then discarded.
    pub fn complete(&self, response: Response) -> bool {
        let Some((id, call)) = self.calls.remove(&response.id) else {
            tracing::warn!(id = %response.id, "Discarding response with no pending call");
            return false;
        };

        let outcome = match response.into_result() {
            Ok(result) => {
                if let Some(hook) = call.on_success {
                    hook(&result);
                }
                Ok(result)
            }
            Err(error) => Err(SessionError::Remote {
                method: call.method,
                error,
            }),
        };

        if call.reply.send(outcome).is_err() {
            tracing::debug!(id = %id, "Caller stopped waiting before the response arrived");
        }
        true
    }

    /// Fail every outstanding call with `ConnectionClosed` and refuse new ones.
    ///
    /// Returns the number of calls failed.
    pub fn fail_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let ids: Vec<String> = self.calls.iter().map(|entry| entry.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, call)) = self.calls.remove(&id) {
                let _ = call.reply.send(Err(SessionError::ConnectionClosed));
                failed += 1;
            }
        }
        failed
    }

    /// Remove the registration for `id` if it is still the one identified by `token`
    fn remove(&self, id: &str, token: u64) -> bool {
        self.calls
            .remove_if(id, |_, call| call.token == token)
            .is_some()
    }

    /// Whether `fail_all` has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of outstanding calls
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Check if no call is outstanding
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller's side of a registered call.
///
/// Dropping it before the response arrives unregisters the call, so a
/// cancelled caller leaves nothing behind.
pub(crate) struct PendingReply {
    id: String,
    method: String,
    token: u64,
    deadline: Instant,
    timeout: Duration,
    rx: oneshot::Receiver<Result<Value, SessionError>>,
    registry: Arc<PendingCalls>,
}

impl PendingReply {
    /// Wait for the response or the deadline, whichever comes first
    pub(crate) async fn wait(mut self) -> Result<Value, SessionError> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            // Completion dropped unsent: the registry itself went away
            Ok(Err(_)) => Err(SessionError::ConnectionClosed),
            Err(_) => {
                if !self.registry.remove(&self.id, self.token) {
                    // Resolved between the deadline firing and the removal
                    if let Ok(outcome) = self.rx.try_recv() {
                        return outcome;
                    }
                }
                tracing::debug!(id = %self.id, method = %self.method, "Call timed out");
                Err(SessionError::Timeout {
                    context: format!("response to {} (id {})", self.method, self.id),
                    after: self.timeout,
                })
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.registry.remove(&self.id, self.token);
    }
}
