//! Multiplexed RPC session over one bridge connection
//!
//! A [`Session`] owns the write half of the transport behind an async mutex,
//! so concurrent callers serialize whole frames. A single reader task owns
//! the read half and dispatches every inbound frame in arrival order:
//! responses resolve the matching pending call, events go through the
//! subscription registry. When the stream ends or fails, every pending call
//! fails with `ConnectionClosed` and every event stream ends.

mod events;
mod pending;
mod subscriptions;

pub use events::EventStream;
pub use pending::PendingCalls;
pub use subscriptions::{SubscriptionRegistry, SubscriptionTarget};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use qab_core::ClientConfig;
use qab_protocol::{decode_inbound, encode_request, InboundFrame, Request, SubscriptionId};

use crate::error::SessionError;
use crate::transport::{FrameSink, FrameStream};
use pending::ResultHook;

/// Hand-off between the reader-side subscribe hook and the waiting caller
#[derive(Default)]
struct ClaimSlot {
    tracked: Option<SubscriptionId>,
    abandoned: bool,
}

/// Untracks a subscription whose subscribe call never returned its stream
struct SubscribeClaim {
    slot: Arc<Mutex<ClaimSlot>>,
    registry: Arc<SubscriptionRegistry>,
    kept: bool,
}

impl SubscribeClaim {
    fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(ClaimSlot::default())),
            registry,
            kept: false,
        }
    }

    fn keep(&mut self) {
        self.kept = true;
    }
}

impl Drop for SubscribeClaim {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.abandoned = true;
        if let Some(id) = slot.tracked.take() {
            self.registry.untrack(&id);
            tracing::debug!(subscription_id = %id, "Dropped subscription of an abandoned subscribe");
        }
    }
}

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Prefix of generated request ids
    pub request_id_prefix: String,
    /// Upper bound on flushing and closing the transport in [`Session::close`]
    pub close_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            request_id_prefix: config.request_id_prefix.clone(),
            close_timeout: config.close_timeout,
        }
    }
}

struct Shared {
    writer: tokio::sync::Mutex<FrameSink>,
    pending: Arc<PendingCalls>,
    subscriptions: Arc<SubscriptionRegistry>,
    shutdown: CancellationToken,
    close_started: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    options: SessionOptions,
}

impl Shared {
    /// Stop the reader and fail everything still outstanding
    fn shut_down(&self) {
        self.shutdown.cancel();
        let failed = self.pending.fail_all();
        let dropped = self.subscriptions.close();
        if failed > 0 || dropped > 0 {
            tracing::debug!(
                failed_calls = failed,
                subscriptions = dropped,
                "Session routing closed"
            );
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Handle to a running session.
///
/// Cloning is cheap; all clones share the same connection. The connection is
/// torn down by [`close`](Self::close), by the bridge closing it, or when the
/// last handle is dropped.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Start a session over an open transport.
    ///
    /// Spawns the reader task, so this must run inside a Tokio runtime.
    pub fn start(sink: FrameSink, stream: FrameStream, options: SessionOptions) -> Self {
        let pending = Arc::new(PendingCalls::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let shutdown = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            stream,
            Arc::clone(&pending),
            Arc::clone(&subscriptions),
            shutdown.clone(),
        ));

        Self {
            shared: Arc::new(Shared {
                writer: tokio::sync::Mutex::new(sink),
                pending,
                subscriptions,
                shutdown,
                close_started: AtomicBool::new(false),
                reader: Mutex::new(Some(reader)),
                next_id: AtomicU64::new(1),
                options,
            }),
        }
    }

    /// Allocate a fresh request id (`"{prefix}-{n}"`)
    pub fn next_request_id(&self) -> String {
        let n = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.shared.options.request_id_prefix, n)
    }

    /// Send `method` with a generated id and wait for its result
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let id = self.next_request_id();
        self.call_with_id(id, method, params, timeout).await
    }

    /// Send `method` under a caller-chosen id and wait for its result.
    ///
    /// Fails with `DuplicateId` if that id is still outstanding.
    pub async fn call_with_id(
        &self,
        id: impl Into<String>,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        self.send_request(Request::new(id, method, params), timeout)
            .await
    }

    /// Send a prepared request and wait for its result
    pub async fn send_request(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        self.dispatch(request, timeout, None).await
    }

    /// Send a subscribe request and start routing its events.
    ///
    /// The subscription is tracked on the reader task as soon as the success
    /// response is decoded, so events the bridge pushes right after the
    /// response land on the returned stream. If this future is dropped or
    /// fails after that point, the subscription is untracked again and its
    /// later events go to the unrouted listeners.
    pub async fn subscribe(
        &self,
        request: Request,
        target: SubscriptionTarget,
        timeout: Duration,
    ) -> Result<(Value, EventStream), SessionError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut claim = SubscribeClaim::new(Arc::clone(&self.shared.subscriptions));
        let slot = Arc::clone(&claim.slot);
        let registry = Arc::clone(&self.shared.subscriptions);

        let track: ResultHook = Box::new(move |result: &Value| {
            let Some(id) = result.get("subscriptionId").and_then(Value::as_str) else {
                tracing::warn!("Subscribe result carries no subscriptionId");
                return;
            };
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.abandoned {
                tracing::debug!(subscription_id = id, "Subscriber gone, not tracking");
                return;
            }
            let id = SubscriptionId::from(id);
            match registry.track(id.clone(), target, Some(tx)) {
                Ok(()) => slot.tracked = Some(id),
                Err(e) => {
                    tracing::debug!(subscription_id = %id, error = %e, "Subscription not tracked")
                }
            }
        });

        let result = self.dispatch(request, timeout, Some(track)).await?;
        claim.keep();
        Ok((result, EventStream::new(rx)))
    }

    /// Stop routing events for `id` locally; its streams end.
    ///
    /// Does not contact the bridge. Returns `false` if `id` was not tracked.
    pub fn untrack(&self, id: &SubscriptionId) -> bool {
        self.shared.subscriptions.untrack(id)
    }

    /// Open an event stream.
    ///
    /// With `Some(id)` the stream receives that subscription's events; with
    /// `None` it receives events no tracked subscription matched.
    pub fn events(&self, filter: Option<&SubscriptionId>) -> Result<EventStream, SessionError> {
        self.shared.subscriptions.listen(filter)
    }

    async fn dispatch(
        &self,
        request: Request,
        timeout: Duration,
        on_success: Option<ResultHook>,
    ) -> Result<Value, SessionError> {
        if self.is_closed() {
            return Err(SessionError::ConnectionClosed);
        }

        let deadline = Instant::now() + timeout;
        let frame = encode_request(&request)?;
        let reply =
            self.shared
                .pending
                .register(&request.id, &request.method, deadline, timeout, on_success)?;

        match tokio::time::timeout_at(deadline, self.write_frame(frame)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SessionError::Timeout {
                    context: format!("sending {} (id {})", request.method, request.id),
                    after: timeout,
                })
            }
        }
        tracing::debug!(id = %request.id, method = %request.method, "Request sent");

        reply.wait().await
    }

    async fn write_frame(&self, frame: String) -> Result<(), SessionError> {
        let mut writer = self.shared.writer.lock().await;
        if self.is_closed() {
            return Err(SessionError::ConnectionClosed);
        }
        if let Err(e) = writer.send(frame).await {
            drop(writer);
            tracing::warn!(error = %e, "Connection write failed");
            self.shared.shut_down();
            return Err(SessionError::Transport(e));
        }
        Ok(())
    }

    /// Close the session.
    ///
    /// Pending calls fail with `ConnectionClosed`, event streams end and the
    /// reader stops. The transport is closed within the configured close
    /// timeout. Calling this again has no further effect.
    pub async fn close(&self) {
        if self.shared.close_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Closing session");
        self.shared.shut_down();

        let close_timeout = self.shared.options.close_timeout;
        let reader = self
            .shared
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut reader) = reader {
            if tokio::time::timeout(close_timeout, &mut reader).await.is_err() {
                tracing::warn!("Reader did not stop in time, aborting");
                reader.abort();
            }
        }

        let flushed = tokio::time::timeout(close_timeout, async {
            let mut writer = self.shared.writer.lock().await;
            writer.close().await
        })
        .await;
        match flushed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Transport close failed"),
            Err(_) => tracing::warn!(timeout = ?close_timeout, "Transport close timed out"),
        }
    }

    /// Whether the session no longer accepts calls
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Number of calls still awaiting a response
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    /// Number of tracked subscriptions
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.len()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("closed", &self.is_closed())
            .field("pending_calls", &self.pending_calls())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

async fn read_loop(
    mut stream: FrameStream,
    pending: Arc<PendingCalls>,
    subscriptions: Arc<SubscriptionRegistry>,
    shutdown: CancellationToken,
) {
    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break "closed locally",
            next = stream.next() => next,
        };

        match next {
            Some(Ok(text)) => dispatch_frame(&text, &pending, &subscriptions),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Connection read failed");
                break "read error";
            }
            None => break "closed by peer",
        }
    };

    shutdown.cancel();
    let failed = pending.fail_all();
    let dropped = subscriptions.close();
    tracing::info!(
        reason,
        failed_calls = failed,
        subscriptions = dropped,
        "Session reader stopped"
    );
}

fn dispatch_frame(text: &str, pending: &PendingCalls, subscriptions: &SubscriptionRegistry) {
    if text.trim().is_empty() {
        return;
    }
    match decode_inbound(text) {
        Ok(InboundFrame::Response(response)) => {
            tracing::trace!(id = %response.id, "Response received");
            pending.complete(response);
        }
        Ok(InboundFrame::Event(event)) => {
            let routed = subscriptions.route(event);
            tracing::trace!(routed, "Event received");
        }
        Err(e) => tracing::warn!(error = %e, "Discarding malformed frame"),
    }
}
