//! Consumer side of event delivery

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;

use qab_protocol::Event;

use crate::error::SessionError;

/// Queue of events delivered to one listener.
///
/// Events arrive in the order the reader decoded them. The stream ends once
/// the subscription is untracked or the session's routing closes.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { rx }
    }

    /// Wait for the next event; `None` once the stream has ended
    pub async fn next_event(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Wait at most `timeout` for the next event.
    ///
    /// Returns `Ok(None)` if the stream ended and `Timeout` if nothing arrived.
    pub async fn next_event_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Event>, SessionError> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .map_err(|_| SessionError::Timeout {
                context: "next event".to_string(),
                after: timeout,
            })
    }

    /// Take an already queued event without waiting
    pub fn try_next_event(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
