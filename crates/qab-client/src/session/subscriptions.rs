//! Local routing table for bridge subscriptions
//!
//! Events are routed by `subscriptionId` when the bridge reports one. Events
//! without it fall back to matching `(objectId, member)` against every
//! tracked subscription. Anything left over goes to the unrouted listeners.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use qab_protocol::{Event, EventKind, ObjectId, SubscriptionId};

use super::events::EventStream;
use crate::error::SessionError;

pub(crate) type Listener = mpsc::UnboundedSender<Event>;

/// What a subscription observes on the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTarget {
    pub object_id: ObjectId,
    /// Property name, or signal name with optional signature (`"clicked()"`)
    pub member: String,
    pub kind: EventKind,
}

impl SubscriptionTarget {
    /// Target a property of `object_id`
    pub fn property(object_id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            object_id,
            member: name.into(),
            kind: EventKind::Property,
        }
    }

    /// Target a signal of `object_id`
    pub fn signal(object_id: ObjectId, signal: impl Into<String>) -> Self {
        Self {
            object_id,
            member: signal.into(),
            kind: EventKind::Signal,
        }
    }

    /// Whether an event without a subscription id belongs to this target
    pub fn matches(&self, event: &Event) -> bool {
        if event.object_id.as_ref() != Some(&self.object_id) {
            return false;
        }
        if matches!(&event.kind, Some(kind) if *kind != self.kind) {
            return false;
        }
        let Some(name) = event.name.as_deref() else {
            return false;
        };
        match self.kind {
            EventKind::Signal => signal_matches(&self.member, name),
            _ => name == self.member,
        }
    }
}

/// Signal name without its parameter list
fn signal_base(signal: &str) -> &str {
    let base = signal.find('(').map_or(signal, |at| &signal[..at]);
    base.trim()
}

/// `incoming` names the signal `declared` when it is the same base name,
/// bare or followed by a parameter list.
pub(crate) fn signal_matches(declared: &str, incoming: &str) -> bool {
    match incoming.strip_prefix(signal_base(declared)) {
        Some(rest) => rest.is_empty() || rest.starts_with('('),
        None => false,
    }
}

struct Tracked {
    target: SubscriptionTarget,
    listeners: Vec<Listener>,
}

#[derive(Default)]
struct RoutingState {
    subscriptions: HashMap<SubscriptionId, Tracked>,
    unrouted: Vec<Listener>,
    closed: bool,
}

/// Tracked subscriptions and their listeners
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RoutingState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RoutingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start routing events for `id`, optionally delivering to `listener`
    pub(crate) fn track(
        &self,
        id: SubscriptionId,
        target: SubscriptionTarget,
        listener: Option<Listener>,
    ) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.closed {
            return Err(SessionError::ConnectionClosed);
        }

        let tracked = state.subscriptions.entry(id.clone()).or_insert_with(|| Tracked {
            target: target.clone(),
            listeners: Vec::new(),
        });
        if tracked.target != target {
            tracing::warn!(subscription_id = %id, "Bridge reused a subscription id for another target");
            tracked.target = target;
        }
        tracked.listeners.extend(listener);

        tracing::debug!(subscription_id = %id, "Tracking subscription");
        Ok(())
    }

    /// Stop routing events for `id`; its listeners' streams end.
    ///
    /// Returns `false` if `id` was not tracked.
    pub fn untrack(&self, id: &SubscriptionId) -> bool {
        let removed = self.lock().subscriptions.remove(id).is_some();
        if removed {
            tracing::debug!(subscription_id = %id, "Untracked subscription");
        }
        removed
    }

    /// Add a listener for one subscription, or for unrouted events when
    /// `filter` is `None`.
    pub fn listen(&self, filter: Option<&SubscriptionId>) -> Result<EventStream, SessionError> {
        let mut state = self.lock();
        if state.closed {
            return Err(SessionError::ConnectionClosed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        match filter {
            Some(id) => match state.subscriptions.get_mut(id) {
                Some(tracked) => tracked.listeners.push(tx),
                None => return Err(SessionError::UnknownSubscription(id.clone())),
            },
            None => state.unrouted.push(tx),
        }
        Ok(EventStream::new(rx))
    }

    /// Deliver an event to its listeners.
    ///
    /// A reported `subscriptionId` is authoritative: an event naming an id
    /// that is not tracked goes straight to the unrouted listeners instead
    /// of falling back to `(objectId, member)` matching, so nothing arrives
    /// on a stream after its subscription was untracked. A subscription
    /// whose listeners have all been dropped is untracked here, and its
    /// event is treated as unrouted.
    ///
    /// Returns the number of subscriptions it was delivered to; zero means
    /// it went to the unrouted listeners.
    pub fn route(&self, event: Event) -> usize {
        let mut state = self.lock();
        if state.closed {
            return 0;
        }

        let targets: Vec<SubscriptionId> = match &event.subscription_id {
            Some(id) if state.subscriptions.contains_key(id) => vec![id.clone()],
            Some(_) => Vec::new(),
            None => state
                .subscriptions
                .iter()
                .filter(|(_, tracked)| tracked.target.matches(&event))
                .map(|(id, _)| id.clone())
                .collect(),
        };

        let mut delivered = 0;
        for id in &targets {
            let Some(tracked) = state.subscriptions.get_mut(id) else {
                continue;
            };
            deliver(&mut tracked.listeners, &event);
            if tracked.listeners.is_empty() {
                state.subscriptions.remove(id);
                tracing::debug!(subscription_id = %id, "Untracked subscription with no listeners");
            } else {
                delivered += 1;
            }
        }

        if delivered == 0 {
            tracing::trace!(name = ?event.name, "Event matched no subscription");
            deliver(&mut state.unrouted, &event);
        }
        delivered
    }

    /// Drop every subscription and listener; all streams end.
    ///
    /// Returns the number of subscriptions dropped. Later `track` and
    /// `listen` calls fail with `ConnectionClosed`.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        state.unrouted.clear();
        let dropped = state.subscriptions.len();
        state.subscriptions.clear();
        dropped
    }

    /// Whether `id` is tracked
    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.lock().subscriptions.contains_key(id)
    }

    /// Number of tracked subscriptions
    pub fn len(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Send to every live listener, forgetting those whose stream was dropped
fn deliver(listeners: &mut Vec<Listener>, event: &Event) {
    listeners.retain(|tx| tx.send(event.clone()).is_ok());
}
