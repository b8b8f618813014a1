//! qab-client: Remote inspection and control of a live QML object tree
//!
//! A [`Session`] owns the single connection to the bridge. One reader task
//! decodes every inbound frame in arrival order and hands responses to the
//! pending-call registry and events to the subscription registry, so any
//! number of callers can issue requests while others consume event streams.
//! [`InspectorClient`] layers the typed per-method API on top.
//!
//! ```ignore
//! use qab_client::InspectorClient;
//! use qab_core::ClientConfig;
//!
//! let client = InspectorClient::connect(&ClientConfig::default()).await?;
//! let toggle = client.first_by_name("toggleBox").await?.expect("toggleBox");
//! let mut sub = client.subscribe_property(&toggle.object_id, "checked").await?;
//! client.set_property(&toggle.object_id, "checked", true.into()).await?;
//! let event = sub.events.next_event().await;
//! ```

pub mod connector;
pub mod error;
pub mod proxy;
pub mod session;
pub mod transport;

pub use connector::{connect_with_retry, ExponentialBackoff};
pub use error::{ClientError, SessionError, TransportError};
pub use proxy::{InspectorClient, ModelPage, Subscription};
pub use session::{EventStream, Session, SessionOptions};
pub use transport::Endpoint;

pub use qab_protocol::{Event, EventKind, ObjectId, SubscriptionId};
