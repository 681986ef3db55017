//! The presence and delivery core: connection registry, send validation,
//! message fan-out, and the submit pipeline tying them together.

pub mod history;
pub mod registry;
pub mod routing;
pub mod service;
pub mod validate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable numeric account identity assigned by the store at registration.
/// Used as the routing key; handles are resolved to this exactly once per send.
pub type UserId = i64;

/// Identity plus its current handle, as carried in delivery payloads and claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub handle: String,
}

/// One delivered message event. Immutable once built; the same payload is
/// pushed to every live connection of both parties (the sender sees their own
/// message echoed across all of their open sessions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    /// Store-assigned message id (monotonically increasing).
    pub id: i64,
    pub content: String,
    /// Store-assigned creation time, not the router's clock.
    pub created_at: DateTime<Utc>,
    pub sender: UserRef,
    pub recipient: UserRef,
}

/// What the core pushes through a connection's send capability. The transport
/// layer owns turning these into actual frames, so the registry never depends
/// on a particular wire format.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A message delivery for this connection.
    Delivery(DeliveryPayload),
    /// A submit failure, reported only to the session that issued the send.
    SendFailed { reason: String },
    /// Ask the transport to close this connection.
    Close { code: u16, reason: String },
}
