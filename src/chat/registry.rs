//! Connection registry: the live identity → connections mapping.
//!
//! The single shared mutable structure in the core. DashMap gives per-key
//! locking, so register/deregister on different identities never contend.
//! A user can hold any number of concurrent connections (multiple tabs or
//! devices); an identity with zero live connections has no entry at all.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::chat::{Outbound, UserId};

/// Sender half of a connection's outbound channel. The transport's writer
/// task owns the receiver; the registry only holds clones of this handle.
pub type ConnectionSender = mpsc::UnboundedSender<Outbound>;

/// Opaque per-session connection identifier. A reconnecting client gets a
/// brand-new id even when it reuses the same identity.
pub type ConnectionId = Uuid;

/// One live, addressable transport session bound to an identity.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    sender: ConnectionSender,
}

impl Connection {
    pub fn new(user_id: UserId, sender: ConnectionSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            sender,
        }
    }

    /// Push an outbound event to this session. Fire-and-forget: the channel
    /// is unbounded and the writer task drains it, so a stalled peer cannot
    /// block the caller. Fails only when the transport has already gone away.
    pub fn push(&self, out: Outbound) -> Result<(), PushError> {
        self.sender.send(out).map_err(|_| PushError::Closed)
    }

    /// Whether the writer side of this connection has shut down.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// A push failed because the receiving transport is gone. Treated as
/// already-disconnected by the router, never as a send failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    Closed,
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Closed => write!(f, "connection closed"),
        }
    }
}

/// Live identity → connections map.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<UserId, Vec<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Add a connection to its identity's entry, creating the entry if absent.
    pub fn register(&self, conn: Connection) {
        let user_id = conn.user_id;
        self.entries.entry(user_id).or_default().push(conn);

        tracing::debug!(
            user_id = user_id,
            connections = self.connections_for(user_id).len(),
            "connection registered"
        );
    }

    /// Remove a connection from its identity's entry; drop the entry entirely
    /// when it becomes empty. Deregistering a connection that is not present
    /// is a no-op — duplicate or out-of-order lifecycle events are tolerated.
    pub fn deregister(&self, user_id: UserId, connection_id: ConnectionId) {
        // The guard from get_mut must be dropped before remove_if touches the
        // same shard, hence the two-step dance.
        let now_empty = match self.entries.get_mut(&user_id) {
            Some(mut conns) => {
                conns.retain(|c| c.id != connection_id);
                conns.is_empty()
            }
            None => return,
        };

        if now_empty {
            // Re-check emptiness under the shard lock: a concurrent register
            // may have slipped in between the two calls.
            self.entries.remove_if(&user_id, |_, conns| conns.is_empty());
        }

        tracing::debug!(
            user_id = user_id,
            connection_id = %connection_id,
            "connection deregistered"
        );
    }

    /// Snapshot of the identity's live connections at this instant. Empty when
    /// the identity has none; never invalidated by later register/deregister.
    pub fn connections_for(&self, user_id: UserId) -> Vec<Connection> {
        self.entries
            .get(&user_id)
            .map(|conns| conns.clone())
            .unwrap_or_default()
    }

    /// Whether the identity currently holds at least one live connection.
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.entries
            .get(&user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Total live connections across all identities.
    pub fn connection_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }

    /// Push a close signal to every live connection. Used at shutdown; the
    /// actors deregister themselves as their transports wind down.
    pub fn close_all(&self, code: u16, reason: &str) {
        let mut closed = 0usize;
        for entry in self.entries.iter() {
            for conn in entry.value() {
                if conn
                    .push(Outbound::Close {
                        code,
                        reason: reason.to_string(),
                    })
                    .is_ok()
                {
                    closed += 1;
                }
            }
        }
        tracing::info!(connections = closed, "close signal sent to all live connections");
    }
}
