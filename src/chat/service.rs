//! The submit pipeline and connection lifecycle, tying the validator, the
//! identity resolver, the persistence gateway, and the fan-out router
//! together behind one entry point.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::chat::registry::{Connection, ConnectionRegistry, ConnectionSender};
use crate::chat::routing;
use crate::chat::validate::{self, ValidationError};
use crate::chat::{DeliveryPayload, UserId, UserRef};

/// A collaborator (the durable store) failed.
#[derive(Debug, Clone)]
pub enum StoreError {
    Db(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Db(e) => write!(f, "store error: {}", e),
        }
    }
}

/// Maps a display handle to a routable identity. Implemented by the SQLite
/// store; replaceable by an in-memory fake in tests.
pub trait HandleResolver: Send + Sync {
    fn resolve_handle(&self, handle: &str) -> Result<Option<UserRef>, StoreError>;
}

/// Durably appends a message and returns its assigned id and timestamp.
pub trait MessageGateway: Send + Sync {
    fn persist_message(
        &self,
        sender: UserId,
        recipient: UserId,
        content: &str,
    ) -> Result<PersistedMessage, StoreError>;
}

/// What the store assigned to a freshly committed message.
#[derive(Debug, Clone, Copy)]
pub struct PersistedMessage {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

/// Why a submit failed. Individual push failures are not in this taxonomy:
/// once a message is persisted, delivery problems never surface to the sender.
#[derive(Debug, Clone)]
pub enum SubmitError {
    /// Request shape was invalid; nothing was persisted.
    Rejected(ValidationError),
    /// Recipient handle resolved to no identity; nothing was persisted.
    RecipientNotFound(String),
    /// The store refused the append; no delivery was attempted.
    Storage(StoreError),
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Rejected(e) => write!(f, "{}", e),
            SubmitError::RecipientNotFound(handle) => {
                write!(f, "User '{}' not found.", handle)
            }
            SubmitError::Storage(_) => write!(f, "Internal error while sending the message."),
        }
    }
}

/// Successful submit: the store-assigned message id and timestamp.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryReceipt {
    pub message_id: i64,
    pub created_at: DateTime<Utc>,
}

/// The core service: owns the registry and the collaborator handles.
/// Constructed once at startup and shared via `AppState`; never ambient.
pub struct ChatService {
    registry: Arc<ConnectionRegistry>,
    resolver: Arc<dyn HandleResolver>,
    gateway: Arc<dyn MessageGateway>,
    /// Held across persist + fan-out so that, for any sender/recipient pair,
    /// delivery order always equals persistence commit order even when
    /// submits complete concurrently.
    send_order: Mutex<()>,
}

impl ChatService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        resolver: Arc<dyn HandleResolver>,
        gateway: Arc<dyn MessageGateway>,
    ) -> Self {
        Self {
            registry,
            resolver,
            gateway,
            send_order: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Transport signaled an authenticated session is open: mint a connection
    /// with a fresh id and make it visible to the router. The identity is
    /// already trusted by the time this is called; the core never re-checks
    /// credentials.
    pub fn connection_opened(&self, user: &UserRef, sender: ConnectionSender) -> Connection {
        let conn = Connection::new(user.id, sender);
        tracing::info!(
            user_id = user.id,
            handle = %user.handle,
            connection_id = %conn.id,
            "connection opened"
        );
        self.registry.register(conn.clone());
        conn
    }

    /// Transport signaled the session ended (client close, failure, or forced
    /// termination). Safe to call more than once for the same connection.
    pub fn connection_closed(&self, conn: &Connection) {
        self.registry.deregister(conn.user_id, conn.id);
        tracing::info!(
            user_id = conn.user_id,
            connection_id = %conn.id,
            "connection closed"
        );
    }

    /// The single send entry point: validate → resolve → persist → fan out.
    /// Persist strictly precedes routing; a message that was never committed
    /// is never partially delivered.
    pub async fn submit_message(
        &self,
        sender: &UserRef,
        recipient_handle: &str,
        content: &str,
    ) -> Result<DeliveryReceipt, SubmitError> {
        let valid = validate::validate_send(&sender.handle, recipient_handle, content)
            .map_err(SubmitError::Rejected)?;
        let recipient_handle = valid.recipient_handle.to_string();
        let content = valid.content.to_string();

        // Resolve the textual recipient to an identity, once per send.
        let recipient = {
            let resolver = self.resolver.clone();
            let handle = recipient_handle.clone();
            run_blocking(move || resolver.resolve_handle(&handle))
                .await
                .map_err(SubmitError::Storage)?
                .ok_or_else(|| SubmitError::RecipientNotFound(recipient_handle.clone()))?
        };

        // Commit, then route, under one guard: the order messages hit the
        // store is the order their payloads hit the connections.
        let guard = self.send_order.lock().await;

        let persisted = {
            let gateway = self.gateway.clone();
            let (sender_id, recipient_id) = (sender.id, recipient.id);
            let body = content.clone();
            run_blocking(move || gateway.persist_message(sender_id, recipient_id, &body))
                .await
                .map_err(SubmitError::Storage)?
        };

        let payload = DeliveryPayload {
            id: persisted.id,
            content,
            created_at: persisted.created_at,
            sender: sender.clone(),
            recipient,
        };
        routing::fan_out(&self.registry, &payload);

        drop(guard);

        Ok(DeliveryReceipt {
            message_id: persisted.id,
            created_at: persisted.created_at,
        })
    }
}

/// Run a blocking collaborator call off the async runtime.
async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Db(format!("blocking task failed: {}", e)))?
}
