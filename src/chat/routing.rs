//! Fan-out: turn one persisted message into a push per live connection.

use crate::chat::registry::ConnectionRegistry;
use crate::chat::{DeliveryPayload, Outbound};

/// Deliver `payload` to every live connection of the recipient and every live
/// connection of the sender. Both snapshots are taken independently; when the
/// two identities coincide (the validator forbids it, but the router must not
/// double-deliver if it ever happens) each connection still receives the
/// payload exactly once.
///
/// Pushes are isolated per connection: a connection whose transport already
/// failed is skipped with a debug event, never retried, and never fails the
/// send as a whole — the lifecycle manager reconciles the registry when the
/// transport signals closure.
///
/// Returns the number of connections the payload was pushed to.
pub fn fan_out(registry: &ConnectionRegistry, payload: &DeliveryPayload) -> usize {
    let mut targets = registry.connections_for(payload.recipient.id);
    if payload.sender.id != payload.recipient.id {
        targets.extend(registry.connections_for(payload.sender.id));
    }

    let mut delivered = 0usize;
    for conn in &targets {
        match conn.push(Outbound::Delivery(payload.clone())) {
            Ok(()) => delivered += 1,
            Err(_) => {
                tracing::debug!(
                    connection_id = %conn.id,
                    user_id = conn.user_id,
                    message_id = payload.id,
                    "push to closed connection skipped"
                );
            }
        }
    }

    tracing::debug!(
        message_id = payload.id,
        sender_id = payload.sender.id,
        recipient_id = payload.recipient.id,
        delivered = delivered,
        "message fanned out"
    );

    delivered
}
