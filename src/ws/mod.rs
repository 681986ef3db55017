pub mod actor;
pub mod handler;

use serde::{Deserialize, Serialize};

use crate::chat::DeliveryPayload;

/// Events a client sends over the socket. JSON-tagged by `event`.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    SendMessage { recipient: String, content: String },
}

/// Events the server pushes to a client.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message delivery (to the recipient, and echoed to the sender's own
    /// sessions).
    NewMessage { message: DeliveryPayload },
    /// A submit failure, sent only to the session that issued the send.
    MessageError { error: String },
}
