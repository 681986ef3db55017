//! Message history retrieval. Keyset-paginated and scoped to conversations
//! the caller is a party to; retention itself is a store concern.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::{DeliveryPayload, UserRef};
use crate::state::AppState;

/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Return messages with id strictly below this cursor.
    pub before: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Oldest first within the page.
    pub messages: Vec<DeliveryPayload>,
    pub has_more: bool,
}

/// GET /api/messages?before={id}&limit={n} — JWT auth required.
/// Returns only messages the caller sent or received.
pub async fn get_messages(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, (StatusCode, String)> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let before = query.before.unwrap_or(i64::MAX);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let response = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db lock: {}", e)))?;

        let mut stmt = conn
            .prepare(
                "SELECT m.id, m.content, m.created_at,
                        s.id, s.handle,
                        r.id, r.handle
                 FROM messages m
                 JOIN users s ON m.sender_id = s.id
                 JOIN users r ON m.recipient_id = r.id
                 WHERE (m.sender_id = ?1 OR m.recipient_id = ?1) AND m.id < ?2
                 ORDER BY m.id DESC
                 LIMIT ?3",
            )
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        // Fetch one extra row to learn whether an older page exists. A row
        // that fails to map (including an unparseable timestamp) is store
        // corruption and surfaces as an error, never as plausible data.
        let mut messages: Vec<DeliveryPayload> = stmt
            .query_map(
                rusqlite::params![user_id, before, (limit + 1) as i64],
                |row| {
                    let created_at: String = row.get(2)?;
                    let created_at = created_at.parse::<DateTime<Utc>>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            2,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                    Ok(DeliveryPayload {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        created_at,
                        sender: UserRef {
                            id: row.get(3)?,
                            handle: row.get(4)?,
                        },
                        recipient: UserRef {
                            id: row.get(5)?,
                            handle: row.get(6)?,
                        },
                    })
                },
            )
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        let has_more = messages.len() > limit as usize;
        messages.truncate(limit as usize);
        // Query ran newest-first for the keyset cursor; the page reads
        // oldest-first.
        messages.reverse();

        Ok::<_, (StatusCode, String)>(HistoryResponse { messages, has_more })
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;

    Ok(Json(response))
}
