//! SQLite-backed implementations of the core's collaborator contracts:
//! handle resolution and durable message persistence.

use chrono::Utc;

use crate::chat::service::{HandleResolver, MessageGateway, PersistedMessage, StoreError};
use crate::chat::{UserId, UserRef};
use crate::db::DbPool;

/// The durable store behind the submit pipeline. Holds the shared connection;
/// every method is blocking and is expected to be called from
/// `spawn_blocking` (the service does this).
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

fn lock_err<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Db(format!("db lock: {}", e))
}

impl HandleResolver for SqliteStore {
    fn resolve_handle(&self, handle: &str) -> Result<Option<UserRef>, StoreError> {
        let conn = self.db.lock().map_err(lock_err)?;
        let row = conn
            .query_row(
                "SELECT id, handle FROM users WHERE handle = ?1",
                [handle],
                |row| {
                    Ok(UserRef {
                        id: row.get(0)?,
                        handle: row.get(1)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Db(other.to_string())),
            })?;
        Ok(row)
    }
}

impl MessageGateway for SqliteStore {
    fn persist_message(
        &self,
        sender: UserId,
        recipient: UserId,
        content: &str,
    ) -> Result<PersistedMessage, StoreError> {
        let conn = self.db.lock().map_err(lock_err)?;
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO messages (content, sender_id, recipient_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![content, sender, recipient, created_at.to_rfc3339()],
        )
        .map_err(|e| StoreError::Db(e.to_string()))?;

        Ok(PersistedMessage {
            id: conn.last_insert_rowid(),
            created_at,
        })
    }
}
