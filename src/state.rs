use std::sync::Arc;

use crate::chat::service::ChatService;
use crate::db::DbPool;

/// Shared application state passed to all handlers via axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// The presence and delivery core: registry + submit pipeline
    pub chat: Arc<ChatService>,
}
