pub mod migrations;
pub mod store;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared database handle. rusqlite is synchronous — wrap in Arc<Mutex> and
/// reach it through tokio::task::spawn_blocking from async code.
pub type DbPool = Arc<Mutex<Connection>>;

/// Open (or create) the SQLite database under `data_dir`, enable WAL mode and
/// foreign keys, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("courier.db");
    let mut conn = Connection::open(&db_path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}
