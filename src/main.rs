use std::sync::Arc;

use tokio::net::TcpListener;

use courier_server::auth::jwt;
use courier_server::chat::registry::ConnectionRegistry;
use courier_server::chat::service::ChatService;
use courier_server::config::{generate_config_template, Config};
use courier_server::db::{self, store::SqliteStore};
use courier_server::routes;
use courier_server::state::AppState;

/// Close code pushed to live connections at shutdown.
const CLOSE_GOING_AWAY: u16 = 1001;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "courier_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "courier_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Courier server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;
    let jwt_secret = jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // The registry lives for the whole process and is torn down at shutdown
    // by closing every live connection.
    let registry = Arc::new(ConnectionRegistry::new());
    let store = Arc::new(SqliteStore::new(db.clone()));
    let chat = Arc::new(ChatService::new(
        registry.clone(),
        store.clone(),
        store,
    ));

    let state = AppState {
        db,
        jwt_secret,
        chat,
    };

    let app = routes::build_router(state, config.frontend_origin());

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then close every live connection before the server stops
/// accepting.
async fn shutdown_signal(registry: Arc<ConnectionRegistry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
    registry.close_all(CLOSE_GOING_AWAY, "Server shutting down");
}
