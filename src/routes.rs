use axum::http::{header, HeaderValue, Method};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;

use crate::auth::handlers as auth_handlers;
use crate::auth::middleware::JwtSecret;
use crate::chat::history;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can
/// find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router. `frontend_origin`, when set, gets CORS access
/// with credentials (the API serves a separate browser frontend).
pub fn build_router(state: AppState, frontend_origin: Option<&str>) -> Router {
    let auth_routes = Router::new()
        .route(
            "/api/auth/register",
            axum::routing::post(auth_handlers::register),
        )
        .route("/api/auth/login", axum::routing::post(auth_handlers::login));

    // Message history (JWT required — Claims extractor validates the token)
    let message_routes = Router::new().route(
        "/api/messages",
        axum::routing::get(history::get_messages),
    );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    let health = Router::new()
        .route("/", axum::routing::get(root))
        .route("/health", axum::routing::get(health_check));

    let mut router = Router::new()
        .merge(auth_routes)
        .merge(message_routes)
        .merge(ws_routes)
        .merge(health);

    if let Some(origin) = frontend_origin {
        match origin.parse::<HeaderValue>() {
            Ok(origin) => {
                let cors = CorsLayer::new()
                    .allow_origin(origin)
                    .allow_methods([Method::GET, Method::POST])
                    .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
                    .allow_credentials(true);
                router = router.layer(cors);
            }
            Err(_) => {
                tracing::warn!(origin = origin, "invalid frontend origin, CORS disabled");
            }
        }
    }

    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Root liveness string.
async fn root() -> &'static str {
    "Courier API running"
}

/// Basic health check endpoint.
async fn health_check() -> &'static str {
    "ok"
}
