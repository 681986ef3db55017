//! Account registration and login. Thin glue around the core: by the time a
//! connection reaches the registry, identity is already established here.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::jwt;
use crate::chat::UserRef;
use crate::state::AppState;

const BCRYPT_COST: u32 = 10;

const MIN_HANDLE_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub handle: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub handle: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: UserResponse,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), (StatusCode, String)> {
    let handle = req.handle.trim().to_string();

    if handle.is_empty() || req.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Handle and password are required".to_string(),
        ));
    }
    if handle.chars().count() < MIN_HANDLE_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Handle must be at least {} characters", MIN_HANDLE_LEN),
        ));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }

    let db = state.db.clone();
    let password = req.password;

    // bcrypt and the insert are both blocking work.
    let user = tokio::task::spawn_blocking(move || {
        let password_hash = bcrypt::hash(&password, BCRYPT_COST)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db lock: {}", e)))?;

        let taken: Option<i64> = conn
            .query_row("SELECT id FROM users WHERE handle = ?1", [&handle], |row| {
                row.get(0)
            })
            .ok();
        if taken.is_some() {
            return Err((StatusCode::CONFLICT, "Handle is already in use".to_string()));
        }

        let created_at = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (handle, password_hash, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![handle, password_hash, created_at],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        Ok(UserResponse {
            id: conn.last_insert_rowid(),
            handle,
            created_at,
        })
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;

    tracing::info!(user_id = user.id, handle = %user.handle, "user registered");

    let message = format!("User {} registered successfully.", user.handle);
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { message, user }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub handle: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

/// POST /api/auth/login
/// Invalid handle and invalid password get the same answer.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    if req.handle.is_empty() || req.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Handle and password are required".to_string(),
        ));
    }

    let db = state.db.clone();
    let handle = req.handle.clone();
    let password = req.password;

    let user = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db lock: {}", e)))?;

        let row: Option<(i64, String, String, String)> = conn
            .query_row(
                "SELECT id, handle, password_hash, created_at FROM users WHERE handle = ?1",
                [&handle],
                |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                },
            )
            .ok();

        let (id, handle, password_hash, created_at) = row.ok_or((
            StatusCode::UNAUTHORIZED,
            "Invalid credentials".to_string(),
        ))?;

        let valid = bcrypt::verify(&password, &password_hash)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        if !valid {
            return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
        }

        Ok(UserResponse {
            id,
            handle,
            created_at,
        })
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;

    let token = jwt::issue_access_token(
        &state.jwt_secret,
        &UserRef {
            id: user.id,
            handle: user.handle.clone(),
        },
    )
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!(user_id = user.id, handle = %user.handle, "login succeeded");

    Ok(Json(LoginResponse { token, user }))
}
