use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use deadpool_sqlite::Pool;
use once_cell::sync::Lazy;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::password::{hash_password, verify_password};
use super::session::{
    clear_cookie, create_session, delete_session, extract_session_cookie, session_cookie,
};
use super::state::AuthState;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::types::now_epoch;

const MIN_PASSWORD_LEN: usize = 8;

/// Verified in place of a real hash when the username is unknown, so every
/// login attempt pays for one argon2 verification.
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password("no-such-operator-placeholder").ok());

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct OperatorInfo {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
}

fn validate_username(username: &str) -> AppResult<()> {
    let ok = !username.is_empty()
        && username.len() <= 64
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(
            "username must be 1-64 characters of letters, digits, '.', '_' or '-'".to_string(),
        ))
    }
}

/// Insert a new operator account. Used by the `create-operator` subcommand.
pub async fn create_operator(
    pool: &Pool,
    username: &str,
    password: &str,
    is_admin: bool,
) -> AppResult<OperatorInfo> {
    validate_username(username)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password_hash =
        hash_password(password).map_err(|e| AppError::Internal(format!("password hash: {e}")))?;
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_epoch();

    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let row = (id.clone(), username.to_string());
    conn.interact(move |conn| {
        let (id, username) = row;
        conn.execute(
            "INSERT INTO operators (id, username, password_hash, is_admin, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, username, password_hash, is_admin, now],
        )
    })
    .await?
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            AppError::Conflict("an operator with that username already exists".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    Ok(OperatorInfo {
        id,
        username: username.to_string(),
        is_admin,
    })
}

/// POST /auth/login - Verify credentials and set the session cookie.
pub async fn login(
    State(state): State<Arc<AuthState>>,
    LoggedJson(input): LoggedJson<LoginRequest>,
) -> AppResult<Response> {
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let username = input.username.clone();
    let row: Option<(String, String, bool)> = conn
        .interact(move |conn| {
            conn.query_row(
                "SELECT id, password_hash, is_admin FROM operators WHERE username = ?1",
                rusqlite::params![username],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)? != 0,
                    ))
                },
            )
            .optional()
        })
        .await??;
    drop(conn);

    let password = input.password.clone();
    let stored_hash = row.as_ref().map(|(_, hash, _)| hash.clone());
    let verified = tokio::task::spawn_blocking(move || match stored_hash {
        Some(hash) => verify_password(&password, &hash),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                let _ = verify_password(&password, dummy);
            }
            Ok(false)
        }
    })
    .await
    .map_err(|e| AppError::Internal(format!("password verify task: {e}")))?
    .map_err(|e| AppError::Internal(format!("password verify: {e}")))?;

    let invalid = || AppError::Auth("invalid username or password".to_string());
    let Some((operator_id, _, is_admin)) = row else {
        tracing::warn!(username = %input.username, "login for unknown operator");
        return Err(invalid());
    };
    if !verified {
        tracing::warn!(username = %input.username, "login with wrong password");
        return Err(invalid());
    }

    let token = create_session(&state.pool, &operator_id, state.session_ttl_secs).await?;

    tracing::info!(operator_id = %operator_id, "operator logged in");

    let cookie = session_cookie(&token, state.session_ttl_secs, state.secure_cookies);
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(OperatorInfo {
            id: operator_id,
            username: input.username,
            is_admin,
        }),
    )
        .into_response())
}

/// POST /auth/logout - Drop the session (if any) and clear the cookie.
pub async fn logout(State(state): State<Arc<AuthState>>, headers: HeaderMap) -> Response {
    if let Some(token) = extract_session_cookie(&headers) {
        if let Err(e) = delete_session(&state.pool, &token).await {
            tracing::warn!(error = %e, "failed to delete session on logout");
        }
    }
    (
        StatusCode::OK,
        [(header::SET_COOKIE, clear_cookie(state.secure_cookies))],
        Json(serde_json::json!({ "logged_out": true })),
    )
        .into_response()
}
