use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use deadpool_sqlite::Pool;
use rand::RngCore;
use rusqlite::OptionalExtension;
use std::sync::Arc;
use std::time::Duration;

use super::bearer::hash_token;
use crate::error::{AppError, AppResult};
use crate::types::now_epoch;

pub const SESSION_COOKIE: &str = "reviews_session";

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// The operator behind a valid session cookie.
#[derive(Clone, Debug)]
pub struct SessionUser {
    pub operator_id: String,
    pub is_admin: bool,
}

/// 256 random bits, base64url without padding. Shared by sessions and API tokens.
pub fn new_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn cookie(value: &str, max_age: u64, secure: bool) -> String {
    let mut cookie =
        format!("{SESSION_COOKIE}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn session_cookie(token: &str, max_age: u64, secure: bool) -> String {
    cookie(token, max_age, secure)
}

pub fn clear_cookie(secure: bool) -> String {
    cookie("", 0, secure)
}

/// Clone a value a router layer placed in the request extensions.
pub(super) fn layer_extension<T: Clone + Send + Sync + 'static>(
    request: &Request,
    what: &str,
) -> AppResult<T> {
    request
        .extensions()
        .get::<T>()
        .cloned()
        .ok_or_else(|| AppError::Internal(format!("{what} not configured")))
}

/// Look a plaintext session token up. Expired and unknown tokens are `None`;
/// storage failures are errors.
pub async fn validate_session(pool: &Pool, token: &str) -> AppResult<Option<SessionUser>> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let token_hash = hash_token(token);
    let now = now_epoch();

    let user = conn
        .interact(move |conn| {
            conn.query_row(
                "SELECT s.operator_id, o.is_admin FROM sessions s
                 JOIN operators o ON o.id = s.operator_id
                 WHERE s.token = ?1 AND s.expires_at > ?2",
                rusqlite::params![token_hash, now],
                |row| {
                    Ok(SessionUser {
                        operator_id: row.get(0)?,
                        is_admin: row.get::<_, i64>(1)? != 0,
                    })
                },
            )
            .optional()
        })
        .await??;
    Ok(user)
}

/// Resolve the session cookie on `headers` to its operator.
pub async fn authenticate_session(pool: &Pool, headers: &HeaderMap) -> AppResult<SessionUser> {
    let token = extract_session_cookie(headers)
        .ok_or_else(|| AppError::Auth("authentication required".to_string()))?;
    validate_session(pool, &token)
        .await?
        .ok_or_else(|| AppError::Auth("invalid or expired session".to_string()))
}

/// Middleware for routes only a logged-in operator may use.
pub async fn require_session_api(mut request: Request, next: Next) -> AppResult<Response> {
    let pool: Arc<Pool> = layer_extension(&request, "session pool")?;
    let user = authenticate_session(&pool, request.headers()).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Store a new session for `operator_id` and return its plaintext token.
/// Only the hash reaches the database.
pub async fn create_session(pool: &Pool, operator_id: &str, ttl_secs: u64) -> AppResult<String> {
    let token = new_secret();
    let token_hash = hash_token(&token);
    let operator_id = operator_id.to_string();
    let now = now_epoch();
    let expires_at = now + ttl_secs as i64;

    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    conn.interact(move |conn| {
        conn.execute(
            "INSERT INTO sessions (token, operator_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![token_hash, operator_id, now, expires_at],
        )
    })
    .await??;
    Ok(token)
}

pub async fn delete_session(pool: &Pool, token: &str) -> AppResult<()> {
    let token_hash = hash_token(token);
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    conn.interact(move |conn| {
        conn.execute("DELETE FROM sessions WHERE token = ?1", [token_hash])
    })
    .await??;
    Ok(())
}

/// Delete sessions that expired before `now`. Returns how many went.
pub async fn prune_expired_sessions(pool: &Pool, now: i64) -> AppResult<usize> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let deleted = conn
        .interact(move |conn| conn.execute("DELETE FROM sessions WHERE expires_at < ?1", [now]))
        .await??;
    Ok(deleted)
}

/// Prune expired sessions once an hour for the life of the process.
pub async fn session_cleanup_loop(pool: Pool) {
    let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
    loop {
        ticker.tick().await;
        match prune_expired_sessions(&pool, now_epoch()).await {
            Ok(0) => {}
            Ok(deleted) => tracing::info!(deleted, "pruned expired sessions"),
            Err(e) => tracing::warn!(error = %e, "session cleanup failed"),
        }
    }
}
