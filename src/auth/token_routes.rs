use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use deadpool_sqlite::Pool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::bearer::{generate_token, hash_token, BearerTokenCache};
use super::session::SessionUser;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::types::now_epoch;

pub const SCOPE_ANALYTICS_READ: &str = "analytics:read";
pub const SCOPE_CATALOG_WRITE: &str = "catalog:write";

const VALID_SCOPES: &[&str] = &[SCOPE_ANALYTICS_READ, SCOPE_CATALOG_WRITE];

/// Longest lifetime a token may be issued with.
const MAX_EXPIRY_DAYS: u64 = 3650;

pub struct TokenState {
    pub pool: Pool,
    pub cache: Arc<BearerTokenCache>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_in_days: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub id: String,
    pub name: String,
    pub token: String, // plaintext, shown once
    pub token_prefix: String,
    pub scopes: Vec<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TokenInfo {
    pub id: String,
    pub name: String,
    pub token_prefix: String,
    pub created_by: String,
    pub scopes: Vec<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub last_used_at: Option<i64>,
    pub revoked_at: Option<i64>,
}

fn validate_request(input: &CreateTokenRequest) -> AppResult<()> {
    let name = input.name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AppError::Validation("name must be 1-100 characters".to_string()));
    }
    if input.scopes.is_empty() {
        return Err(AppError::Validation("at least one scope is required".to_string()));
    }
    if let Some(scope) = input
        .scopes
        .iter()
        .find(|s| !VALID_SCOPES.contains(&s.as_str()))
    {
        return Err(AppError::Validation(format!("invalid scope: {scope}")));
    }
    if let Some(days) = input.expires_in_days {
        if days == 0 || days > MAX_EXPIRY_DAYS {
            return Err(AppError::Validation(format!(
                "expires_in_days must be between 1 and {MAX_EXPIRY_DAYS}"
            )));
        }
    }
    Ok(())
}

/// POST /v1/tokens - Create a new bearer token (requires session auth).
pub async fn create_token(
    State(state): State<Arc<TokenState>>,
    axum::Extension(user): axum::Extension<SessionUser>,
    LoggedJson(input): LoggedJson<CreateTokenRequest>,
) -> AppResult<(StatusCode, Json<CreateTokenResponse>)> {
    validate_request(&input)?;

    let mut scopes = input.scopes;
    scopes.sort();
    scopes.dedup();

    let plaintext = generate_token();
    let token_hash = hash_token(&plaintext);
    let token_prefix = plaintext[..16].to_string();
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_epoch();
    let expires_at = input
        .expires_in_days
        .map(|days| now + (days as i64 * 86400));
    let scopes_json = serde_json::to_string(&scopes)
        .map_err(|e| AppError::Internal(format!("scope encoding: {e}")))?;
    let name = input.name.trim().to_string();

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let row = (
        id.clone(),
        name.clone(),
        token_prefix.clone(),
        user.operator_id.clone(),
    );
    conn.interact(move |conn| {
        let (id, name, prefix, created_by) = row;
        conn.execute(
            "INSERT INTO api_tokens (id, name, token_hash, token_prefix, created_by, scopes, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![id, name, token_hash, prefix, created_by, scopes_json, now, expires_at],
        )
    })
    .await??;

    tracing::info!(token_id = %id, operator_id = %user.operator_id, "bearer token created");

    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            id,
            name,
            token: plaintext,
            token_prefix,
            scopes,
            created_at: now,
            expires_at,
        }),
    ))
}

/// GET /v1/tokens - Admins see every token, other operators only their own.
pub async fn list_tokens(
    State(state): State<Arc<TokenState>>,
    axum::Extension(user): axum::Extension<SessionUser>,
) -> AppResult<Json<Vec<TokenInfo>>> {
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let tokens = conn
        .interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, token_prefix, created_by, scopes, created_at, expires_at, last_used_at, revoked_at
                 FROM api_tokens
                 WHERE ?1 OR created_by = ?2
                 ORDER BY created_at DESC, id ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user.is_admin, user.operator_id], |row| {
                    let scopes_json: String = row.get(4)?;
                    Ok(TokenInfo {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        token_prefix: row.get(2)?,
                        created_by: row.get(3)?,
                        scopes: serde_json::from_str(&scopes_json).unwrap_or_default(),
                        created_at: row.get(5)?,
                        expires_at: row.get(6)?,
                        last_used_at: row.get(7)?,
                        revoked_at: row.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await??;

    Ok(Json(tokens))
}

/// DELETE /v1/tokens/{id} - Revoke a token (owner or admin).
pub async fn revoke_token(
    State(state): State<Arc<TokenState>>,
    axum::Extension(user): axum::Extension<SessionUser>,
    Path(token_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let tid = token_id.clone();
    let owner: Option<String> = conn
        .interact(move |conn| {
            conn.query_row(
                "SELECT created_by FROM api_tokens WHERE id = ?1 AND revoked_at IS NULL",
                rusqlite::params![tid],
                |row| row.get::<_, String>(0),
            )
            .ok()
        })
        .await?;

    let owner =
        owner.ok_or_else(|| AppError::NotFound("token not found or already revoked".to_string()))?;
    if !user.is_admin && owner != user.operator_id {
        return Err(AppError::Forbidden(
            "you do not have permission to revoke this token".to_string(),
        ));
    }

    let now = now_epoch();
    let tid = token_id.clone();
    let updated = conn
        .interact(move |conn| {
            conn.execute(
                "UPDATE api_tokens SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
                rusqlite::params![now, tid],
            )
        })
        .await??;

    if updated == 0 {
        return Err(AppError::NotFound(
            "token not found or already revoked".to_string(),
        ));
    }

    // Cached entries are keyed by hash, so a targeted eviction would need a reverse lookup
    state.cache.invalidate_all();
    tracing::info!(token_id = %token_id, "bearer token revoked");

    Ok(Json(serde_json::json!({ "revoked": token_id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(scopes: &[&str], expires: Option<u64>) -> CreateTokenRequest {
        CreateTokenRequest {
            name: "ci".to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            expires_in_days: expires,
        }
    }

    #[test]
    fn test_known_scopes_accepted() {
        assert!(validate_request(&request(&["analytics:read", "catalog:write"], Some(30))).is_ok());
    }

    #[test]
    fn test_unknown_scope_rejected() {
        assert!(validate_request(&request(&["errors:write"], None)).is_err());
        assert!(validate_request(&request(&[], None)).is_err());
    }

    #[test]
    fn test_expiry_bounds() {
        assert!(validate_request(&request(&["analytics:read"], Some(0))).is_err());
        assert!(validate_request(&request(&["analytics:read"], Some(3651))).is_err());
    }
}
