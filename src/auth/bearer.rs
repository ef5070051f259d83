use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
    Extension,
};
use deadpool_sqlite::Pool;
use moka::sync::Cache;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use super::session::{authenticate_session, layer_extension, new_secret};
use crate::error::{AppError, AppResult};
use crate::types::now_epoch;

pub const TOKEN_PREFIX: &str = "reviews_tk_";

const CACHE_CAPACITY: u64 = 1000;
const CACHE_TTL: Duration = Duration::from_secs(300);

/// An API token that passed validation, as seen by handlers.
#[derive(Clone, Debug)]
pub struct TokenAuth {
    pub token_id: String,
    pub operator_id: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<i64>,
}

impl TokenAuth {
    fn expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Live API tokens keyed by hash. Revocation clears the whole cache.
#[derive(Clone)]
pub struct BearerTokenCache {
    tokens: Cache<String, TokenAuth>,
    pool: Pool,
}

impl BearerTokenCache {
    pub fn new(pool: Pool) -> Self {
        let tokens = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(CACHE_TTL)
            .build();
        Self { tokens, pool }
    }

    /// Unknown, revoked and expired tokens resolve to `None`.
    pub async fn resolve(&self, plaintext: &str) -> AppResult<Option<TokenAuth>> {
        let token_hash = hash_token(plaintext);
        let now = now_epoch();

        if let Some(auth) = self.tokens.get(&token_hash) {
            if auth.expired(now) {
                self.tokens.invalidate(&token_hash);
                return Ok(None);
            }
            return Ok(Some(auth));
        }

        let Some(auth) = self.load(token_hash.clone()).await? else {
            return Ok(None);
        };
        if auth.expired(now) {
            return Ok(None);
        }
        self.tokens.insert(token_hash, auth.clone());
        Ok(Some(auth))
    }

    async fn load(&self, token_hash: String) -> AppResult<Option<TokenAuth>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
        let row = conn
            .interact(move |conn| {
                conn.query_row(
                    "SELECT id, created_by, scopes, expires_at FROM api_tokens
                     WHERE token_hash = ?1 AND revoked_at IS NULL",
                    [token_hash],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<i64>>(3)?,
                        ))
                    },
                )
                .optional()
            })
            .await??;

        let Some((token_id, operator_id, scopes, expires_at)) = row else {
            return Ok(None);
        };
        let scopes: Vec<String> = serde_json::from_str(&scopes)
            .map_err(|e| AppError::Internal(format!("token {token_id} scopes: {e}")))?;
        Ok(Some(TokenAuth {
            token_id,
            operator_id,
            scopes,
            expires_at,
        }))
    }

    pub fn invalidate_all(&self) {
        self.tokens.invalidate_all();
    }

    /// Stamp `last_used_at` without holding up the request.
    pub fn touch_last_used(&self, token_id: String) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let now = now_epoch();
            let Ok(conn) = pool.get().await else {
                return;
            };
            let result = conn
                .interact(move |conn| {
                    conn.execute(
                        "UPDATE api_tokens SET last_used_at = ?1 WHERE id = ?2",
                        rusqlite::params![now, token_id],
                    )
                })
                .await;
            if !matches!(result, Ok(Ok(_))) {
                tracing::debug!("could not record token use");
            }
        });
    }
}

/// Hex SHA-256 of a secret. Tokens and sessions are stored only in this form.
pub fn hash_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// A fresh API token: the `reviews_tk_` prefix plus 256 random bits.
pub fn generate_token() -> String {
    format!("{TOKEN_PREFIX}{}", new_secret())
}

fn bearer_credential(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Bearer callers need `scope`; session callers (no `TokenAuth`) pass.
pub fn require_scope(token_auth: &Option<Extension<TokenAuth>>, scope: &str) -> AppResult<()> {
    match token_auth {
        Some(Extension(auth)) if !auth.has_scope(scope) => Err(AppError::Forbidden(format!(
            "token lacks required scope: {scope}"
        ))),
        _ => Ok(()),
    }
}

/// Middleware accepting either an API token or a session cookie. A present
/// `Authorization: Bearer` header is authoritative; the cookie is not consulted.
pub async fn require_bearer_or_session(mut request: Request, next: Next) -> AppResult<Response> {
    if let Some(plaintext) = bearer_credential(request.headers()) {
        let cache: Arc<BearerTokenCache> = layer_extension(&request, "bearer cache")?;
        let auth = cache
            .resolve(&plaintext)
            .await?
            .ok_or_else(|| AppError::Auth("invalid or expired token".to_string()))?;
        cache.touch_last_used(auth.token_id.clone());
        request.extensions_mut().insert(auth);
    } else {
        let pool: Arc<Pool> = layer_extension(&request, "session pool")?;
        let user = authenticate_session(&pool, request.headers()).await?;
        request.extensions_mut().insert(user);
    }
    Ok(next.run(request).await)
}
