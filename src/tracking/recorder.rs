use deadpool_sqlite::Pool;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::net::IpAddr;

use crate::error::{AppError, AppResult};
use crate::storage::sqlite::apply_connection_settings;
use crate::types::now_millis;

/// Where a click sends the visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub product_id: i64,
    pub affiliate_link: String,
}

/// Request metadata stored with a click. Both fields are optional and never invented.
#[derive(Debug, Clone, Default)]
pub struct ClickMeta {
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
}

/// Cut a user agent to at most `max_chars` characters without splitting a code point.
/// Empty agents count as absent.
pub fn truncate_user_agent(agent: &str, max_chars: usize) -> Option<String> {
    if agent.is_empty() {
        return None;
    }
    match agent.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => Some(agent[..byte_idx].to_string()),
        None => Some(agent.to_string()),
    }
}

pub fn find_product_by_slug(conn: &Connection, slug: &str) -> rusqlite::Result<Option<RedirectTarget>> {
    conn.query_row(
        "SELECT id, affiliate_link FROM products WHERE slug = ?1",
        params![slug],
        |row| {
            Ok(RedirectTarget {
                product_id: row.get(0)?,
                affiliate_link: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Append one click event. Returns the event id.
pub fn append_click(
    conn: &Connection,
    product_id: i64,
    created_at: i64,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO click_events (product_id, created_at, ip_address, user_agent)
         VALUES (?1, ?2, ?3, ?4)",
        params![product_id, created_at, ip, user_agent],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Atomic in-place increment; the current value is never read into the application.
pub fn increment_clicks(conn: &Connection, product_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE products SET clicks = clicks + 1 WHERE id = ?1",
        params![product_id],
    )
}

/// Record a click on `slug` at `now_ms`: look the product up, log the event and bump
/// its counter inside one write transaction. Unknown slugs change nothing.
pub fn record_click_at(
    conn: &mut Connection,
    slug: &str,
    meta: &ClickMeta,
    max_user_agent_chars: usize,
    now_ms: i64,
) -> AppResult<RedirectTarget> {
    apply_connection_settings(conn)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let target = find_product_by_slug(&tx, slug)?
        .ok_or_else(|| AppError::NotFound("product not found".to_string()))?;

    let ip = meta.ip.map(|ip| ip.to_string());
    let agent = meta
        .user_agent
        .as_deref()
        .and_then(|ua| truncate_user_agent(ua, max_user_agent_chars));

    append_click(&tx, target.product_id, now_ms, ip.as_deref(), agent.as_deref())?;
    increment_clicks(&tx, target.product_id)?;
    tx.commit()?;

    Ok(target)
}

/// Pool-level entry point used by the redirect handler.
pub async fn record_click(
    pool: &Pool,
    slug: &str,
    meta: ClickMeta,
    max_user_agent_chars: usize,
) -> AppResult<RedirectTarget> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let slug = slug.to_string();
    conn.interact(move |conn| {
        record_click_at(conn, &slug, &meta, max_user_agent_chars, now_millis())
    })
    .await
    .map_err(|e| AppError::Internal(format!("interact error: {e}")))?
}
