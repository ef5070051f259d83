use axum::extract::State;
use axum::Json;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::sync::Arc;

use super::TrackingState;
use crate::auth::bearer::{require_scope, TokenAuth};
use crate::auth::token_routes::{SCOPE_ANALYTICS_READ, SCOPE_CATALOG_WRITE};
use crate::error::{AppError, AppResult};
use crate::storage::sqlite::apply_connection_settings;

/// A product whose denormalized counter disagrees with its click log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterDrift {
    pub product_id: i64,
    pub slug: String,
    pub counter: i64,
    pub events: i64,
}

#[derive(Debug, Serialize)]
pub struct RebuildReport {
    pub updated: usize,
}

const EVENT_COUNT: &str = "(SELECT COUNT(*) FROM click_events e WHERE e.product_id = p.id)";

pub fn find_drift(conn: &Connection) -> rusqlite::Result<Vec<CounterDrift>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT p.id, p.slug, p.clicks, {EVENT_COUNT} AS events
         FROM products p
         WHERE p.clicks != {EVENT_COUNT}
         ORDER BY p.slug ASC"
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CounterDrift {
                product_id: row.get(0)?,
                slug: row.get(1)?,
                counter: row.get(2)?,
                events: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Reset every drifted counter to its event count. Returns how many rows changed.
pub fn rebuild_counters(conn: &mut Connection) -> rusqlite::Result<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let updated = tx.execute(
        "UPDATE products
         SET clicks = (SELECT COUNT(*) FROM click_events e WHERE e.product_id = products.id)
         WHERE clicks != (SELECT COUNT(*) FROM click_events e WHERE e.product_id = products.id)",
        [],
    )?;
    tx.commit()?;
    Ok(updated)
}

/// GET /v1/admin/clicks/audit
pub async fn audit_counters(
    State(state): State<Arc<TrackingState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
) -> AppResult<Json<Vec<CounterDrift>>> {
    require_scope(&token_auth, SCOPE_ANALYTICS_READ)?;
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let drift = conn
        .interact(|conn| find_drift(conn))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;
    Ok(Json(drift))
}

/// POST /v1/admin/clicks/rebuild
pub async fn rebuild(
    State(state): State<Arc<TrackingState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
) -> AppResult<Json<RebuildReport>> {
    require_scope(&token_auth, SCOPE_CATALOG_WRITE)?;
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let updated = conn
        .interact(|conn| {
            apply_connection_settings(conn)?;
            rebuild_counters(conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    tracing::info!(updated, "click counters rebuilt from event log");
    Ok(Json(RebuildReport { updated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;

    #[test]
    fn test_drift_detected_and_repaired() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO products (id, name, slug, price_cents, affiliate_link, clicks)
                 VALUES (1, 'A', 'a', 100, 'https://x.example/a', 5),
                        (2, 'B', 'b', 100, 'https://x.example/b', 1);
             INSERT INTO click_events (product_id, created_at) VALUES (1, 10), (1, 20), (2, 30);",
        )
        .unwrap();

        let drift = find_drift(&conn).unwrap();
        assert_eq!(
            drift,
            vec![CounterDrift {
                product_id: 1,
                slug: "a".to_string(),
                counter: 5,
                events: 2,
            }]
        );

        assert_eq!(rebuild_counters(&mut conn).unwrap(), 1);
        assert!(find_drift(&conn).unwrap().is_empty());
    }
}
