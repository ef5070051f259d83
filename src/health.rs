use axum::extract::State;
use axum::Json;
use deadpool_sqlite::Pool;

use crate::types::HealthResponse;

/// GET /health - Liveness plus a database round trip.
pub async fn health(State(pool): State<Pool>) -> Json<HealthResponse> {
    let db_ok = match pool.get().await {
        Ok(conn) => matches!(
            conn.interact(|conn| conn.execute_batch("SELECT 1")).await,
            Ok(Ok(()))
        ),
        Err(_) => false,
    };

    Json(HealthResponse {
        status: if db_ok {
            "ok".into()
        } else {
            "degraded".into()
        },
        db_ok,
    })
}
