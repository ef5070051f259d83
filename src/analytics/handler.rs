use crate::analytics::types::{Dashboard, DashboardParams, WindowDays};
use crate::analytics::AnalyticsState;
use crate::auth::bearer::{require_scope, TokenAuth};
use crate::auth::token_routes::SCOPE_ANALYTICS_READ;
use crate::error::AppResult;
use axum::extract::{Query, State};
use axum::Json;
use std::sync::Arc;

/// GET /v1/analytics/dashboard?days=N - Top products and clicks per day.
pub async fn dashboard(
    State(state): State<Arc<AnalyticsState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    Query(params): Query<DashboardParams>,
) -> AppResult<Json<Dashboard>> {
    require_scope(&token_auth, SCOPE_ANALYTICS_READ)?;

    let window = WindowDays::parse(
        params.days.as_deref(),
        state.config.default_window_days,
        state.config.max_window_days,
    );
    if let Some(raw) = params.days.as_deref() {
        if raw.trim() != window.days().to_string() {
            tracing::debug!(raw = %raw, days = window.days(), "dashboard window normalized");
        }
    }

    let dashboard = state.dashboard(window).await?;
    Ok(Json(Dashboard::clone(&dashboard)))
}
