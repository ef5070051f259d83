use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;

use super::client::client_ip;
use super::recorder::{record_click, ClickMeta};
use super::TrackingState;
use crate::error::{AppError, AppResult};

/// GET /go/{slug} - Record the click, then send the visitor to the affiliate link.
pub async fn go(
    State(state): State<Arc<TrackingState>>,
    Path(slug): Path<String>,
    request: Request,
) -> AppResult<Response> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let headers = request.headers();

    let meta = ClickMeta {
        ip: client_ip(peer, headers, &state.trusted_proxies),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let target = match record_click(&state.pool, &slug, meta, state.max_user_agent_chars).await {
        Ok(target) => target,
        Err(AppError::NotFound(msg)) => {
            tracing::warn!(slug = %slug, "click on unknown product");
            return Err(AppError::NotFound(msg));
        }
        Err(e) => return Err(e),
    };

    tracing::debug!(slug = %slug, product_id = target.product_id, "click recorded");

    Ok((
        StatusCode::FOUND,
        [
            (header::LOCATION, target.affiliate_link),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response())
}
