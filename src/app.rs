use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use deadpool_sqlite::Pool;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::analytics::{self, AnalyticsState};
use crate::auth::bearer::BearerTokenCache;
use crate::auth::state::AuthState;
use crate::auth::token_routes::{self, TokenState};
use crate::auth::{self, operators};
use crate::catalog::{article, category, product, CatalogState};
use crate::config::AppConfig;
use crate::health;
use crate::tracking::client::{ClientIpKeyExtractor, TrustedProxies};
use crate::tracking::{audit, handler as tracking_handler, TrackingState};

/// JSON bodies larger than this are rejected before deserialization.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Assemble every route group. Background tasks are the caller's business.
pub fn build_router(config: &AppConfig, pool: Pool) -> Result<Router, String> {
    let trusted_proxies = Arc::new(TrustedProxies::parse(&config.server.trusted_proxies)?);

    let tracking_state = Arc::new(TrackingState {
        pool: pool.clone(),
        trusted_proxies: trusted_proxies.clone(),
        max_user_agent_chars: config.clicks.max_user_agent_chars,
    });
    let analytics_state = Arc::new(AnalyticsState::new(pool.clone(), config.analytics.clone()));
    let catalog_state = Arc::new(CatalogState::new(pool.clone(), config.catalog.clone()));
    let auth_state = Arc::new(AuthState::new(&config.auth, pool.clone()));
    let bearer_cache = Arc::new(BearerTokenCache::new(pool.clone()));
    let token_state = Arc::new(TokenState {
        pool: pool.clone(),
        cache: bearer_cache.clone(),
    });

    // Pool extension for session middleware
    let session_pool = Arc::new(pool.clone());

    let click_governor_conf = GovernorConfigBuilder::default()
        .key_extractor(ClientIpKeyExtractor::new(trusted_proxies.clone()))
        .per_second(config.rate_limit.per_second)
        .burst_size(config.rate_limit.burst_size)
        .finish()
        .ok_or("invalid click rate limiter config")?;

    let auth_governor_conf = GovernorConfigBuilder::default()
        .key_extractor(ClientIpKeyExtractor::new(trusted_proxies.clone()))
        .per_second(config.rate_limit.auth_per_second)
        .burst_size(config.rate_limit.auth_burst_size)
        .finish()
        .ok_or("invalid auth rate limiter config")?;

    // ── Outbound redirect (public, rate-limited) ──
    let click_routes = Router::new()
        .route("/go/{slug}", get(tracking_handler::go))
        .layer(GovernorLayer::new(click_governor_conf))
        .with_state(tracking_state.clone());

    // ── Operator login (public, rate-limited) ──
    let auth_routes = Router::new()
        .route("/auth/login", post(operators::login))
        .route("/auth/logout", post(operators::logout))
        .layer(GovernorLayer::new(auth_governor_conf))
        .with_state(auth_state);

    // ── Public catalog ──
    let catalog_routes = Router::new()
        .route("/v1/products", get(product::list_products))
        .route("/v1/products/{slug}", get(product::get_product))
        .route("/v1/categories", get(category::list_categories))
        .route("/v1/categories/{slug}", get(category::get_category))
        .route("/v1/articles", get(article::list_articles))
        .route("/v1/articles/{slug}", get(article::get_article))
        .with_state(catalog_state.clone());

    // ── Catalog writes (bearer catalog:write or session) ──
    let catalog_admin_routes = Router::new()
        .route("/v1/admin/products", post(product::create_product))
        .route(
            "/v1/admin/products/{slug}",
            put(product::update_product).delete(product::delete_product),
        )
        .route("/v1/admin/categories", post(category::create_category))
        .route(
            "/v1/admin/categories/{slug}",
            put(category::update_category).delete(category::delete_category),
        )
        .route("/v1/admin/articles", post(article::create_article))
        .route(
            "/v1/admin/articles/{slug}",
            put(article::update_article).delete(article::delete_article),
        )
        .layer(middleware::from_fn(auth::bearer::require_bearer_or_session))
        .layer(axum::Extension(bearer_cache.clone()))
        .layer(axum::Extension(session_pool.clone()))
        .with_state(catalog_state);

    // ── Click counter audit (bearer or session) ──
    let audit_routes = Router::new()
        .route("/v1/admin/clicks/audit", get(audit::audit_counters))
        .route("/v1/admin/clicks/rebuild", post(audit::rebuild))
        .layer(middleware::from_fn(auth::bearer::require_bearer_or_session))
        .layer(axum::Extension(bearer_cache.clone()))
        .layer(axum::Extension(session_pool.clone()))
        .with_state(tracking_state);

    // ── Analytics (bearer analytics:read or session) ──
    let analytics_routes = Router::new()
        .route(
            "/v1/analytics/dashboard",
            get(analytics::handler::dashboard),
        )
        .layer(middleware::from_fn(auth::bearer::require_bearer_or_session))
        .layer(axum::Extension(bearer_cache.clone()))
        .layer(axum::Extension(session_pool.clone()))
        .with_state(analytics_state);

    // ── Token management (session only) ──
    let token_routes = Router::new()
        .route(
            "/v1/tokens",
            post(token_routes::create_token).get(token_routes::list_tokens),
        )
        .route("/v1/tokens/{id}", delete(token_routes::revoke_token))
        .layer(middleware::from_fn(auth::session::require_session_api))
        .layer(axum::Extension(session_pool))
        .with_state(token_state);

    let health_route = Router::new()
        .route("/health", get(health::health))
        .with_state(pool);

    // CORS for the operator API: restrict to configured origin with credentials
    let api_cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(
            config
                .server
                .allowed_origin
                .parse()
                .map_err(|e| format!("server.allowed_origin is not a valid header value: {e}"))?,
        ))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::COOKIE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true);

    let api_routes = Router::new()
        .merge(auth_routes)
        .merge(catalog_routes)
        .merge(catalog_admin_routes)
        .merge(audit_routes)
        .merge(analytics_routes)
        .merge(token_routes)
        .layer(api_cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    Ok(Router::new()
        .merge(click_routes)
        .merge(health_route)
        .merge(api_routes))
}
