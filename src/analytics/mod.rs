pub mod cache;
pub mod handler;
pub mod queries;
pub mod types;

use crate::config::AnalyticsConfig;
use crate::error::{AppError, AppResult};
use cache::DashboardCache;
use deadpool_sqlite::Pool;
use std::sync::Arc;
use types::{Dashboard, WindowDays};

/// Shared state for analytics endpoints.
pub struct AnalyticsState {
    pub pool: Pool,
    pub cache: DashboardCache,
    pub config: AnalyticsConfig,
}

impl AnalyticsState {
    pub fn new(pool: Pool, config: AnalyticsConfig) -> Self {
        let cache = DashboardCache::new(config.cache_ttl_secs);
        Self {
            pool,
            cache,
            config,
        }
    }

    /// Dashboard for `window`, served from cache when a fresh copy exists.
    pub async fn dashboard(&self, window: WindowDays) -> AppResult<Arc<Dashboard>> {
        if let Some(cached) = self.cache.get(window) {
            return Ok(cached);
        }

        let top_n = self.config.top_n;
        let now_ms = crate::types::now_millis();
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
        let dashboard = conn
            .interact(move |conn| queries::compute_dashboard(conn, window, now_ms, top_n))
            .await
            .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

        let dashboard = Arc::new(dashboard);
        self.cache.insert(window, dashboard.clone());
        Ok(dashboard)
    }
}
