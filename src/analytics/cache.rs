use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

use super::types::{Dashboard, WindowDays};

/// Recently computed dashboards keyed by window. A TTL of zero disables caching.
pub struct DashboardCache {
    inner: Option<Cache<WindowDays, Arc<Dashboard>>>,
}

impl DashboardCache {
    pub fn new(ttl_secs: u64) -> Self {
        let inner = (ttl_secs > 0).then(|| {
            Cache::builder()
                .time_to_live(Duration::from_secs(ttl_secs))
                .max_capacity(64)
                .build()
        });
        Self { inner }
    }

    pub fn get(&self, window: WindowDays) -> Option<Arc<Dashboard>> {
        self.inner.as_ref()?.get(&window)
    }

    pub fn insert(&self, window: WindowDays, dashboard: Arc<Dashboard>) {
        if let Some(cache) = &self.inner {
            cache.insert(window, dashboard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dashboard(days: i64) -> Arc<Dashboard> {
        Arc::new(Dashboard {
            window_days: days,
            top_products: Vec::new(),
            clicks_per_day: Vec::new(),
        })
    }

    #[test]
    fn test_keyed_by_window() {
        let cache = DashboardCache::new(30);
        cache.insert(WindowDays::new(7), dashboard(7));
        assert_eq!(cache.get(WindowDays::new(7)).unwrap().window_days, 7);
        assert!(cache.get(WindowDays::new(30)).is_none());
    }

    #[test]
    fn test_zero_ttl_disables() {
        let cache = DashboardCache::new(0);
        cache.insert(WindowDays::new(7), dashboard(7));
        assert!(cache.get(WindowDays::new(7)).is_none());
    }
}
