use serde::{Deserialize, Serialize};

pub const MS_PER_DAY: i64 = 86_400_000;
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Query parameters for the dashboard. `days` stays a string so garbage can be
/// recovered from instead of rejected by the extractor.
#[derive(Debug, Default, Deserialize)]
pub struct DashboardParams {
    pub days: Option<String>,
}

/// Trailing window length in whole days, always within `1..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowDays(i64);

impl WindowDays {
    /// Parse an untrusted value. Missing, non-integer or non-positive input
    /// becomes `default`; oversized values are clamped to `max`.
    pub fn parse(raw: Option<&str>, default: i64, max: i64) -> Self {
        let days = raw
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|d| *d >= 1)
            .unwrap_or(default);
        WindowDays(days.clamp(1, max.max(1)))
    }

    pub fn new(days: i64) -> Self {
        WindowDays(days.max(1))
    }

    pub fn days(self) -> i64 {
        self.0
    }

    /// Inclusive lower bound on `created_at` for a window ending at `now_ms`.
    pub fn cutoff(self, now_ms: i64) -> i64 {
        now_ms - self.0.saturating_mul(MS_PER_DAY)
    }
}

impl Default for WindowDays {
    fn default() -> Self {
        WindowDays(DEFAULT_WINDOW_DAYS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopProduct {
    pub product_id: i64,
    pub slug: String,
    pub name: String,
    pub clicks: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyClicks {
    /// UTC calendar day, `YYYY-MM-DD`.
    pub day: String,
    pub clicks: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dashboard {
    pub window_days: i64,
    pub top_products: Vec<TopProduct>,
    pub clicks_per_day: Vec<DailyClicks>,
}
