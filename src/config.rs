use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub clicks: ClickConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Peers allowed to set X-Forwarded-For / X-Real-IP (exact IPs or CIDR ranges).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Origin allowed to call the operator API from a browser.
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
}

fn default_allowed_origin() -> String {
    "http://localhost:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

fn default_session_ttl() -> u64 {
    604800 // 7 days
}

fn default_secure_cookies() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_second")]
    pub per_second: u64,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    #[serde(default = "default_auth_per_second")]
    pub auth_per_second: u64,
    #[serde(default = "default_auth_burst_size")]
    pub auth_burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: default_per_second(),
            burst_size: default_burst_size(),
            auth_per_second: default_auth_per_second(),
            auth_burst_size: default_auth_burst_size(),
        }
    }
}

fn default_per_second() -> u64 {
    1
}
fn default_burst_size() -> u32 {
    30
}
fn default_auth_per_second() -> u64 {
    5
}
fn default_auth_burst_size() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClickConfig {
    /// User agents longer than this are cut on a char boundary before storage.
    #[serde(default = "default_max_user_agent_chars")]
    pub max_user_agent_chars: usize,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            max_user_agent_chars: default_max_user_agent_chars(),
        }
    }
}

fn default_max_user_agent_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default = "default_window_days")]
    pub default_window_days: i64,
    #[serde(default = "default_max_window_days")]
    pub max_window_days: i64,
    #[serde(default = "default_top_n")]
    pub top_n: i64,
    /// Dashboard cache TTL. The default 0 recomputes every request; a positive
    /// value serves dashboards up to that many seconds old.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_window_days: default_window_days(),
            max_window_days: default_max_window_days(),
            top_n: default_top_n(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_window_days() -> i64 {
    7
}
fn default_max_window_days() -> i64 {
    3650
}
fn default_top_n() -> i64 {
    20
}
fn default_cache_ttl() -> u64 {
    0
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_page_size() -> i64 {
    6
}
fn default_max_page_size() -> i64 {
    50
}

impl AppConfig {
    /// Reject values that would make the service misbehave at runtime.
    pub fn validate(&self) -> Result<(), String> {
        if self.database.pool_size == 0 {
            return Err("database.pool_size must be at least 1".to_string());
        }
        if self.clicks.max_user_agent_chars == 0 || self.clicks.max_user_agent_chars > 500 {
            return Err("clicks.max_user_agent_chars must be between 1 and 500".to_string());
        }
        if self.analytics.default_window_days < 1 {
            return Err("analytics.default_window_days must be positive".to_string());
        }
        if self.analytics.max_window_days < self.analytics.default_window_days {
            return Err(
                "analytics.max_window_days must not be below analytics.default_window_days"
                    .to_string(),
            );
        }
        if self.analytics.top_n < 1 {
            return Err("analytics.top_n must be positive".to_string());
        }
        if self.catalog.page_size < 1 || self.catalog.page_size > self.catalog.max_page_size {
            return Err("catalog.page_size must be between 1 and catalog.max_page_size".to_string());
        }
        if self.rate_limit.per_second == 0 || self.rate_limit.auth_per_second == 0 {
            return Err("rate_limit per_second values must be positive".to_string());
        }
        Ok(())
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        // Load from config file
        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // Overlay with environment variables (REVIEWS__SERVER__PORT=3001, etc.)
        builder = builder.add_source(
            Environment::with_prefix("REVIEWS")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
