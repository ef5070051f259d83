use deadpool_sqlite::Pool;

use crate::config::AuthConfig;

/// Shared state for operator login/logout.
#[derive(Clone)]
pub struct AuthState {
    pub pool: Pool,
    pub session_ttl_secs: u64,
    pub secure_cookies: bool,
}

impl AuthState {
    pub fn new(config: &AuthConfig, pool: Pool) -> Self {
        Self {
            pool,
            session_ttl_secs: config.session_ttl_secs,
            secure_cookies: config.secure_cookies,
        }
    }
}
