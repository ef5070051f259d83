pub mod audit;
pub mod client;
pub mod handler;
pub mod recorder;

use deadpool_sqlite::Pool;
use std::sync::Arc;

use self::client::TrustedProxies;

pub struct TrackingState {
    pub pool: Pool,
    pub trusted_proxies: Arc<TrustedProxies>,
    pub max_user_agent_chars: usize,
}
