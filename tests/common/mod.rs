#![allow(dead_code)]

use deadpool_sqlite::Pool;
use reviews::config::{
    AnalyticsConfig, AppConfig, AuthConfig, CatalogConfig, ClickConfig, DatabaseConfig,
    RateLimitConfig, ServerConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;

pub struct TestServer {
    pub addr: SocketAddr,
    pub pool: Pool,
    pub client: reqwest::Client,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub fn test_config(db_path: PathBuf) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            trusted_proxies: Vec::new(),
            allowed_origin: "http://localhost:8080".to_string(),
        },
        database: DatabaseConfig {
            path: db_path,
            pool_size: 8,
        },
        auth: AuthConfig {
            session_ttl_secs: 3600,
            secure_cookies: false,
        },
        // Generous limits so concurrent test traffic is never throttled
        rate_limit: RateLimitConfig {
            per_second: 1,
            burst_size: 10_000,
            auth_per_second: 1,
            auth_burst_size: 10_000,
        },
        clicks: ClickConfig::default(),
        analytics: AnalyticsConfig {
            cache_ttl_secs: 0,
            ..AnalyticsConfig::default()
        },
        catalog: CatalogConfig::default(),
    }
}

/// Temp DB with migrations applied. The file is leaked so it outlives the test.
pub async fn setup_pool() -> (Pool, PathBuf) {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let db_path = tmp.path().to_path_buf();
    std::mem::forget(tmp);

    let pool = reviews::storage::sqlite::create_pool(&DatabaseConfig {
        path: db_path.clone(),
        pool_size: 8,
    })
    .unwrap();
    reviews::storage::sqlite::init_pool(&pool).await.unwrap();
    (pool, db_path)
}

pub async fn spawn_server() -> TestServer {
    spawn_server_with(|_| {}).await
}

pub async fn spawn_server_with(adjust: impl FnOnce(&mut AppConfig)) -> TestServer {
    let (pool, db_path) = setup_pool().await;
    let mut config = test_config(db_path);
    adjust(&mut config);

    let app = reviews::app::build_router(&config, pool.clone()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    // Give server a moment to start
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestServer { addr, pool, client }
}

pub async fn exec(pool: &Pool, sql: &str) {
    let sql = sql.to_string();
    let conn = pool.get().await.unwrap();
    conn.interact(move |conn| conn.execute_batch(&sql).unwrap())
        .await
        .unwrap();
}

pub async fn query_i64(pool: &Pool, sql: &str) -> i64 {
    let sql = sql.to_string();
    let conn = pool.get().await.unwrap();
    conn.interact(move |conn| conn.query_row(&sql, [], |row| row.get::<_, i64>(0)).unwrap())
        .await
        .unwrap()
}

/// Insert a product directly and return its id.
pub async fn seed_product(pool: &Pool, slug: &str, name: &str, price_cents: i64) -> i64 {
    let (slug, name) = (slug.to_string(), name.to_string());
    let conn = pool.get().await.unwrap();
    conn.interact(move |conn| {
        conn.execute(
            "INSERT INTO products (name, slug, price_cents, affiliate_link)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![name, slug, price_cents, format!("https://shop.example/{slug}")],
        )
        .unwrap();
        conn.last_insert_rowid()
    })
    .await
    .unwrap()
}

pub async fn insert_click(pool: &Pool, product_id: i64, created_at: i64) {
    let conn = pool.get().await.unwrap();
    conn.interact(move |conn| {
        reviews::tracking::recorder::append_click(conn, product_id, created_at, None, None)
            .unwrap();
        reviews::tracking::recorder::increment_clicks(conn, product_id).unwrap();
    })
    .await
    .unwrap();
}

/// Create an admin operator, log in over HTTP, and return the `Cookie` header value.
pub async fn login_cookie(server: &TestServer) -> String {
    reviews::auth::operators::create_operator(&server.pool, "editor", "correct-horse", true)
        .await
        .unwrap();

    let resp = server
        .client
        .post(server.url("/auth/login"))
        .json(&serde_json::json!({"username": "editor", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let set_cookie = resp
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    set_cookie.split(';').next().unwrap().to_string()
}

/// Mint a bearer token with `scopes` through the session-only token API.
pub async fn bearer_token(server: &TestServer, cookie: &str, scopes: &[&str]) -> String {
    let resp = server
        .client
        .post(server.url("/v1/tokens"))
        .header("cookie", cookie)
        .json(&serde_json::json!({"name": "test", "scopes": scopes}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}
