mod common;

use common::{
    bearer_token, insert_click, login_cookie, seed_product, spawn_server, spawn_server_with,
};
use reviews::analytics::queries::compute_dashboard;
use reviews::analytics::types::{WindowDays, MS_PER_DAY};
use reviews::config::AnalyticsConfig;
use reviews::types::now_millis;

async fn get_dashboard(server: &common::TestServer, cookie: &str, query: &str) -> serde_json::Value {
    let resp = server
        .client
        .get(server.url(&format!("/v1/analytics/dashboard{query}")))
        .header("cookie", cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_dashboard_requires_auth() {
    let server = spawn_server().await;
    let resp = server
        .client
        .get(server.url("/v1/analytics/dashboard"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_dashboard_scope_enforced() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;
    let writer = bearer_token(&server, &cookie, &["catalog:write"]).await;
    let reader = bearer_token(&server, &cookie, &["analytics:read"]).await;

    let resp = server
        .client
        .get(server.url("/v1/analytics/dashboard"))
        .bearer_auth(&writer)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = server
        .client
        .get(server.url("/v1/analytics/dashboard"))
        .bearer_auth(&reader)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_empty_log() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;
    seed_product(&server.pool, "lamp", "Desk Lamp", 2999).await;

    let body = get_dashboard(&server, &cookie, "?days=30").await;
    assert_eq!(body["window_days"], 30);
    assert_eq!(body["top_products"].as_array().unwrap().len(), 0);
    assert_eq!(body["clicks_per_day"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_unparseable_window_uses_default() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;

    let default = get_dashboard(&server, &cookie, "").await;
    let garbage = get_dashboard(&server, &cookie, "?days=not-a-number").await;
    let negative = get_dashboard(&server, &cookie, "?days=-4").await;
    assert_eq!(default["window_days"], 7);
    assert_eq!(garbage["window_days"], 7);
    assert_eq!(negative["window_days"], 7);
}

#[tokio::test]
async fn test_oversized_window_clamped() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;
    let body = get_dashboard(&server, &cookie, "?days=100000").await;
    assert_eq!(body["window_days"], 3650);
}

#[tokio::test]
async fn test_top_products_ranked_by_clicks() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;
    let a = seed_product(&server.pool, "alpha", "Alpha", 1000).await;
    let b = seed_product(&server.pool, "bravo", "Bravo", 1000).await;
    seed_product(&server.pool, "charlie", "Charlie", 1000).await;

    let now = now_millis();
    for i in 0..3 {
        insert_click(&server.pool, b, now - 1000 - i).await;
    }
    for i in 0..5 {
        insert_click(&server.pool, a, now - 1000 - i).await;
    }

    let body = get_dashboard(&server, &cookie, "?days=7").await;
    let top = body["top_products"].as_array().unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0]["slug"], "alpha");
    assert_eq!(top[0]["clicks"], 5);
    assert_eq!(top[1]["slug"], "bravo");
    assert_eq!(top[1]["clicks"], 3);

    let per_day: i64 = body["clicks_per_day"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["clicks"].as_i64().unwrap())
        .sum();
    assert_eq!(per_day, 8);
}

#[tokio::test]
async fn test_clicks_outside_window_excluded() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;
    let id = seed_product(&server.pool, "lamp", "Desk Lamp", 2999).await;

    let now = now_millis();
    insert_click(&server.pool, id, now - 60_000).await;
    insert_click(&server.pool, id, now - 2 * MS_PER_DAY).await;
    insert_click(&server.pool, id, now - 10 * MS_PER_DAY).await;

    let body = get_dashboard(&server, &cookie, "?days=7").await;
    assert_eq!(body["top_products"][0]["clicks"], 2);

    let body = get_dashboard(&server, &cookie, "?days=30").await;
    assert_eq!(body["top_products"][0]["clicks"], 3);

    // Counter still includes everything
    assert_eq!(
        common::query_i64(&server.pool, &format!("SELECT clicks FROM products WHERE id = {id}")).await,
        3
    );
}

#[tokio::test]
async fn test_clicks_per_day_ascending() {
    let server = spawn_server().await;
    let a = seed_product(&server.pool, "alpha", "Alpha", 1000).await;

    // 2024-03-10T12:00:00Z
    let now = 1_710_072_000_000;
    let day_before = now - MS_PER_DAY;
    for i in 0..3 {
        insert_click(&server.pool, a, now - i).await;
    }
    for i in 0..2 {
        insert_click(&server.pool, a, day_before - i).await;
    }

    let conn = server.pool.get().await.unwrap();
    let dashboard = conn
        .interact(move |conn| compute_dashboard(conn, WindowDays::new(7), now, 10).unwrap())
        .await
        .unwrap();

    assert_eq!(dashboard.clicks_per_day.len(), 2);
    assert_eq!(dashboard.clicks_per_day[0].day, "2024-03-09");
    assert_eq!(dashboard.clicks_per_day[0].clicks, 2);
    assert_eq!(dashboard.clicks_per_day[1].day, "2024-03-10");
    assert_eq!(dashboard.clicks_per_day[1].clicks, 3);
}

#[tokio::test]
async fn test_default_settings_show_fresh_clicks() {
    let server = spawn_server_with(|cfg| cfg.analytics = AnalyticsConfig::default()).await;
    let cookie = login_cookie(&server).await;
    let id = seed_product(&server.pool, "lamp", "Desk Lamp", 2999).await;

    let before = get_dashboard(&server, &cookie, "?days=7").await;
    assert_eq!(before["top_products"].as_array().unwrap().len(), 0);

    insert_click(&server.pool, id, now_millis() - 1000).await;

    let after = get_dashboard(&server, &cookie, "?days=7").await;
    assert_eq!(after["top_products"][0]["clicks"], 1);
    assert_eq!(after["clicks_per_day"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_opt_in_cache_reuses_dashboard_per_window() {
    let server = spawn_server_with(|cfg| cfg.analytics.cache_ttl_secs = 300).await;
    let cookie = login_cookie(&server).await;
    let id = seed_product(&server.pool, "lamp", "Desk Lamp", 2999).await;

    let first = get_dashboard(&server, &cookie, "?days=7").await;
    assert_eq!(first["top_products"].as_array().unwrap().len(), 0);

    insert_click(&server.pool, id, now_millis() - 1000).await;

    let cached = get_dashboard(&server, &cookie, "?days=7").await;
    assert_eq!(cached["top_products"].as_array().unwrap().len(), 0);
    let other_window = get_dashboard(&server, &cookie, "?days=8").await;
    assert_eq!(other_window["top_products"][0]["clicks"], 1);
}
