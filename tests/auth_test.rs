mod common;

use common::{bearer_token, exec, login_cookie, query_i64, spawn_server, TestServer};
use reviews::auth::operators::create_operator;
use reviews::auth::session::prune_expired_sessions;
use serde_json::{json, Value};

async fn login_as(server: &TestServer, username: &str, password: &str) -> reqwest::Response {
    server
        .client
        .post(server.url("/auth/login"))
        .json(&json!({"username": username, "password": password}))
        .send()
        .await
        .unwrap()
}

fn cookie_of(resp: &reqwest::Response) -> String {
    resp.headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

async fn dashboard_status(server: &TestServer, token: &str) -> u16 {
    server
        .client
        .get(server.url("/v1/analytics/dashboard"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .status()
        .as_u16()
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let server = spawn_server().await;
    create_operator(&server.pool, "editor", "correct-horse", false)
        .await
        .unwrap();

    let resp = login_as(&server, "editor", "wrong-password").await;
    assert_eq!(resp.status(), 401);
    assert!(resp.headers().get("set-cookie").is_none());

    let resp = login_as(&server, "nobody", "correct-horse").await;
    assert_eq!(resp.status(), 401);

    let resp = login_as(&server, "editor", "correct-horse").await;
    assert_eq!(resp.status(), 200);
    let set_cookie = resp.headers().get("set-cookie").unwrap().to_str().unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["username"], "editor");
    assert_eq!(body["is_admin"], false);
}

#[tokio::test]
async fn test_duplicate_operator_and_short_password() {
    let server = spawn_server().await;
    create_operator(&server.pool, "editor", "correct-horse", false)
        .await
        .unwrap();
    assert!(create_operator(&server.pool, "editor", "another-pass", false)
        .await
        .is_err());
    assert!(create_operator(&server.pool, "second", "short", false)
        .await
        .is_err());
}

#[tokio::test]
async fn test_session_token_stored_hashed() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;
    let plaintext = cookie.split_once('=').unwrap().1.to_string();

    let stored = query_i64(
        &server.pool,
        &format!("SELECT COUNT(*) FROM sessions WHERE token = '{plaintext}'"),
    )
    .await;
    assert_eq!(stored, 0);
    assert_eq!(query_i64(&server.pool, "SELECT COUNT(*) FROM sessions").await, 1);
}

#[tokio::test]
async fn test_logout_invalidates_session() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;

    let resp = server
        .client
        .get(server.url("/v1/tokens"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = server
        .client
        .post(server.url("/auth/logout"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("Max-Age=0"));

    let resp = server
        .client
        .get(server.url("/v1/tokens"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_token_routes_require_session() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;
    let token = bearer_token(&server, &cookie, &["analytics:read", "catalog:write"]).await;

    // A bearer token cannot mint more tokens
    let resp = server
        .client
        .post(server.url("/v1/tokens"))
        .bearer_auth(&token)
        .json(&json!({"name": "escalate", "scopes": ["catalog:write"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_token_request_validation() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;

    for body in [
        json!({"name": "", "scopes": ["analytics:read"]}),
        json!({"name": "x", "scopes": []}),
        json!({"name": "x", "scopes": ["admin:everything"]}),
        json!({"name": "x", "scopes": ["analytics:read"], "expires_in_days": 0}),
    ] {
        let resp = server
            .client
            .post(server.url("/v1/tokens"))
            .header("cookie", &cookie)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{body}");
    }
}

#[tokio::test]
async fn test_token_lifecycle() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;

    let resp = server
        .client
        .post(server.url("/v1/tokens"))
        .header("cookie", &cookie)
        .json(&json!({"name": "reporting", "scopes": ["analytics:read"], "expires_in_days": 30}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    let token = created["token"].as_str().unwrap().to_string();
    let id = created["id"].as_str().unwrap().to_string();
    assert!(token.starts_with("reviews_tk_"));
    assert!(created["expires_at"].is_i64());

    assert_eq!(dashboard_status(&server, &token).await, 200);

    let list: Value = server
        .client
        .get(server.url("/v1/tokens"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "reporting");
    assert!(list[0].get("token").is_none());

    let resp = server
        .client
        .delete(server.url(&format!("/v1/tokens/{id}")))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    assert_eq!(dashboard_status(&server, &token).await, 401);

    let resp = server
        .client
        .delete(server.url(&format!("/v1/tokens/{id}")))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_expired_token_rejected() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;
    let token = bearer_token(&server, &cookie, &["analytics:read"]).await;

    exec(&server.pool, "UPDATE api_tokens SET expires_at = 1").await;
    assert_eq!(dashboard_status(&server, &token).await, 401);
}

#[tokio::test]
async fn test_garbage_bearer_rejected() {
    let server = spawn_server().await;
    assert_eq!(dashboard_status(&server, "reviews_tk_not-a-real-token").await, 401);
}

#[tokio::test]
async fn test_non_admin_cannot_revoke_others_tokens() {
    let server = spawn_server().await;
    let admin_cookie = login_cookie(&server).await;
    bearer_token(&server, &admin_cookie, &["analytics:read"]).await;

    create_operator(&server.pool, "writer", "correct-horse", false)
        .await
        .unwrap();
    let resp = login_as(&server, "writer", "correct-horse").await;
    let writer_cookie = cookie_of(&resp);

    let tokens: Value = server
        .client
        .get(server.url("/v1/tokens"))
        .header("cookie", &writer_cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tokens.as_array().unwrap().len(), 0);

    let admin_tokens: Value = server
        .client
        .get(server.url("/v1/tokens"))
        .header("cookie", &admin_cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = admin_tokens[0]["id"].as_str().unwrap();

    let resp = server
        .client
        .delete(server.url(&format!("/v1/tokens/{id}")))
        .header("cookie", &writer_cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_login_rate_limit_ignores_untrusted_forwarded_for() {
    let server = common::spawn_server_with(|cfg| {
        cfg.rate_limit.auth_per_second = 60;
        cfg.rate_limit.auth_burst_size = 2;
    })
    .await;

    let mut statuses = Vec::new();
    for i in 0..6 {
        let resp = server
            .client
            .post(server.url("/auth/login"))
            .header("x-forwarded-for", format!("198.51.100.{i}"))
            .json(&json!({"username": "nobody", "password": format!("guess-number-{i}")}))
            .send()
            .await
            .unwrap();
        statuses.push(resp.status().as_u16());
    }

    assert_eq!(&statuses[..2], &[401, 401]);
    assert!(statuses[2..].iter().all(|s| *s == 429), "{statuses:?}");
}

#[tokio::test]
async fn test_login_storage_failure_is_server_error() {
    let server = spawn_server().await;
    exec(&server.pool, "DROP TABLE operators").await;

    let resp = login_as(&server, "editor", "correct-horse").await;
    assert_eq!(resp.status(), 500);
    assert!(resp.headers().get("set-cookie").is_none());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "internal server error");
}

#[tokio::test]
async fn test_prune_removes_only_expired_sessions() {
    let server = spawn_server().await;
    login_cookie(&server).await;
    exec(
        &server.pool,
        "INSERT INTO sessions (token, operator_id, created_at, expires_at)
         SELECT 'stale-hash', id, 1, 2 FROM operators WHERE username = 'editor'",
    )
    .await;

    let deleted = prune_expired_sessions(&server.pool, 1_000).await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(query_i64(&server.pool, "SELECT COUNT(*) FROM sessions").await, 1);
}

#[tokio::test]
async fn test_session_lookup_failure_is_server_error() {
    let server = spawn_server().await;
    let cookie = login_cookie(&server).await;
    exec(&server.pool, "DROP TABLE sessions").await;

    let resp = server
        .client
        .get(server.url("/v1/tokens"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
}
