//! Tool broker end to end against a local upstream: grant checks, URL
//! guardrails, secret isolation, signatures, token refresh, rate limits,
//! size caps, and timeouts.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use common::{create_intent, engine_with, test_config, worker};
use openintent::engine::Engine;
use openintent::model::{
    AuthType, Credential, EventType, GrantConstraints, RateLimit, ToolGrant,
};
use openintent::tools::{ToolBroker, ToolCallStatus};
use serde_json::{Value, json};
use uuid::Uuid;

const SIGNING_SECRET: &str = "whsec_local_testing_only";

#[derive(Clone)]
struct Upstream {
    hits: Arc<AtomicUsize>,
}

async fn spawn_upstream() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = Upstream { hits: hits.clone() };
    let router = Router::new()
        .route("/echo", post(echo))
        .route("/query_echo", get(query_echo))
        .route("/big", get(big))
        .route("/slow", get(slow))
        .route("/guarded", get(guarded))
        .route("/token", post(token))
        .route("/hook", post(hook))
        .with_state(upstream);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (format!("http://{addr}"), hits)
}

async fn echo(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({ "api_key": presented, "echo": body, "ok": true }))
}

async fn query_echo(State(upstream): State<Upstream>, uri: axum::http::Uri) -> Json<Value> {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "query": uri.query().unwrap_or_default() }))
}

async fn big(State(upstream): State<Upstream>) -> String {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    "x".repeat(4_096)
}

async fn slow(State(upstream): State<Upstream>) -> Json<Value> {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(std::time::Duration::from_millis(2_500)).await;
    Json(json!({ "ok": true }))
}

async fn guarded(State(upstream): State<Upstream>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer fresh-token") => (StatusCode::OK, Json(json!({ "ok": true }))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "expired" }))),
    }
}

async fn token(State(upstream): State<Upstream>) -> Json<Value> {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "access_token": "fresh-token", "token_type": "bearer" }))
}

async fn hook(State(upstream): State<Upstream>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    let presented = headers
        .get("x-openintent-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, SIGNING_SECRET.as_bytes());
    let expected = format!("sha256={}", hex::encode(ring::hmac::sign(&key, &body).as_ref()));
    Json(json!({ "signature_ok": presented == expected }))
}

async fn grant_tool(
    engine: &Engine,
    agent_id: &str,
    tool_name: &str,
    auth_type: AuthType,
    metadata: Value,
    secret: Value,
    constraints: Option<GrantConstraints>,
) {
    let credential = Credential {
        id: Uuid::new_v4(),
        auth_type,
        metadata,
        created_at: Utc::now(),
    };
    engine
        .store()
        .put_credential(&credential, &secret)
        .await
        .expect("credential");
    engine
        .store()
        .put_grant(&ToolGrant {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            tool_name: tool_name.to_string(),
            credential_id: credential.id,
            constraints,
            expires_at: None,
            created_at: Utc::now(),
        })
        .await
        .expect("grant");
}

fn loopback_config() -> openintent::config::CoreConfig {
    let mut config = test_config();
    config.broker.allow_loopback = true;
    config
}

#[tokio::test]
async fn rest_invocation_redacts_upstream_secrets() {
    let engine = engine_with(loopback_config()).await;
    let broker = ToolBroker::new(engine.clone()).unwrap();
    let (base_url, _hits) = spawn_upstream().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "S6 secret isolation").await;

    let secret_value = "sk-AAAA-super-secret-value";
    grant_tool(
        &engine,
        "agent-a",
        "echo",
        AuthType::ApiKey,
        json!({
            "base_url": base_url,
            "endpoints": { "echo": { "path": "/echo", "method": "POST", "param_mapping": "body" } },
            "auth": { "location": "header", "header_name": "X-API-Key" },
        }),
        json!({ "api_key": secret_value }),
        None,
    )
    .await;

    let result = broker
        .invoke(&agent, intent.id, "echo", json!({ "q": "hello" }))
        .await
        .unwrap();
    assert_eq!(result.status, ToolCallStatus::Success);
    let payload = result.result.expect("payload");
    // The upstream echoed the real key; the broker must never surface it.
    assert_eq!(payload["api_key"], "[REDACTED]");
    assert!(!payload.to_string().contains(secret_value));
    assert_eq!(payload["echo"]["q"], "hello");
    assert_eq!(result.request_fingerprint.as_ref().map(|f| f.len()), Some(16));

    // Audit events bracket the call, and the completed payload is clean.
    let events = engine.list_events(intent.id, 1, 100).await.unwrap();
    let started = events
        .iter()
        .find(|e| e.event_type == EventType::ToolCallStarted)
        .expect("started event");
    assert_eq!(started.payload["tool_name"], "echo");
    let completed = events
        .iter()
        .find(|e| e.event_type == EventType::ToolCallCompleted)
        .expect("completed event");
    assert_eq!(completed.payload["status"], "success");
    assert!(!completed.payload.to_string().contains(secret_value));
}

#[tokio::test]
async fn caller_query_params_override_auth_param() {
    let engine = engine_with(loopback_config()).await;
    let broker = ToolBroker::new(engine.clone()).unwrap();
    let (base_url, hits) = spawn_upstream().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "query collision").await;

    grant_tool(
        &engine,
        "agent-a",
        "search",
        AuthType::ApiKey,
        json!({
            "base_url": base_url,
            "endpoints": { "search": { "path": "/query_echo", "method": "GET" } },
            "auth": { "location": "query", "query_param": "apikey" },
        }),
        json!({ "api_key": "sk-auth-query-value" }),
        None,
    )
    .await;

    let result = broker
        .invoke(
            &agent,
            intent.id,
            "search",
            json!({ "apikey": "from-caller", "q": "rust" }),
        )
        .await
        .unwrap();
    assert_eq!(result.status, ToolCallStatus::Success);
    let payload = result.result.expect("payload");
    let query = payload["query"].as_str().expect("query string");
    // The colliding key is serialized once, with the caller's value.
    assert_eq!(query.matches("apikey=").count(), 1, "{query}");
    assert!(query.contains("apikey=from-caller"), "{query}");
    assert!(!query.contains("sk-auth-query-value"), "{query}");
    assert!(query.contains("q=rust"), "{query}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn loopback_denied_without_socket_by_default() {
    // Default guardrails: loopback stays blocked.
    let engine = engine_with(test_config()).await;
    let broker = ToolBroker::new(engine.clone()).unwrap();
    let (base_url, hits) = spawn_upstream().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "guard").await;

    grant_tool(
        &engine,
        "agent-a",
        "echo",
        AuthType::ApiKey,
        json!({
            "base_url": base_url,
            "endpoints": { "echo": { "path": "/echo", "method": "POST" } },
        }),
        json!({ "api_key": "k" }),
        None,
    )
    .await;

    let result = broker
        .invoke(&agent, intent.id, "echo", json!({}))
        .await
        .unwrap();
    assert_eq!(result.status, ToolCallStatus::Denied);
    assert_eq!(result.error_kind, Some("DENIED"));
    // The listener never saw a connection.
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn allowlist_blocks_foreign_hosts() {
    let engine = engine_with(loopback_config()).await;
    let broker = ToolBroker::new(engine.clone()).unwrap();
    let (base_url, hits) = spawn_upstream().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "allowlist").await;

    grant_tool(
        &engine,
        "agent-a",
        "echo",
        AuthType::ApiKey,
        json!({
            "base_url": base_url,
            "endpoints": { "echo": { "path": "/echo", "method": "POST" } },
        }),
        json!({ "api_key": "k" }),
        Some(GrantConstraints {
            allowed_hosts: Some(vec!["api.example.com".to_string()]),
            rate_limit: None,
        }),
    )
    .await;

    let result = broker
        .invoke(&agent, intent.id, "echo", json!({}))
        .await
        .unwrap();
    assert_eq!(result.status, ToolCallStatus::Denied);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_grant_is_denied_with_audit() {
    let engine = engine_with(loopback_config()).await;
    let broker = ToolBroker::new(engine.clone()).unwrap();
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "no grant").await;

    let result = broker
        .invoke(&agent, intent.id, "search", json!({}))
        .await
        .unwrap();
    assert_eq!(result.status, ToolCallStatus::Denied);
    assert_eq!(result.error_kind, Some("GRANT_DENIED"));

    let events = engine.list_events(intent.id, 1, 100).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == EventType::ToolCallStarted));
    let completed = events
        .iter()
        .find(|e| e.event_type == EventType::ToolCallCompleted)
        .expect("completed");
    assert_eq!(completed.payload["status"], "denied");
}

#[tokio::test]
async fn rate_limit_window_denies_excess_calls() {
    let engine = engine_with(loopback_config()).await;
    let broker = ToolBroker::new(engine.clone()).unwrap();
    let (base_url, _hits) = spawn_upstream().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "rate limit").await;

    grant_tool(
        &engine,
        "agent-a",
        "echo",
        AuthType::ApiKey,
        json!({
            "base_url": base_url,
            "endpoints": { "echo": { "path": "/echo", "method": "POST" } },
        }),
        json!({ "api_key": "k" }),
        Some(GrantConstraints {
            allowed_hosts: None,
            rate_limit: Some(RateLimit {
                max_calls: 2,
                window_secs: 60,
            }),
        }),
    )
    .await;

    for _ in 0..2 {
        let result = broker
            .invoke(&agent, intent.id, "echo", json!({}))
            .await
            .unwrap();
        assert_eq!(result.status, ToolCallStatus::Success);
    }
    let result = broker
        .invoke(&agent, intent.id, "echo", json!({}))
        .await
        .unwrap();
    assert_eq!(result.status, ToolCallStatus::Denied);
    assert_eq!(result.error_kind, Some("GRANT_DENIED"));
}

#[tokio::test]
async fn oversized_response_is_rejected() {
    let mut config = loopback_config();
    config.broker.max_response_bytes = 1_024;
    let engine = engine_with(config).await;
    let broker = ToolBroker::new(engine.clone()).unwrap();
    let (base_url, _hits) = spawn_upstream().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "too large").await;

    grant_tool(
        &engine,
        "agent-a",
        "big",
        AuthType::ApiKey,
        json!({
            "base_url": base_url,
            "endpoints": { "big": { "path": "/big", "method": "GET" } },
        }),
        json!({ "api_key": "k" }),
        None,
    )
    .await;

    let result = broker
        .invoke(&agent, intent.id, "big", json!({}))
        .await
        .unwrap();
    assert_eq!(result.status, ToolCallStatus::Error);
    assert_eq!(result.error_kind, Some("RESPONSE_TOO_LARGE"));
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let engine = engine_with(loopback_config()).await;
    let broker = ToolBroker::new(engine.clone()).unwrap();
    let (base_url, _hits) = spawn_upstream().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "timeout").await;

    grant_tool(
        &engine,
        "agent-a",
        "slow",
        AuthType::ApiKey,
        json!({
            "base_url": base_url,
            "endpoints": { "slow": { "path": "/slow", "method": "GET" } },
            "timeout_ms": 1_000,
        }),
        json!({ "api_key": "k" }),
        None,
    )
    .await;

    let result = broker
        .invoke(&agent, intent.id, "slow", json!({}))
        .await
        .unwrap();
    assert_eq!(result.status, ToolCallStatus::Timeout);
    assert_eq!(result.error_kind, Some("TIMEOUT"));
}

#[tokio::test]
async fn webhook_envelope_is_signed() {
    let engine = engine_with(loopback_config()).await;
    let broker = ToolBroker::new(engine.clone()).unwrap();
    let (base_url, _hits) = spawn_upstream().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "webhook").await;

    grant_tool(
        &engine,
        "agent-a",
        "notify",
        AuthType::Webhook,
        json!({ "base_url": format!("{base_url}/hook") }),
        json!({ "signing_secret": SIGNING_SECRET }),
        None,
    )
    .await;

    let result = broker
        .invoke(&agent, intent.id, "notify", json!({ "level": "info" }))
        .await
        .unwrap();
    assert_eq!(result.status, ToolCallStatus::Success);
    assert_eq!(result.result.expect("payload")["signature_ok"], json!(true));
}

#[tokio::test]
async fn oauth2_refreshes_once_on_401() {
    let engine = engine_with(loopback_config()).await;
    let broker = ToolBroker::new(engine.clone()).unwrap();
    let (base_url, hits) = spawn_upstream().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "oauth2").await;

    grant_tool(
        &engine,
        "agent-a",
        "lookup",
        AuthType::Oauth2,
        json!({
            "base_url": base_url,
            "endpoints": { "lookup": { "path": "/guarded", "method": "GET" } },
            "token_url": format!("{base_url}/token"),
            "token_grant_type": "client_credentials",
        }),
        json!({
            "access_token": "stale-token",
            "client_id": "client-1",
            "client_secret": "cs-1",
        }),
        None,
    )
    .await;

    let result = broker
        .invoke(&agent, intent.id, "lookup", json!({}))
        .await
        .unwrap();
    assert_eq!(result.status, ToolCallStatus::Success);
    let payload = result.result.expect("payload");
    assert_eq!(payload["_refreshed"], json!(true));
    // Stale call + token call + retried call.
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn expired_grant_is_denied() {
    let engine = engine_with(loopback_config()).await;
    let broker = ToolBroker::new(engine.clone()).unwrap();
    let (base_url, _hits) = spawn_upstream().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "expired grant").await;

    let credential = Credential {
        id: Uuid::new_v4(),
        auth_type: AuthType::ApiKey,
        metadata: json!({
            "base_url": base_url,
            "endpoints": { "echo": { "path": "/echo", "method": "POST" } },
        }),
        created_at: Utc::now(),
    };
    engine
        .store()
        .put_credential(&credential, &json!({ "api_key": "k" }))
        .await
        .unwrap();
    engine
        .store()
        .put_grant(&ToolGrant {
            id: Uuid::new_v4(),
            agent_id: "agent-a".to_string(),
            tool_name: "echo".to_string(),
            credential_id: credential.id,
            constraints: None,
            expires_at: Some(Utc::now() - chrono::Duration::minutes(5)),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let result = broker
        .invoke(&agent, intent.id, "echo", json!({}))
        .await
        .unwrap();
    assert_eq!(result.status, ToolCallStatus::Denied);
    assert_eq!(result.error_kind, Some("GRANT_DENIED"));
}
