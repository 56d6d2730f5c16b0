//! HTTP surface: authentication, error bodies, optimistic-concurrency
//! statuses, and the SSE stream.

mod common;

use std::sync::Arc;

use common::{engine_with, test_config};
use openintent::auth::ApiKeyAuth;
use openintent::config::ApiKeyEntry;
use openintent::engine::Engine;
use openintent::model::AgentRole;
use openintent::server::create_app;
use openintent::tools::ToolBroker;
use serde_json::{Value, json};

const ORCH_KEY: &str = "oi_orchestrator_key";
const OBSERVER_KEY: &str = "oi_observer_key";
const GOVERNOR_KEY: &str = "oi_governor_key";

async fn spawn_server() -> (String, Arc<Engine>) {
    let mut config = test_config();
    config.api_keys = vec![
        ApiKeyEntry {
            api_key: ORCH_KEY.to_string(),
            agent_id: "orchestrator-1".to_string(),
            role: AgentRole::Orchestrator,
        },
        ApiKeyEntry {
            api_key: OBSERVER_KEY.to_string(),
            agent_id: "observer-1".to_string(),
            role: AgentRole::Observer,
        },
        ApiKeyEntry {
            api_key: GOVERNOR_KEY.to_string(),
            agent_id: "governor-1".to_string(),
            role: AgentRole::Governor,
        },
    ];
    let engine = engine_with(config.clone()).await;
    let tools = Arc::new(ToolBroker::new(engine.clone()).expect("broker"));
    let auth = Arc::new(ApiKeyAuth::from_entries(&config.api_keys));
    let app = create_app(engine.clone(), tools, auth);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), engine)
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn unknown_key_is_unauthenticated() {
    let (base, _engine) = spawn_server().await;
    let response = client()
        .get(format!("{base}/intents"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_kind"], "UNAUTHENTICATED");

    let response = client()
        .get(format!("{base}/intents"))
        .header("x-api-key", "bogus")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn observer_cannot_mutate() {
    let (base, _engine) = spawn_server().await;
    let response = client()
        .post(format!("{base}/intents"))
        .header("x-api-key", OBSERVER_KEY)
        .json(&json!({ "title": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_kind"], "UNAUTHORIZED");
}

#[tokio::test]
async fn version_conflict_returns_current_version() {
    let (base, _engine) = spawn_server().await;
    let created: Value = client()
        .post(format!("{base}/intents"))
        .header("x-api-key", ORCH_KEY)
        .json(&json!({ "title": "conflict over http" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let first = client()
        .patch(format!("{base}/intents/{id}/state"))
        .header("x-api-key", ORCH_KEY)
        .json(&json!({ "expected_version": 1, "patch": { "a": 1 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 200);

    let second = client()
        .patch(format!("{base}/intents/{id}/state"))
        .header("x-api-key", ORCH_KEY)
        .json(&json!({ "expected_version": 1, "patch": { "b": 2 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 409);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["error_kind"], "VERSION_CONFLICT");
    assert_eq!(body["current_version"], 2);
}

#[tokio::test]
async fn lease_conflict_carries_holder() {
    let (base, _engine) = spawn_server().await;
    let created: Value = client()
        .post(format!("{base}/intents"))
        .header("x-api-key", ORCH_KEY)
        .json(&json!({ "title": "lease over http" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let first = client()
        .post(format!("{base}/intents/{id}/leases"))
        .header("x-api-key", ORCH_KEY)
        .json(&json!({ "scope": "section.intro", "ttl_seconds": 60 }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 201);

    let second = client()
        .post(format!("{base}/intents/{id}/leases"))
        .header("x-api-key", GOVERNOR_KEY)
        .json(&json!({ "scope": "section.intro", "ttl_seconds": 60 }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 409);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["error_kind"], "LEASE_CONFLICT");
    assert_eq!(body["holder_agent_id"], "orchestrator-1");
}

#[tokio::test]
async fn unknown_intent_is_not_found() {
    let (base, _engine) = spawn_server().await;
    let response = client()
        .get(format!(
            "{base}/intents/00000000-0000-0000-0000-000000000001"
        ))
        .header("x-api-key", ORCH_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_kind"], "NOT_FOUND");
}

#[tokio::test]
async fn credential_registration_requires_governor() {
    let (base, _engine) = spawn_server().await;
    let payload = json!({
        "auth_type": "api_key",
        "metadata": { "base_url": "https://api.example.com" },
        "secret": { "api_key": "sk-xyz" },
    });

    let response = client()
        .post(format!("{base}/credentials"))
        .header("x-api-key", ORCH_KEY)
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = client()
        .post(format!("{base}/credentials"))
        .header("x-api-key", GOVERNOR_KEY)
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    // The secret never comes back.
    assert!(body.get("secret").is_none());
    assert!(!body.to_string().contains("sk-xyz"));
}

#[tokio::test]
async fn sse_stream_replays_and_follows() {
    let (base, engine) = spawn_server().await;
    let created: Value = client()
        .post(format!("{base}/intents"))
        .header("x-api-key", ORCH_KEY)
        .json(&json!({ "title": "sse" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    // Comment lands at sequence 2.
    client()
        .post(format!("{base}/intents/{id}/comments"))
        .header("x-api-key", ORCH_KEY)
        .json(&json!({ "message": "first note" }))
        .send()
        .await
        .unwrap();

    let response = client()
        .get(format!(
            "{base}/streams/events?intent_id={id}&from_sequence=1"
        ))
        .header("x-api-key", ORCH_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Live tail lands at sequence 3.
    let intent_id: uuid::Uuid = id.parse().unwrap();
    engine
        .add_comment(
            &openintent::model::AgentIdentity::new("orchestrator-1", AgentRole::Orchestrator),
            intent_id,
            "live note",
        )
        .await
        .unwrap();

    let mut seen = String::new();
    let mut response = response;
    for _ in 0..16 {
        match tokio::time::timeout(std::time::Duration::from_secs(2), response.chunk()).await {
            Ok(Ok(Some(chunk))) => {
                seen.push_str(&String::from_utf8_lossy(&chunk));
                if seen.contains("live note") {
                    break;
                }
            }
            _ => break,
        }
    }
    assert!(seen.contains("event: created"), "{seen}");
    assert!(seen.contains("first note"), "{seen}");
    assert!(seen.contains("live note"), "{seen}");
}
