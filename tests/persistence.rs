//! Durability: intents, events, leases, and grants outlive a reconnect.

mod common;

use std::sync::Arc;

use common::{orchestrator, worker};
use openintent::config::CoreConfig;
use openintent::engine::Engine;
use openintent::events::EventBroker;
use openintent::model::{EventType, IntentStatus, NewIntent};
use openintent::storage::{SecretVault, Store};
use serde_json::json;

async fn engine_at(database_url: &str) -> Arc<Engine> {
    let config = CoreConfig {
        database_url: database_url.to_string(),
        ..CoreConfig::default()
    };
    let vault = SecretVault::new(None).expect("vault");
    let store = Store::connect(database_url, vault).await.expect("connect");
    let broker = Arc::new(EventBroker::new(config.queue_capacity));
    Engine::new(store, broker, config)
}

#[tokio::test]
async fn state_survives_reconnect() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("openintent.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());

    let intent_id;
    {
        let engine = engine_at(&url).await;
        let agent = worker("agent-a");
        let intent = engine
            .create_intent(
                &orchestrator(),
                NewIntent {
                    title: "durable work".to_string(),
                    state: Some(json!({"phase": "draft"})),
                    ..NewIntent::default()
                },
            )
            .await
            .unwrap();
        intent_id = intent.id;
        engine
            .update_state(&agent, intent_id, 1, json!({"phase": "review"}))
            .await
            .unwrap();
        engine
            .set_status(&agent, intent_id, 2, IntentStatus::Active, None)
            .await
            .unwrap();
        engine
            .acquire_lease(&agent, intent_id, "section.body", 3_600)
            .await
            .unwrap();
    }

    // A fresh process over the same file sees everything.
    let engine = engine_at(&url).await;
    let intent = engine.get_intent(intent_id).await.unwrap();
    assert_eq!(intent.title, "durable work");
    assert_eq!(intent.status, IntentStatus::Active);
    assert_eq!(intent.version, 3);
    assert_eq!(intent.state, json!({"phase": "review"}));

    let events = engine.list_events(intent_id, 1, 100).await.unwrap();
    let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            EventType::Created,
            EventType::StatePatched,
            EventType::StatusChanged,
            EventType::LeaseAcquired,
        ]
    );

    let leases = engine.list_leases(intent_id).await.unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].holder_agent_id, "agent-a");

    // The lease table still enforces exclusivity across the restart.
    let err = engine
        .acquire_lease(&worker("agent-b"), intent_id, "section.body", 60)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "LEASE_CONFLICT");
}
