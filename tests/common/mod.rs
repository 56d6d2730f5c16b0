//! Shared harness: an engine over a fresh in-memory database per test.
#![allow(dead_code)]

use std::sync::Arc;

use openintent::config::CoreConfig;
use openintent::engine::Engine;
use openintent::events::EventBroker;
use openintent::model::{AgentIdentity, AgentRole, Intent, NewIntent};
use openintent::storage::{SecretVault, Store};

pub fn test_config() -> CoreConfig {
    CoreConfig {
        database_url: "sqlite::memory:".to_string(),
        ..CoreConfig::default()
    }
}

pub async fn engine_with(config: CoreConfig) -> Arc<Engine> {
    let vault = SecretVault::new(None).expect("vault");
    let store = Store::connect(&config.database_url, vault)
        .await
        .expect("connect");
    let broker = Arc::new(EventBroker::new(config.queue_capacity));
    Engine::new(store, broker, config)
}

pub async fn test_engine() -> Arc<Engine> {
    engine_with(test_config()).await
}

pub fn worker(agent_id: &str) -> AgentIdentity {
    AgentIdentity::new(agent_id, AgentRole::Worker)
}

pub fn orchestrator() -> AgentIdentity {
    AgentIdentity::new("orchestrator-1", AgentRole::Orchestrator)
}

pub fn governor() -> AgentIdentity {
    AgentIdentity::new("governor-1", AgentRole::Governor)
}

pub async fn create_intent(engine: &Engine, title: &str) -> Intent {
    engine
        .create_intent(
            &orchestrator(),
            NewIntent {
                title: title.to_string(),
                ..NewIntent::default()
            },
        )
        .await
        .expect("create intent")
}
