//! The coordination services.
//!
//! One [`Engine`] owns the store handle, the event broker, and the
//! per-intent mutation locks. Components are constructed by the server
//! lifecycle and passed explicitly, so tests build isolated instances.
//!
//! Every mutating operation on an intent runs under that intent's async
//! lock: the storage transaction commits and the resulting events are
//! published to the broker before the lock is released, so subscribers
//! observe events in commit order.

mod governance;
mod graph;
mod intents;
mod leases;
mod portfolios;
mod retry;
mod runtime;

pub use graph::IntentGraph;
pub use retry::FailureReport;
pub use runtime::BackgroundTasks;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::events::EventBroker;
use crate::model::IntentEvent;
use crate::storage::Store;

pub struct Engine {
    store: Store,
    broker: Arc<EventBroker>,
    config: CoreConfig,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    /// Serializes creations sharing an idempotency key, so a racing
    /// retry observes the original instead of creating a duplicate.
    idempotency_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Portfolios already flagged for governance thresholds, so the
    /// events fire on the crossing rather than on every recompute.
    flagged_cost: DashMap<Uuid, ()>,
    flagged_timeout: DashMap<Uuid, ()>,
}

impl Engine {
    pub fn new(store: Store, broker: Arc<EventBroker>, config: CoreConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            broker,
            config,
            locks: DashMap::new(),
            idempotency_locks: DashMap::new(),
            flagged_cost: DashMap::new(),
            flagged_timeout: DashMap::new(),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Serialize mutators of one intent. Commit order under this lock is
    /// publish order.
    pub(crate) async fn lock_intent(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(id).or_default().clone();
        mutex.lock_owned().await
    }

    /// Serialize creations carrying the same idempotency key, so the
    /// lookup and the insert are one atomic step per key.
    pub(crate) async fn lock_idempotency_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self.idempotency_locks.entry(key.to_string()).or_default().clone();
        mutex.lock_owned().await
    }

    pub(crate) fn publish(&self, events: &[IntentEvent]) {
        self.broker.publish_all(events);
    }
}
