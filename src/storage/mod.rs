//! Durable, transactional persistence on sea-orm / SQLite.
//!
//! The store holds six public namespaces — `intents`, `events` (keyed by
//! `(intent_id, sequence)`), `leases`, `portfolios` (+ memberships),
//! `costs`, `attachments` — plus the access-restricted `grants` /
//! `credentials` namespaces, `failures`, and `idempotency_keys`.
//!
//! Mutations that touch an intent and its log run inside one transaction:
//! the intent row carries `last_event_seq`, every committed transaction
//! advances it by the number of events it appends, and event rows are
//! inserted at the reserved sequences. Combined with the engine's
//! per-intent mutation lock this yields linearizable per-intent history
//! with gap-free, strictly increasing sequence numbers.

pub mod entity;
pub mod vault;

mod events;
mod grants;
mod intents;
mod leases;
mod ledger;
mod portfolios;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, ConnectionTrait};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

pub use intents::IntentChanges;
pub use vault::SecretVault;

use crate::errors::CoreError;

/// Schema bootstrap, executed statement by statement at connect time.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS intents (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        creator_agent_id TEXT NOT NULL,
        status TEXT NOT NULL,
        state TEXT NOT NULL,
        version INTEGER NOT NULL,
        constraints TEXT NOT NULL,
        parent_id TEXT,
        depends_on TEXT NOT NULL,
        retry_policy TEXT,
        aggregate TEXT,
        last_event_seq INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_intents_by_parent ON intents(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_intents_by_status ON intents(status)",
    "CREATE INDEX IF NOT EXISTS idx_intents_by_agent ON intents(creator_agent_id)",
    "CREATE TABLE IF NOT EXISTS events (
        intent_id TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        actor_agent_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (intent_id, sequence)
    )",
    "CREATE TABLE IF NOT EXISTS leases (
        id TEXT PRIMARY KEY,
        intent_id TEXT NOT NULL,
        scope TEXT NOT NULL,
        holder_agent_id TEXT NOT NULL,
        status TEXT NOT NULL,
        acquired_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_leases_scope ON leases(intent_id, scope)",
    "CREATE TABLE IF NOT EXISTS portfolios (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        governance_policy TEXT,
        aggregate TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS portfolio_members (
        portfolio_id TEXT NOT NULL,
        intent_id TEXT NOT NULL,
        role TEXT NOT NULL,
        priority INTEGER NOT NULL,
        added_at TEXT NOT NULL,
        PRIMARY KEY (portfolio_id, intent_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_members_by_intent ON portfolio_members(intent_id)",
    "CREATE TABLE IF NOT EXISTS costs (
        id TEXT PRIMARY KEY,
        intent_id TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        cost_type TEXT NOT NULL,
        amount REAL NOT NULL,
        currency TEXT NOT NULL,
        description TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_costs_by_intent ON costs(intent_id)",
    "CREATE TABLE IF NOT EXISTS attachments (
        id TEXT PRIMARY KEY,
        intent_id TEXT NOT NULL,
        filename TEXT NOT NULL,
        content_type TEXT NOT NULL,
        size INTEGER NOT NULL,
        sha256 TEXT NOT NULL,
        blob BLOB NOT NULL,
        metadata TEXT,
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_attachments_by_intent ON attachments(intent_id)",
    "CREATE TABLE IF NOT EXISTS failures (
        id TEXT PRIMARY KEY,
        intent_id TEXT NOT NULL,
        attempt_number INTEGER NOT NULL,
        error_type TEXT NOT NULL,
        error_message TEXT NOT NULL,
        recoverable INTEGER NOT NULL,
        context TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_failures_by_intent ON failures(intent_id)",
    "CREATE TABLE IF NOT EXISTS grants (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        tool_name TEXT NOT NULL,
        credential_id TEXT NOT NULL,
        constraints TEXT,
        expires_at TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_grants_agent_tool ON grants(agent_id, tool_name)",
    "CREATE TABLE IF NOT EXISTS credentials (
        id TEXT PRIMARY KEY,
        auth_type TEXT NOT NULL,
        metadata TEXT NOT NULL,
        secret TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS idempotency_keys (
        key TEXT PRIMARY KEY,
        intent_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
];

/// Handle over the durable namespaces. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
    vault: SecretVault,
}

impl Store {
    /// Connect and bootstrap the schema.
    ///
    /// In-memory databases are pinned to a single pooled connection so
    /// every handle sees the same database.
    pub async fn connect(database_url: &str, vault: SecretVault) -> Result<Self, CoreError> {
        let mut options = ConnectOptions::new(database_url.to_string());
        options.sqlx_logging(false);
        if database_url.contains(":memory:") {
            options.max_connections(1);
        }
        let db = Database::connect(options).await?;
        for statement in SCHEMA {
            db.execute_unprepared(statement).await?;
        }
        Ok(Self { db, vault })
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub(crate) fn vault(&self) -> &SecretVault {
        &self.vault
    }
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(raw).map_err(|e| CoreError::internal(format!("malformed uuid `{raw}`: {e}")))
}

pub(crate) fn to_json(value: &impl Serialize) -> Result<String, CoreError> {
    serde_json::to_string(value).map_err(|e| CoreError::internal(format!("serialize: {e}")))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, CoreError> {
    serde_json::from_str(raw).map_err(|e| CoreError::internal(format!("deserialize: {e}")))
}

pub(crate) fn json_or_null(raw: &Option<String>) -> Result<Option<Value>, CoreError> {
    raw.as_deref().map(from_json).transpose()
}
