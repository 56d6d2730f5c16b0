//! Engine configuration.
//!
//! Plain serde structs with hand-written defaults. The server binary reads
//! an optional JSON config file and falls back to `CoreConfig::default()`.

use serde::{Deserialize, Serialize};

use crate::model::AgentRole;

/// Top-level configuration for the engine and its HTTP surface.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CoreConfig {
    /// sea-orm connection URL, e.g. `sqlite://openintent.db?mode=rwc`.
    pub database_url: String,
    /// Listen address for the HTTP surface.
    pub bind_addr: String,
    /// Wake interval for the lease-expiry sweeper, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Wake interval for the retry-threshold reconciler, in milliseconds.
    pub reconcile_interval_ms: u64,
    /// Capacity of each subscriber queue.
    pub queue_capacity: usize,
    /// Page size used when draining the durable log into a stream.
    pub replay_page_size: u64,
    /// Window within which a duplicate idempotency key returns the
    /// original intent, in seconds.
    pub idempotency_window_secs: i64,
    /// How long graceful shutdown waits for in-flight work, in milliseconds.
    pub drain_deadline_ms: u64,
    /// Static API keys loaded at boot.
    pub api_keys: Vec<ApiKeyEntry>,
    /// Hex-encoded 32-byte key for credential encryption at rest. When
    /// absent, secrets are stored opaque but unencrypted.
    pub credential_key_hex: Option<String>,
    pub broker: BrokerConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://openintent.db?mode=rwc".to_string(),
            bind_addr: "127.0.0.1:5000".to_string(),
            sweep_interval_ms: 1_000,
            reconcile_interval_ms: 10_000,
            queue_capacity: 1_024,
            replay_page_size: 256,
            idempotency_window_secs: 86_400,
            drain_deadline_ms: 5_000,
            api_keys: Vec::new(),
            credential_key_hex: None,
            broker: BrokerConfig::default(),
        }
    }
}

/// One static API key mapping, loaded at boot.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiKeyEntry {
    pub api_key: String,
    pub agent_id: String,
    pub role: AgentRole,
}

/// Guardrails for the tool-execution broker.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerConfig {
    pub default_timeout_ms: u64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_response_bytes: usize,
    /// Permit loopback targets. Only ever enabled by tests and local
    /// development setups; the default blocklist stands otherwise.
    pub allow_loopback: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            min_timeout_ms: 1_000,
            max_timeout_ms: 120_000,
            max_response_bytes: 1_048_576,
            allow_loopback: false,
        }
    }
}
