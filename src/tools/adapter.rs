//! Adapter seam for tool execution.
//!
//! The registry maps an explicit adapter key or the credential's auth
//! type to an adapter. Adapters receive the full execution context —
//! parameters, non-secret metadata, the unsealed secret, grant
//! constraints, the shared HTTP client, and the guardrail limits — and
//! return a result envelope; the broker wraps every call with timing,
//! sanitization, and audit events.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BrokerConfig;
use crate::model::{AuthType, GrantConstraints};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Success,
    Error,
    Timeout,
    Denied,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallStatus::Success => "success",
            ToolCallStatus::Error => "error",
            ToolCallStatus::Timeout => "timeout",
            ToolCallStatus::Denied => "denied",
        }
    }
}

impl fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one tool execution attempt, sanitized before it leaves the
/// broker.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecutionResult {
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable machine kind for non-success outcomes
    /// (GRANT_DENIED, DENIED, TIMEOUT, RESPONSE_TOO_LARGE, UPSTREAM_ERROR).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_fingerprint: Option<String>,
}

impl ToolExecutionResult {
    pub fn success(result: Value, http_status: u16, fingerprint: String) -> Self {
        Self {
            status: ToolCallStatus::Success,
            result: Some(result),
            error: None,
            error_kind: None,
            http_status: Some(http_status),
            duration_ms: 0,
            request_fingerprint: Some(fingerprint),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolCallStatus::Error,
            result: None,
            error: Some(message.into()),
            error_kind: Some("UPSTREAM_ERROR"),
            http_status: None,
            duration_ms: 0,
            request_fingerprint: None,
        }
    }

    pub fn denied(message: impl Into<String>, kind: &'static str) -> Self {
        Self {
            status: ToolCallStatus::Denied,
            result: None,
            error: Some(message.into()),
            error_kind: Some(kind),
            http_status: None,
            duration_ms: 0,
            request_fingerprint: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: ToolCallStatus::Timeout,
            result: None,
            error: Some("external service timed out".to_string()),
            error_kind: Some("TIMEOUT"),
            http_status: None,
            duration_ms: 0,
            request_fingerprint: None,
        }
    }

    pub fn too_large(limit: usize, http_status: u16, fingerprint: String) -> Self {
        Self {
            status: ToolCallStatus::Error,
            result: None,
            error: Some(format!("response too large (limit: {limit} bytes)")),
            error_kind: Some("RESPONSE_TOO_LARGE"),
            http_status: Some(http_status),
            duration_ms: 0,
            request_fingerprint: Some(fingerprint),
        }
    }
}

/// Everything an adapter needs for one execution.
pub struct AdapterContext<'a> {
    pub tool_name: &'a str,
    pub parameters: &'a Value,
    pub auth_type: AuthType,
    /// Non-secret credential metadata (base_url, endpoints, auth layout).
    pub metadata: &'a Value,
    /// Unsealed secret document. Never logged, never returned.
    pub secret: &'a Value,
    pub constraints: Option<&'a GrantConstraints>,
    pub http: &'a reqwest::Client,
    pub limits: &'a BrokerConfig,
}

impl AdapterContext<'_> {
    /// Allowlist from the grant, falling back to credential metadata.
    pub fn allowed_hosts(&self) -> Option<Vec<String>> {
        if let Some(constraints) = self.constraints
            && let Some(hosts) = &constraints.allowed_hosts
        {
            return Some(hosts.clone());
        }
        self.metadata.get("allowed_hosts").and_then(|v| {
            v.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
        })
    }
}

#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn execute(&self, ctx: &AdapterContext<'_>) -> ToolExecutionResult;
}

/// Adapter registry keyed by explicit adapter name or auth-type wire name.
pub struct AdapterRegistry {
    adapters: DashMap<String, Arc<dyn ToolAdapter>>,
}

impl AdapterRegistry {
    pub fn with_builtins() -> Self {
        let registry = Self {
            adapters: DashMap::new(),
        };
        let rest: Arc<dyn ToolAdapter> = Arc::new(crate::tools::rest::RestAdapter);
        let oauth2: Arc<dyn ToolAdapter> = Arc::new(crate::tools::oauth2::OAuth2Adapter);
        let webhook: Arc<dyn ToolAdapter> = Arc::new(crate::tools::webhook::WebhookAdapter);
        for key in ["rest", "api_key", "bearer", "bearer_token", "basic", "basic_auth"] {
            registry.register(key, rest.clone());
        }
        for key in ["oauth2", "oauth2_token", "oauth2_client_credentials"] {
            registry.register(key, oauth2.clone());
        }
        registry.register("webhook", webhook);
        registry
    }

    pub fn register(&self, name: &str, adapter: Arc<dyn ToolAdapter>) {
        self.adapters.insert(name.to_string(), adapter);
    }

    /// Resolution order: explicit `adapter` key in the credential
    /// metadata, then the auth type when execution config is present.
    pub fn resolve(
        &self,
        metadata: &Value,
        auth_type: AuthType,
    ) -> Option<Arc<dyn ToolAdapter>> {
        if let Some(explicit) = metadata.get("adapter").and_then(|v| v.as_str())
            && let Some(adapter) = self.adapters.get(explicit)
        {
            return Some(adapter.clone());
        }
        if metadata.get("base_url").and_then(|v| v.as_str()).is_some() {
            return self
                .adapters
                .get(auth_type.as_str())
                .map(|adapter| adapter.clone());
        }
        None
    }
}
