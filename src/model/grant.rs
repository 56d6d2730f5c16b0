//! Tool grants and credentials.
//!
//! A grant is a `(agent, tool, credential, constraints)` tuple authorizing
//! tool invocation through the broker. Credentials split into non-secret
//! `metadata` (base URL, endpoint layout, auth placement) and a `secret`
//! document that is only ever read inside the broker at execution time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    ApiKey,
    Bearer,
    Basic,
    Oauth2,
    Webhook,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::ApiKey => "api_key",
            AuthType::Bearer => "bearer",
            AuthType::Basic => "basic",
            AuthType::Oauth2 => "oauth2",
            AuthType::Webhook => "webhook",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_key" => Ok(AuthType::ApiKey),
            "bearer" | "bearer_token" => Ok(AuthType::Bearer),
            "basic" | "basic_auth" => Ok(AuthType::Basic),
            "oauth2" | "oauth2_token" | "oauth2_client_credentials" => Ok(AuthType::Oauth2),
            "webhook" => Ok(AuthType::Webhook),
            other => Err(format!("unknown auth type: {other}")),
        }
    }
}

/// Sliding-window rate limit attached to a grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimit {
    pub max_calls: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GrantConstraints {
    /// Exact host names; a request host must equal one of them or be a
    /// subdomain thereof.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_hosts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolGrant {
    pub id: Uuid,
    pub agent_id: String,
    pub tool_name: String,
    pub credential_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<GrantConstraints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ToolGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A credential as seen outside the broker: the secret document never
/// appears here. The broker resolves secrets from the restricted
/// namespace at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub auth_type: AuthType,
    /// Non-secret execution config: base_url, endpoints, auth placement,
    /// timeout_ms, token_url, adapter override, …
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}
