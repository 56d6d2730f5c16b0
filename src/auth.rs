//! API-key authentication and role gating.
//!
//! Keys map to an agent identity with a role. Observers are read-only;
//! grant and credential administration requires the governor role. Keys
//! are loaded from configuration at boot and may be registered at
//! runtime by the embedding process.

use dashmap::DashMap;

use crate::config::ApiKeyEntry;
use crate::errors::CoreError;
use crate::model::{AgentIdentity, AgentRole};

/// Header carrying the API key on every request.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Default)]
pub struct ApiKeyAuth {
    keys: DashMap<String, AgentIdentity>,
}

impl ApiKeyAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[ApiKeyEntry]) -> Self {
        let auth = Self::new();
        for entry in entries {
            auth.register(&entry.api_key, AgentIdentity::new(&entry.agent_id, entry.role));
        }
        auth
    }

    pub fn register(&self, api_key: &str, identity: AgentIdentity) {
        self.keys.insert(api_key.to_string(), identity);
    }

    pub fn revoke(&self, api_key: &str) {
        self.keys.remove(api_key);
    }

    /// Resolve a key to its identity; unknown keys are rejected without
    /// detail.
    pub fn authenticate(&self, api_key: &str) -> Result<AgentIdentity, CoreError> {
        self.keys
            .get(api_key)
            .map(|entry| entry.clone())
            .ok_or(CoreError::Unauthenticated)
    }

    /// Reject read-only roles on mutating calls.
    pub fn require_writer(identity: &AgentIdentity) -> Result<(), CoreError> {
        if !identity.role.can_write() {
            return Err(CoreError::Unauthorized(format!(
                "role {} is read-only",
                identity.role
            )));
        }
        Ok(())
    }

    /// Grant/credential administration and decisions require governors.
    pub fn require_governor(identity: &AgentIdentity) -> Result<(), CoreError> {
        if identity.role != AgentRole::Governor {
            return Err(CoreError::Unauthorized(format!(
                "role {} cannot administer governance",
                identity.role
            )));
        }
        Ok(())
    }
}
