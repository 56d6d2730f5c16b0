//! Tool-execution broker.
//!
//! `invoke` turns a grant-validated tool call into a real external
//! request: resolve the grant and its constraints, unseal the credential
//! inside the broker only, dispatch through the adapter registry, and
//! sanitize everything that leaves. TOOL_CALL_STARTED and
//! TOOL_CALL_COMPLETED are appended to the intent's log around every
//! invocation, regardless of outcome.

mod adapter;
mod guard;
mod oauth2;
mod rest;
mod sanitize;
mod webhook;

pub use adapter::{
    AdapterContext, AdapterRegistry, ToolAdapter, ToolCallStatus, ToolExecutionResult,
};
pub use guard::validate_url;
pub use oauth2::OAuth2Adapter;
pub use rest::RestAdapter;
pub use sanitize::{clamp_timeout, fingerprint, sanitize_value, strip_secrets};
pub use webhook::{SIGNATURE_HEADER, WebhookAdapter};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::engine::Engine;
use crate::errors::CoreError;
use crate::model::{AgentIdentity, EventType, PendingEvent, ToolGrant};

pub struct ToolBroker {
    engine: Arc<Engine>,
    registry: AdapterRegistry,
    http: reqwest::Client,
    limits: BrokerConfig,
    /// Sliding rate-limit windows keyed by grant id.
    windows: DashMap<Uuid, VecDeque<Instant>>,
}

impl ToolBroker {
    pub fn new(engine: Arc<Engine>) -> Result<Self, CoreError> {
        let limits = engine.config().broker.clone();
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent("OpenIntent-Server/1.0")
            .build()
            .map_err(|e| CoreError::internal(format!("http client: {e}")))?;
        Ok(Self {
            engine,
            registry: AdapterRegistry::with_builtins(),
            http,
            limits,
            windows: DashMap::new(),
        })
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Execute `tool_name` for `actor`, auditing on `intent_id`'s log.
    pub async fn invoke(
        &self,
        actor: &AgentIdentity,
        intent_id: Uuid,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolExecutionResult, CoreError> {
        let _ = self.engine.store().get_intent(intent_id).await?;
        self.audit(
            actor,
            intent_id,
            EventType::ToolCallStarted,
            json!({
                "tool_name": tool_name,
                "parameters": sanitize_value(&parameters, 0),
            }),
        )
        .await?;

        let started = Instant::now();
        let mut result = self.execute_checked(actor, tool_name, &parameters).await?;
        result.duration_ms = started.elapsed().as_millis() as u64;
        if let Some(payload) = &result.result {
            result.result = Some(sanitize_value(payload, 0));
        }
        if let Some(error) = &result.error {
            result.error = Some(strip_secrets(error));
        }

        info!(
            %intent_id,
            tool_name,
            status = %result.status,
            duration_ms = result.duration_ms,
            "tool call finished"
        );
        self.audit(
            actor,
            intent_id,
            EventType::ToolCallCompleted,
            json!({
                "tool_name": tool_name,
                "status": result.status,
                "http_status": result.http_status,
                "duration_ms": result.duration_ms,
                "request_fingerprint": result.request_fingerprint,
                "error": result.error,
                "result": result.result,
            }),
        )
        .await?;
        Ok(result)
    }

    /// Grant checks plus adapter dispatch. Guardrail failures come back as
    /// result envelopes, never as errors; only storage failures propagate.
    async fn execute_checked(
        &self,
        actor: &AgentIdentity,
        tool_name: &str,
        parameters: &Value,
    ) -> Result<ToolExecutionResult, CoreError> {
        let grant = match self
            .engine
            .store()
            .find_grant(&actor.agent_id, tool_name)
            .await?
        {
            Some(grant) => grant,
            None => {
                return Ok(ToolExecutionResult::denied(
                    format!("no grant for agent `{}` on tool `{tool_name}`", actor.agent_id),
                    "GRANT_DENIED",
                ));
            }
        };
        if grant.is_expired(Utc::now()) {
            return Ok(ToolExecutionResult::denied(
                "grant expired".to_string(),
                "GRANT_DENIED",
            ));
        }
        if let Some(reason) = self.over_rate_limit(&grant) {
            return Ok(ToolExecutionResult::denied(reason, "GRANT_DENIED"));
        }

        let credential = self.engine.store().credential(grant.credential_id).await?;
        // The only place a secret document is unsealed.
        let secret = self
            .engine
            .store()
            .credential_secret(grant.credential_id)
            .await?;

        let Some(adapter) = self.registry.resolve(&credential.metadata, credential.auth_type)
        else {
            warn!(tool_name, "no adapter configured");
            return Ok(ToolExecutionResult::error(format!(
                "no execution adapter configured for tool `{tool_name}`"
            )));
        };

        let ctx = AdapterContext {
            tool_name,
            parameters,
            auth_type: credential.auth_type,
            metadata: &credential.metadata,
            secret: &secret,
            constraints: grant.constraints.as_ref(),
            http: &self.http,
            limits: &self.limits,
        };
        Ok(adapter.execute(&ctx).await)
    }

    /// Sliding-window rate limiting per grant; returns the denial reason
    /// when the window is full.
    fn over_rate_limit(&self, grant: &ToolGrant) -> Option<String> {
        let limit = grant.constraints.as_ref()?.rate_limit.as_ref()?;
        let mut window = self.windows.entry(grant.id).or_default();
        let cutoff = Instant::now().checked_sub(Duration::from_secs(limit.window_secs));
        if let Some(cutoff) = cutoff {
            while window.front().is_some_and(|t| *t < cutoff) {
                window.pop_front();
            }
        }
        if window.len() >= limit.max_calls as usize {
            return Some(format!(
                "rate limit exceeded: {} calls per {}s",
                limit.max_calls, limit.window_secs
            ));
        }
        window.push_back(Instant::now());
        None
    }

    async fn audit(
        &self,
        actor: &AgentIdentity,
        intent_id: Uuid,
        event_type: EventType,
        payload: Value,
    ) -> Result<(), CoreError> {
        let _guard = self.engine.lock_intent(intent_id).await;
        let events = self
            .engine
            .store()
            .append_events(
                intent_id,
                vec![PendingEvent::new(event_type, actor.agent_id.clone(), payload)],
            )
            .await?;
        self.engine.broker().publish_all(&events);
        Ok(())
    }
}
