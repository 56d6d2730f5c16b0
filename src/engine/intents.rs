//! Intent lifecycle operations: create, read, list, state patches with
//! optimistic concurrency, status transitions, constraints, and audit
//! appends.

use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::Engine;
use crate::errors::CoreError;
use crate::model::validate;
use crate::model::{
    AgentIdentity, EventType, Intent, IntentEvent, IntentFilter, IntentStatus, NewIntent,
    PendingEvent, shallow_merge,
};
use crate::storage::IntentChanges;

impl Engine {
    /// Create an intent. When `idempotency_key` is set and was seen within
    /// the configured window, the original intent is returned instead.
    pub async fn create_intent(
        &self,
        actor: &AgentIdentity,
        mut params: NewIntent,
    ) -> Result<Intent, CoreError> {
        validate::validate_title(&params.title)?;
        if let Some(description) = &params.description {
            validate::validate_description(description)?;
        }
        if let Some(state) = &params.state {
            validate::validate_state_object(state, "state")?;
        }
        if params.creator_agent_id.is_empty() {
            params.creator_agent_id = actor.agent_id.clone();
        }
        validate::validate_agent_id(&params.creator_agent_id)?;

        // Held until the create commits, so a racing retry with the same
        // key waits here and then finds the original in the lookup.
        let mut _idempotency_guard = None;
        if let Some(key) = params.idempotency_key.clone() {
            _idempotency_guard = Some(self.lock_idempotency_key(&key).await);
            let cutoff = Utc::now() - Duration::seconds(self.config().idempotency_window_secs);
            if let Some(existing) = self.store().idempotency_lookup(&key, cutoff).await? {
                debug!(%existing, key, "idempotency key replayed");
                return self.store().get_intent(existing).await;
            }
        }

        if let Some(parent_id) = params.parent_id
            && self.store().try_get_intent(parent_id).await?.is_none()
        {
            return Err(CoreError::validation(format!(
                "parent intent {parent_id} does not exist"
            )));
        }
        for dependency in &params.depends_on {
            if self.store().try_get_intent(*dependency).await?.is_none() {
                return Err(CoreError::validation(format!(
                    "dependency intent {dependency} does not exist"
                )));
            }
        }

        let idempotency_key = params.idempotency_key.clone();
        let intent = Intent::new(params);
        let created = PendingEvent::new(
            EventType::Created,
            actor.agent_id.clone(),
            json!({
                "title": intent.title,
                "creator_agent_id": intent.creator_agent_id,
                "parent_id": intent.parent_id,
                "depends_on": intent.depends_on,
            }),
        );
        let event = self
            .store()
            .create_intent(&intent, created, idempotency_key.as_deref())
            .await?;
        info!(intent_id = %intent.id, title = %intent.title, "intent created");
        self.publish(std::slice::from_ref(&event));
        Ok(intent)
    }

    /// Create a child under `parent_id`; dependencies must already exist.
    pub async fn create_child(
        &self,
        actor: &AgentIdentity,
        parent_id: Uuid,
        mut params: NewIntent,
    ) -> Result<Intent, CoreError> {
        params.parent_id = Some(parent_id);
        self.create_intent(actor, params).await
    }

    pub async fn get_intent(&self, id: Uuid) -> Result<Intent, CoreError> {
        self.store().get_intent(id).await
    }

    pub async fn list_intents(&self, filter: &IntentFilter) -> Result<Vec<Intent>, CoreError> {
        self.store().list_intents(filter).await
    }

    /// Top-level shallow merge of `patch` into the state document.
    pub async fn update_state(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        expected_version: i64,
        patch: Value,
    ) -> Result<Intent, CoreError> {
        validate::validate_state_object(&patch, "patch")?;
        let _guard = self.lock_intent(id).await;
        let current = self.store().get_intent(id).await?;
        reject_terminal(&current)?;
        let merged = shallow_merge(&current.state, &patch);
        let event = PendingEvent::new(
            EventType::StatePatched,
            actor.agent_id.clone(),
            json!({ "patch": patch }),
        );
        let (intent, events) = self
            .store()
            .mutate_intent(
                id,
                expected_version,
                IntentChanges {
                    state: Some(merged),
                    ..IntentChanges::default()
                },
                vec![event],
            )
            .await?;
        self.publish(&events);
        Ok(intent)
    }

    /// Replace the whole state document. The explicit counterpart to the
    /// shallow-merge patch.
    pub async fn replace_state(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        expected_version: i64,
        state: Value,
    ) -> Result<Intent, CoreError> {
        validate::validate_state_object(&state, "state")?;
        let _guard = self.lock_intent(id).await;
        let current = self.store().get_intent(id).await?;
        reject_terminal(&current)?;
        let event = PendingEvent::new(
            EventType::StateReplaced,
            actor.agent_id.clone(),
            json!({ "state": state }),
        );
        let (intent, events) = self
            .store()
            .mutate_intent(
                id,
                expected_version,
                IntentChanges {
                    state: Some(state),
                    ..IntentChanges::default()
                },
                vec![event],
            )
            .await?;
        self.publish(&events);
        Ok(intent)
    }

    pub async fn set_status(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        expected_version: i64,
        status: IntentStatus,
        reason: Option<String>,
    ) -> Result<Intent, CoreError> {
        let _guard = self.lock_intent(id).await;
        let current = self.store().get_intent(id).await?;
        if !current.status.can_transition(status) {
            return Err(CoreError::validation(format!(
                "cannot transition from {} to {}",
                current.status, status
            )));
        }
        let event = PendingEvent::new(
            EventType::StatusChanged,
            actor.agent_id.clone(),
            json!({
                "from": current.status,
                "to": status,
                "reason": reason,
            }),
        );
        let (intent, events) = self
            .store()
            .mutate_intent(
                id,
                expected_version,
                IntentChanges {
                    status: Some(status),
                    ..IntentChanges::default()
                },
                vec![event],
            )
            .await?;
        info!(intent_id = %id, from = %current.status, to = %status, "status changed");
        self.publish(&events);
        Ok(intent)
    }

    pub async fn set_constraints(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        expected_version: i64,
        constraints: Vec<String>,
    ) -> Result<Intent, CoreError> {
        let _guard = self.lock_intent(id).await;
        let current = self.store().get_intent(id).await?;
        reject_terminal(&current)?;
        let event = PendingEvent::new(
            EventType::ConstraintsUpdated,
            actor.agent_id.clone(),
            json!({ "constraints": constraints }),
        );
        let (intent, events) = self
            .store()
            .mutate_intent(
                id,
                expected_version,
                IntentChanges {
                    constraints: Some(constraints),
                    ..IntentChanges::default()
                },
                vec![event],
            )
            .await?;
        self.publish(&events);
        Ok(intent)
    }

    /// Append a client audit event (comments, LLM/stream/tool audit).
    /// Accepted on terminal intents; never bumps the version.
    pub async fn append_audit_event(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        event_type: EventType,
        payload: Value,
    ) -> Result<IntentEvent, CoreError> {
        if !is_client_appendable(event_type) {
            return Err(CoreError::validation(format!(
                "event type {event_type} is engine-emitted and cannot be appended directly"
            )));
        }
        let _guard = self.lock_intent(id).await;
        let events = self
            .store()
            .append_events(
                id,
                vec![PendingEvent::new(event_type, actor.agent_id.clone(), payload)],
            )
            .await?;
        self.publish(&events);
        Ok(events.into_iter().next().expect("one appended event"))
    }

    /// Page through an intent's log.
    pub async fn list_events(
        &self,
        id: Uuid,
        from_sequence: i64,
        limit: u64,
    ) -> Result<Vec<IntentEvent>, CoreError> {
        // Existence check keeps 404 semantics for unknown intents.
        let _ = self.store().get_intent(id).await?;
        self.store().events_page(id, from_sequence.max(1), limit).await
    }
}

fn reject_terminal(intent: &Intent) -> Result<(), CoreError> {
    if intent.status.is_terminal() {
        return Err(CoreError::validation(format!(
            "intent {} is {} and no longer accepts mutations",
            intent.id, intent.status
        )));
    }
    Ok(())
}

/// Event kinds clients may append through the events endpoint. Everything
/// else is emitted by the engine as a side effect of its operations.
fn is_client_appendable(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::Comment
            | EventType::LlmRequestStarted
            | EventType::LlmRequestCompleted
            | EventType::LlmRequestFailed
            | EventType::StreamStarted
            | EventType::StreamChunk
            | EventType::StreamCompleted
            | EventType::StreamCancelled
            | EventType::ToolCallStarted
            | EventType::ToolCallCompleted
    )
}
