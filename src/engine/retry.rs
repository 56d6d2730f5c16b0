//! Retry and failure accounting.
//!
//! `record_failure` increments the attempt number, appends
//! FAILURE_RECORDED, and then either schedules a retry (the external
//! worker does the waiting) or exhausts the budget and drives the intent
//! to FAILED — all in one transaction.

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::errors::CoreError;
use crate::model::validate;
use crate::model::{
    AgentIdentity, EventType, FailureRecord, Intent, IntentStatus, PendingEvent, RetryPolicy,
};
use crate::storage::IntentChanges;

/// Parameters for one failure report.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub error_type: String,
    pub error_message: String,
    pub recoverable: bool,
    pub context: Option<Value>,
}

impl Engine {
    pub async fn set_retry_policy(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        expected_version: i64,
        policy: RetryPolicy,
    ) -> Result<Intent, CoreError> {
        if policy.base_delay_ms == 0 || policy.max_delay_ms < policy.base_delay_ms {
            return Err(CoreError::validation(
                "retry policy delays must satisfy 0 < base_delay_ms <= max_delay_ms".to_string(),
            ));
        }
        if policy.failure_threshold == 0 {
            return Err(CoreError::validation(
                "failure_threshold must be positive".to_string(),
            ));
        }
        let _guard = self.lock_intent(id).await;
        let current = self.store().get_intent(id).await?;
        if current.status.is_terminal() {
            return Err(CoreError::validation(format!(
                "intent {id} is {} and no longer accepts mutations",
                current.status
            )));
        }
        let event = PendingEvent::new(
            EventType::RetryPolicySet,
            actor.agent_id.clone(),
            json!({ "retry_policy": policy }),
        );
        let (intent, events) = self
            .store()
            .mutate_intent(
                id,
                expected_version,
                IntentChanges {
                    retry_policy: Some(policy),
                    ..IntentChanges::default()
                },
                vec![event],
            )
            .await?;
        self.publish(&events);
        Ok(intent)
    }

    /// Record one failed attempt and apply the policy.
    pub async fn record_failure(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        report: FailureReport,
    ) -> Result<FailureRecord, CoreError> {
        validate::require_non_empty(&report.error_type, "error_type")?;
        let _guard = self.lock_intent(id).await;
        let intent = self.store().get_intent(id).await?;
        if intent.status.is_terminal() {
            return Err(CoreError::validation(format!(
                "intent {id} is {} and no longer accepts failures",
                intent.status
            )));
        }
        let policy = intent.retry_policy.clone().unwrap_or_default();
        let attempt_number = self.store().failure_count(id).await? + 1;
        let record = FailureRecord {
            id: Uuid::new_v4(),
            intent_id: id,
            attempt_number,
            error_type: report.error_type.clone(),
            error_message: report.error_message.clone(),
            recoverable: report.recoverable,
            context: report.context.clone(),
            created_at: Utc::now(),
        };

        let mut events = vec![PendingEvent::new(
            EventType::FailureRecorded,
            actor.agent_id.clone(),
            json!({
                "attempt_number": attempt_number,
                "error_type": report.error_type,
                "error_message": report.error_message,
                "recoverable": report.recoverable,
            }),
        )];

        let exhausted = !report.recoverable || policy.exhausted(attempt_number);
        let mut escalate = None;
        if exhausted {
            events.push(PendingEvent::new(
                EventType::RetryExhausted,
                actor.agent_id.clone(),
                json!({
                    "attempts": attempt_number,
                    "recoverable": report.recoverable,
                }),
            ));
            if intent.status.can_transition(IntentStatus::Failed) {
                events.push(PendingEvent::new(
                    EventType::StatusChanged,
                    actor.agent_id.clone(),
                    json!({
                        "from": intent.status,
                        "to": IntentStatus::Failed,
                        "reason": "retry budget exhausted",
                    }),
                ));
                escalate = Some((intent.version, IntentStatus::Failed));
            }
            info!(intent_id = %id, attempt_number, "retry budget exhausted");
        } else {
            let delay_ms = policy.delay_for_attempt(attempt_number);
            events.push(PendingEvent::new(
                EventType::RetryScheduled,
                actor.agent_id.clone(),
                json!({
                    "attempt_number": attempt_number,
                    "delay_ms": delay_ms,
                    "strategy": policy.strategy,
                }),
            ));
        }

        let committed = self.store().apply_failure(&record, escalate, events).await?;
        self.publish(&committed);
        Ok(record)
    }

    /// Ordered attempt history.
    pub async fn get_attempts(&self, id: Uuid) -> Result<Vec<FailureRecord>, CoreError> {
        let _ = self.store().get_intent(id).await?;
        self.store().failures_for_intent(id).await
    }

    /// Reconciler pass: escalate ACTIVE/BLOCKED intents whose recorded
    /// failures already meet the threshold (covers escalations missed by
    /// a crash between accounting and transition).
    pub async fn reconcile_retry_thresholds(&self) -> Result<(), CoreError> {
        for status in [IntentStatus::Active, IntentStatus::Blocked] {
            let filter = crate::model::IntentFilter {
                status: Some(status),
                ..Default::default()
            };
            for intent in self.store().list_intents(&filter).await? {
                let Some(policy) = intent.retry_policy.clone() else {
                    continue;
                };
                let attempts = self.store().failure_count(intent.id).await?;
                if attempts == 0 || !policy.exhausted(attempts) {
                    continue;
                }
                let _guard = self.lock_intent(intent.id).await;
                let fresh = self.store().get_intent(intent.id).await?;
                if fresh.status.is_terminal()
                    || !fresh.status.can_transition(IntentStatus::Failed)
                {
                    continue;
                }
                let event = PendingEvent::new(
                    EventType::StatusChanged,
                    "system".to_string(),
                    json!({
                        "from": fresh.status,
                        "to": IntentStatus::Failed,
                        "reason": "retry threshold reconciled",
                    }),
                );
                match self
                    .store()
                    .mutate_intent(
                        fresh.id,
                        fresh.version,
                        IntentChanges {
                            status: Some(IntentStatus::Failed),
                            ..IntentChanges::default()
                        },
                        vec![event],
                    )
                    .await
                {
                    Ok((_, committed)) => self.publish(&committed),
                    Err(e) => warn!(intent_id = %fresh.id, error = %e, "reconcile failed"),
                }
            }
        }
        Ok(())
    }
}
