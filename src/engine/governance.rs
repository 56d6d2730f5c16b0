//! Governance operations: comments, arbitration, decisions, the cost
//! ledger, and attachments.
//!
//! Arbitration couples with the state machine: requesting arbitration on
//! an ACTIVE intent blocks it, recording a decision on a BLOCKED intent
//! unblocks it. On intents in other states the events append without a
//! status change.

use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::engine::Engine;
use crate::errors::CoreError;
use crate::model::validate;
use crate::model::{
    AgentIdentity, Attachment, CostEntry, CostSummary, CostType, EventType, IntentEvent,
    IntentStatus, PendingEvent,
};
use crate::storage::IntentChanges;

impl Engine {
    pub async fn add_comment(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        message: &str,
    ) -> Result<IntentEvent, CoreError> {
        validate::require_non_empty(message, "message")?;
        self.append_audit_event(actor, id, EventType::Comment, json!({ "message": message }))
            .await
    }

    /// Open an arbitration request; blocks the intent while it is ACTIVE.
    pub async fn request_arbitration(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        question: &str,
        options: Option<Vec<String>>,
    ) -> Result<IntentEvent, CoreError> {
        validate::require_non_empty(question, "question")?;
        let _guard = self.lock_intent(id).await;
        let intent = self.store().get_intent(id).await?;
        let request = PendingEvent::new(
            EventType::ArbitrationRequested,
            actor.agent_id.clone(),
            json!({ "question": question, "options": options }),
        );
        let events = if intent.status == IntentStatus::Active {
            let status_event = PendingEvent::new(
                EventType::StatusChanged,
                actor.agent_id.clone(),
                json!({
                    "from": IntentStatus::Active,
                    "to": IntentStatus::Blocked,
                    "reason": "arbitration requested",
                }),
            );
            let (_, events) = self
                .store()
                .mutate_intent(
                    id,
                    intent.version,
                    IntentChanges {
                        status: Some(IntentStatus::Blocked),
                        ..IntentChanges::default()
                    },
                    vec![request, status_event],
                )
                .await?;
            events
        } else {
            self.store().append_events(id, vec![request]).await?
        };
        info!(intent_id = %id, "arbitration requested");
        self.publish(&events);
        Ok(events.into_iter().next().expect("arbitration event"))
    }

    /// Record a governance decision; unblocks the intent while BLOCKED.
    pub async fn record_decision(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        decision: &str,
        rationale: Option<String>,
    ) -> Result<IntentEvent, CoreError> {
        validate::require_non_empty(decision, "decision")?;
        let _guard = self.lock_intent(id).await;
        let intent = self.store().get_intent(id).await?;
        let recorded = PendingEvent::new(
            EventType::DecisionRecorded,
            actor.agent_id.clone(),
            json!({ "decision": decision, "rationale": rationale }),
        );
        let events = if intent.status == IntentStatus::Blocked {
            let status_event = PendingEvent::new(
                EventType::StatusChanged,
                actor.agent_id.clone(),
                json!({
                    "from": IntentStatus::Blocked,
                    "to": IntentStatus::Active,
                    "reason": "decision recorded",
                }),
            );
            let (_, events) = self
                .store()
                .mutate_intent(
                    id,
                    intent.version,
                    IntentChanges {
                        status: Some(IntentStatus::Active),
                        ..IntentChanges::default()
                    },
                    vec![recorded, status_event],
                )
                .await?;
            events
        } else {
            self.store().append_events(id, vec![recorded]).await?
        };
        info!(intent_id = %id, decision, "decision recorded");
        self.publish(&events);
        Ok(events.into_iter().next().expect("decision event"))
    }

    /// Append a cost entry to the ledger and re-evaluate portfolio cost
    /// thresholds for compositions containing this intent.
    pub async fn record_cost(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        cost_type: CostType,
        amount: f64,
        currency: &str,
        description: Option<String>,
    ) -> Result<CostEntry, CoreError> {
        validate::validate_amount(amount)?;
        validate::validate_currency(currency)?;
        let entry = CostEntry {
            id: Uuid::new_v4(),
            intent_id: id,
            agent_id: actor.agent_id.clone(),
            cost_type,
            amount,
            currency: currency.to_uppercase(),
            description,
            created_at: Utc::now(),
        };
        {
            let _guard = self.lock_intent(id).await;
            let event = PendingEvent::new(
                EventType::CostRecorded,
                actor.agent_id.clone(),
                json!({
                    "cost_type": entry.cost_type,
                    "amount": entry.amount,
                    "currency": entry.currency,
                    "description": entry.description,
                }),
            );
            let events = self.store().insert_cost(&entry, vec![event]).await?;
            self.publish(&events);
        }
        for portfolio_id in self.store().portfolios_for_intent(id).await? {
            self.recompute_portfolio(portfolio_id, Some(id)).await?;
        }
        Ok(entry)
    }

    pub async fn cost_summary(&self, id: Uuid) -> Result<CostSummary, CoreError> {
        let _ = self.store().get_intent(id).await?;
        let entries = self.store().costs_for_intent(id).await?;
        Ok(CostSummary::from_entries(&entries))
    }

    pub async fn list_costs(&self, id: Uuid) -> Result<Vec<CostEntry>, CoreError> {
        let _ = self.store().get_intent(id).await?;
        self.store().costs_for_intent(id).await
    }

    /// Store an attachment blob with its digest and audit event.
    pub async fn add_attachment(
        &self,
        actor: &AgentIdentity,
        id: Uuid,
        filename: &str,
        content_type: &str,
        content: &[u8],
        metadata: Option<Value>,
    ) -> Result<Attachment, CoreError> {
        validate::require_non_empty(filename, "filename")?;
        let attachment = Attachment {
            id: Uuid::new_v4(),
            intent_id: id,
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size: content.len() as u64,
            sha256: Attachment::digest(content),
            metadata,
            created_by: actor.agent_id.clone(),
            created_at: Utc::now(),
        };
        {
            let _guard = self.lock_intent(id).await;
            let event = PendingEvent::new(
                EventType::AttachmentCreated,
                actor.agent_id.clone(),
                json!({
                    "attachment_id": attachment.id,
                    "filename": attachment.filename,
                    "content_type": attachment.content_type,
                    "size": attachment.size,
                    "sha256": attachment.sha256,
                }),
            );
            let events = self
                .store()
                .insert_attachment(&attachment, content, vec![event])
                .await?;
            self.publish(&events);
        }
        Ok(attachment)
    }

    pub async fn list_attachments(&self, id: Uuid) -> Result<Vec<Attachment>, CoreError> {
        let _ = self.store().get_intent(id).await?;
        self.store().attachments_for_intent(id).await
    }

    pub async fn get_attachment(
        &self,
        attachment_id: Uuid,
    ) -> Result<(Attachment, Vec<u8>), CoreError> {
        self.store().attachment_content(attachment_id).await
    }
}
