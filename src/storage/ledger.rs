//! Cost ledger, attachments, and failure records. Every insert commits
//! together with its audit event on the intent's log.

use sea_orm::ActiveValue::Set;
use sea_orm::TransactionTrait;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::model::{
    Attachment, CostEntry, FailureRecord, IntentEvent, IntentStatus, PendingEvent,
};
use crate::storage::entity::{attachments, costs, failures, intents};
use crate::storage::events::build_event_rows;
use crate::storage::{Store, json_or_null, parse_uuid, to_json};

fn cost_from_row(row: costs::Model) -> Result<CostEntry, CoreError> {
    Ok(CostEntry {
        id: parse_uuid(&row.id)?,
        intent_id: parse_uuid(&row.intent_id)?,
        agent_id: row.agent_id,
        cost_type: row
            .cost_type
            .parse()
            .map_err(|e: String| CoreError::internal(e))?,
        amount: row.amount,
        currency: row.currency,
        description: row.description,
        created_at: row.created_at,
    })
}

fn attachment_from_row(row: &attachments::Model) -> Result<Attachment, CoreError> {
    Ok(Attachment {
        id: parse_uuid(&row.id)?,
        intent_id: parse_uuid(&row.intent_id)?,
        filename: row.filename.clone(),
        content_type: row.content_type.clone(),
        size: row.size as u64,
        sha256: row.sha256.clone(),
        metadata: json_or_null(&row.metadata)?,
        created_by: row.created_by.clone(),
        created_at: row.created_at,
    })
}

fn failure_from_row(row: failures::Model) -> Result<FailureRecord, CoreError> {
    Ok(FailureRecord {
        id: parse_uuid(&row.id)?,
        intent_id: parse_uuid(&row.intent_id)?,
        attempt_number: row.attempt_number as u32,
        error_type: row.error_type,
        error_message: row.error_message,
        recoverable: row.recoverable,
        context: json_or_null(&row.context)?,
        created_at: row.created_at,
    })
}

impl Store {
    pub async fn insert_cost(
        &self,
        entry: &CostEntry,
        events: Vec<PendingEvent>,
    ) -> Result<Vec<IntentEvent>, CoreError> {
        let txn = self.db().begin().await?;
        let intent_row = intents::Entity::find_by_id(entry.intent_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {}", entry.intent_id)))?;
        costs::ActiveModel {
            id: Set(entry.id.to_string()),
            intent_id: Set(entry.intent_id.to_string()),
            agent_id: Set(entry.agent_id.clone()),
            cost_type: Set(entry.cost_type.as_str().to_string()),
            amount: Set(entry.amount),
            currency: Set(entry.currency.clone()),
            description: Set(entry.description.clone()),
            created_at: Set(entry.created_at),
        }
        .insert(&txn)
        .await?;
        let base_seq = intent_row.last_event_seq;
        let mut intent_active: intents::ActiveModel = intent_row.into();
        intent_active.last_event_seq = Set(base_seq + events.len() as i64);
        let _ = intent_active.update(&txn).await?;
        let (models, committed) = build_event_rows(entry.intent_id, base_seq, events)?;
        for model in models {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok(committed)
    }

    pub async fn costs_for_intent(&self, intent_id: Uuid) -> Result<Vec<CostEntry>, CoreError> {
        let rows = costs::Entity::find()
            .filter(costs::Column::IntentId.eq(intent_id.to_string()))
            .order_by_asc(costs::Column::CreatedAt)
            .all(self.db())
            .await?;
        rows.into_iter().map(cost_from_row).collect()
    }

    pub async fn insert_attachment(
        &self,
        attachment: &Attachment,
        blob: &[u8],
        events: Vec<PendingEvent>,
    ) -> Result<Vec<IntentEvent>, CoreError> {
        let txn = self.db().begin().await?;
        let intent_row = intents::Entity::find_by_id(attachment.intent_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {}", attachment.intent_id)))?;
        attachments::ActiveModel {
            id: Set(attachment.id.to_string()),
            intent_id: Set(attachment.intent_id.to_string()),
            filename: Set(attachment.filename.clone()),
            content_type: Set(attachment.content_type.clone()),
            size: Set(attachment.size as i64),
            sha256: Set(attachment.sha256.clone()),
            blob: Set(blob.to_vec()),
            metadata: Set(attachment.metadata.as_ref().map(to_json).transpose()?),
            created_by: Set(attachment.created_by.clone()),
            created_at: Set(attachment.created_at),
        }
        .insert(&txn)
        .await?;
        let base_seq = intent_row.last_event_seq;
        let mut intent_active: intents::ActiveModel = intent_row.into();
        intent_active.last_event_seq = Set(base_seq + events.len() as i64);
        let _ = intent_active.update(&txn).await?;
        let (models, committed) = build_event_rows(attachment.intent_id, base_seq, events)?;
        for model in models {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok(committed)
    }

    pub async fn attachments_for_intent(
        &self,
        intent_id: Uuid,
    ) -> Result<Vec<Attachment>, CoreError> {
        let rows = attachments::Entity::find()
            .filter(attachments::Column::IntentId.eq(intent_id.to_string()))
            .order_by_asc(attachments::Column::CreatedAt)
            .all(self.db())
            .await?;
        rows.iter().map(attachment_from_row).collect()
    }

    pub async fn attachment_content(
        &self,
        attachment_id: Uuid,
    ) -> Result<(Attachment, Vec<u8>), CoreError> {
        let row = attachments::Entity::find_by_id(attachment_id.to_string())
            .one(self.db())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("attachment {attachment_id}")))?;
        let attachment = attachment_from_row(&row)?;
        Ok((attachment, row.blob))
    }

    /// Record one failure attempt, optionally transitioning the intent in
    /// the same transaction (the retry service passes the escalation).
    pub async fn apply_failure(
        &self,
        record: &FailureRecord,
        escalate: Option<(i64, IntentStatus)>,
        events: Vec<PendingEvent>,
    ) -> Result<Vec<IntentEvent>, CoreError> {
        let txn = self.db().begin().await?;
        let intent_row = intents::Entity::find_by_id(record.intent_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {}", record.intent_id)))?;
        failures::ActiveModel {
            id: Set(record.id.to_string()),
            intent_id: Set(record.intent_id.to_string()),
            attempt_number: Set(record.attempt_number as i32),
            error_type: Set(record.error_type.clone()),
            error_message: Set(record.error_message.clone()),
            recoverable: Set(record.recoverable),
            context: Set(record.context.as_ref().map(to_json).transpose()?),
            created_at: Set(record.created_at),
        }
        .insert(&txn)
        .await?;

        let base_seq = intent_row.last_event_seq;
        let current_version = intent_row.version;
        let mut intent_active: intents::ActiveModel = intent_row.into();
        if let Some((expected_version, status)) = escalate {
            if current_version != expected_version {
                return Err(CoreError::VersionConflict {
                    current_version,
                });
            }
            intent_active.status = Set(status.as_str().to_string());
            intent_active.version = Set(expected_version + 1);
            intent_active.updated_at = Set(record.created_at);
        }
        intent_active.last_event_seq = Set(base_seq + events.len() as i64);
        let _ = intent_active.update(&txn).await?;
        let (models, committed) = build_event_rows(record.intent_id, base_seq, events)?;
        for model in models {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok(committed)
    }

    pub async fn failures_for_intent(
        &self,
        intent_id: Uuid,
    ) -> Result<Vec<FailureRecord>, CoreError> {
        let rows = failures::Entity::find()
            .filter(failures::Column::IntentId.eq(intent_id.to_string()))
            .order_by_asc(failures::Column::AttemptNumber)
            .all(self.db())
            .await?;
        rows.into_iter().map(failure_from_row).collect()
    }

    pub async fn failure_count(&self, intent_id: Uuid) -> Result<u32, CoreError> {
        let count = failures::Entity::find()
            .filter(failures::Column::IntentId.eq(intent_id.to_string()))
            .count(self.db())
            .await?;
        Ok(count as u32)
    }
}
