//! Event namespace: append-only log, paged reads, and audit-only appends
//! that advance the sequence counter without bumping the intent version.

use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::TransactionTrait;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::model::{IntentEvent, PendingEvent};
use crate::storage::entity::{events, intents};
use crate::storage::{Store, from_json, parse_uuid, to_json};

/// Materialize pending events at sequences `base_seq+1 ..`, returning both
/// the rows to insert and the committed domain events.
pub(crate) fn build_event_rows(
    intent_id: Uuid,
    base_seq: i64,
    pending: Vec<PendingEvent>,
) -> Result<(Vec<events::ActiveModel>, Vec<IntentEvent>), CoreError> {
    let now = Utc::now();
    let mut models = Vec::with_capacity(pending.len());
    let mut committed = Vec::with_capacity(pending.len());
    for (offset, event) in pending.into_iter().enumerate() {
        let sequence = base_seq + 1 + offset as i64;
        let id = Uuid::new_v4();
        models.push(events::ActiveModel {
            intent_id: Set(intent_id.to_string()),
            sequence: Set(sequence),
            id: Set(id.to_string()),
            event_type: Set(event.event_type.as_str().to_string()),
            actor_agent_id: Set(event.actor_agent_id.clone()),
            payload: Set(to_json(&event.payload)?),
            created_at: Set(now),
        });
        committed.push(IntentEvent {
            id,
            intent_id,
            sequence,
            event_type: event.event_type,
            actor_agent_id: event.actor_agent_id,
            payload: event.payload,
            created_at: now,
        });
    }
    Ok((models, committed))
}

pub(crate) fn event_from_row(row: events::Model) -> Result<IntentEvent, CoreError> {
    Ok(IntentEvent {
        id: parse_uuid(&row.id)?,
        intent_id: parse_uuid(&row.intent_id)?,
        sequence: row.sequence,
        event_type: row
            .event_type
            .parse()
            .map_err(|e: String| CoreError::internal(e))?,
        actor_agent_id: row.actor_agent_id,
        payload: from_json(&row.payload)?,
        created_at: row.created_at,
    })
}

impl Store {
    /// Append events without touching state, status, or version. Used for
    /// audit kinds (comments, LLM/stream/tool audit) and engine-emitted
    /// markers; allowed on terminal intents.
    pub async fn append_events(
        &self,
        intent_id: Uuid,
        pending: Vec<PendingEvent>,
    ) -> Result<Vec<IntentEvent>, CoreError> {
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        let txn = self.db().begin().await?;
        let row = intents::Entity::find_by_id(intent_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {intent_id}")))?;
        let base_seq = row.last_event_seq;
        let mut active: intents::ActiveModel = row.into();
        active.last_event_seq = Set(base_seq + pending.len() as i64);
        let _ = active.update(&txn).await?;
        let (models, committed) = build_event_rows(intent_id, base_seq, pending)?;
        for model in models {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok(committed)
    }

    /// Page through the log in sequence order, starting at `from_sequence`
    /// (inclusive).
    pub async fn events_page(
        &self,
        intent_id: Uuid,
        from_sequence: i64,
        limit: u64,
    ) -> Result<Vec<IntentEvent>, CoreError> {
        let rows = events::Entity::find()
            .filter(events::Column::IntentId.eq(intent_id.to_string()))
            .filter(events::Column::Sequence.gte(from_sequence))
            .order_by_asc(events::Column::Sequence)
            .limit(limit)
            .all(self.db())
            .await?;
        rows.into_iter().map(event_from_row).collect()
    }

    /// Highest committed sequence for an intent (0 when the log is empty).
    pub async fn last_sequence(&self, intent_id: Uuid) -> Result<i64, CoreError> {
        let row = intents::Entity::find_by_id(intent_id.to_string())
            .one(self.db())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {intent_id}")))?;
        Ok(row.last_event_seq)
    }
}
