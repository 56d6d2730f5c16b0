//! Intent namespace: creation, reads, and the read-check-write mutation
//! path that underpins optimistic concurrency.

use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use sea_orm::TransactionTrait;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::model::{
    AggregateStatus, Intent, IntentFilter, IntentStatus, PendingEvent, RetryPolicy,
};
use crate::model::IntentEvent;
use crate::storage::entity::{idempotency_keys, intents};
use crate::storage::events::build_event_rows;
use crate::storage::{Store, from_json, parse_uuid, to_json};

/// Field updates applied by one mutation. Every set field bumps the
/// version exactly once per call.
#[derive(Debug, Clone, Default)]
pub struct IntentChanges {
    /// Full new state document (the engine computes merges).
    pub state: Option<Value>,
    pub status: Option<IntentStatus>,
    pub constraints: Option<Vec<String>>,
    pub retry_policy: Option<RetryPolicy>,
}

pub(crate) fn intent_from_row(row: intents::Model) -> Result<Intent, CoreError> {
    Ok(Intent {
        id: parse_uuid(&row.id)?,
        title: row.title,
        description: row.description,
        creator_agent_id: row.creator_agent_id,
        status: row
            .status
            .parse()
            .map_err(|e: String| CoreError::internal(e))?,
        state: from_json(&row.state)?,
        version: row.version,
        constraints: from_json(&row.constraints)?,
        parent_id: row.parent_id.as_deref().map(parse_uuid).transpose()?,
        depends_on: from_json(&row.depends_on)?,
        retry_policy: row
            .retry_policy
            .as_deref()
            .map(from_json::<RetryPolicy>)
            .transpose()?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

impl Store {
    /// Insert a fresh intent and its CREATED event in one transaction.
    pub async fn create_intent(
        &self,
        intent: &Intent,
        created: PendingEvent,
        idempotency_key: Option<&str>,
    ) -> Result<IntentEvent, CoreError> {
        let txn = self.db().begin().await?;
        let row = intents::ActiveModel {
            id: Set(intent.id.to_string()),
            title: Set(intent.title.clone()),
            description: Set(intent.description.clone()),
            creator_agent_id: Set(intent.creator_agent_id.clone()),
            status: Set(intent.status.as_str().to_string()),
            state: Set(to_json(&intent.state)?),
            version: Set(intent.version),
            constraints: Set(to_json(&intent.constraints)?),
            parent_id: Set(intent.parent_id.map(|id| id.to_string())),
            depends_on: Set(to_json(&intent.depends_on)?),
            retry_policy: Set(None),
            aggregate: Set(None),
            last_event_seq: Set(1),
            created_at: Set(intent.created_at),
            updated_at: Set(intent.updated_at),
        };
        row.insert(&txn).await?;
        let (models, committed) = build_event_rows(intent.id, 0, vec![created])?;
        for model in models {
            model.insert(&txn).await?;
        }
        if let Some(key) = idempotency_key {
            // A stale record outside the window may still exist; replace it.
            idempotency_keys::Entity::delete_by_id(key.to_string())
                .exec(&txn)
                .await?;
            idempotency_keys::ActiveModel {
                key: Set(key.to_string()),
                intent_id: Set(intent.id.to_string()),
                created_at: Set(Utc::now()),
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;
        Ok(committed.into_iter().next().expect("one created event"))
    }

    pub async fn try_get_intent(&self, id: Uuid) -> Result<Option<Intent>, CoreError> {
        let row = intents::Entity::find_by_id(id.to_string())
            .one(self.db())
            .await?;
        row.map(intent_from_row).transpose()
    }

    pub async fn get_intent(&self, id: Uuid) -> Result<Intent, CoreError> {
        self.try_get_intent(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {id}")))
    }

    pub async fn list_intents(&self, filter: &IntentFilter) -> Result<Vec<Intent>, CoreError> {
        let mut query = intents::Entity::find().order_by_asc(intents::Column::CreatedAt);
        if let Some(status) = filter.status {
            query = query.filter(intents::Column::Status.eq(status.as_str()));
        }
        if let Some(creator) = &filter.creator_agent_id {
            query = query.filter(intents::Column::CreatorAgentId.eq(creator.clone()));
        }
        if let Some(parent) = filter.parent_id {
            query = query.filter(intents::Column::ParentId.eq(parent.to_string()));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = filter.offset {
            query = query.offset(offset);
        }
        let rows = query.all(self.db()).await?;
        rows.into_iter().map(intent_from_row).collect()
    }

    /// Direct children, via the by-parent index.
    pub async fn children_of(&self, id: Uuid) -> Result<Vec<Intent>, CoreError> {
        let rows = intents::Entity::find()
            .filter(intents::Column::ParentId.eq(id.to_string()))
            .order_by_asc(intents::Column::CreatedAt)
            .all(self.db())
            .await?;
        rows.into_iter().map(intent_from_row).collect()
    }

    /// Read-check-write: fail with the current version when the optimistic
    /// check misses, otherwise apply the changes, bump the version, and
    /// append the events — all in one transaction.
    pub async fn mutate_intent(
        &self,
        id: Uuid,
        expected_version: i64,
        changes: IntentChanges,
        events: Vec<PendingEvent>,
    ) -> Result<(Intent, Vec<IntentEvent>), CoreError> {
        let txn = self.db().begin().await?;
        let row = intents::Entity::find_by_id(id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {id}")))?;
        if row.version != expected_version {
            return Err(CoreError::VersionConflict {
                current_version: row.version,
            });
        }
        let base_seq = row.last_event_seq;
        let mut active: intents::ActiveModel = row.into();
        if let Some(state) = &changes.state {
            active.state = Set(to_json(state)?);
        }
        if let Some(status) = changes.status {
            active.status = Set(status.as_str().to_string());
        }
        if let Some(constraints) = &changes.constraints {
            active.constraints = Set(to_json(constraints)?);
        }
        if let Some(policy) = &changes.retry_policy {
            active.retry_policy = Set(Some(to_json(policy)?));
        }
        active.version = Set(expected_version + 1);
        active.last_event_seq = Set(base_seq + events.len() as i64);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;
        let (models, committed) = build_event_rows(id, base_seq, events)?;
        for model in models {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok((intent_from_row(updated)?, committed))
    }

    /// Persist a derived roll-up summary on a hierarchy root, optionally
    /// appending events. Derived data: no version bump.
    pub async fn set_intent_aggregate(
        &self,
        id: Uuid,
        aggregate: &AggregateStatus,
        events: Vec<PendingEvent>,
    ) -> Result<Vec<IntentEvent>, CoreError> {
        let txn = self.db().begin().await?;
        let row = intents::Entity::find_by_id(id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {id}")))?;
        let base_seq = row.last_event_seq;
        let mut active: intents::ActiveModel = row.into();
        active.aggregate = Set(Some(to_json(aggregate)?));
        active.last_event_seq = Set(base_seq + events.len() as i64);
        let _ = active.update(&txn).await?;
        let (models, committed) = build_event_rows(id, base_seq, events)?;
        for model in models {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok(committed)
    }

    /// Last persisted roll-up for a hierarchy root, if any.
    pub async fn stored_intent_aggregate(
        &self,
        id: Uuid,
    ) -> Result<Option<AggregateStatus>, CoreError> {
        let row = intents::Entity::find_by_id(id.to_string())
            .one(self.db())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {id}")))?;
        row.aggregate
            .as_deref()
            .map(from_json::<AggregateStatus>)
            .transpose()
    }

    /// Look up an idempotency key recorded after `cutoff`.
    pub async fn idempotency_lookup(
        &self,
        key: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Uuid>, CoreError> {
        let row = idempotency_keys::Entity::find_by_id(key.to_string())
            .one(self.db())
            .await?;
        match row {
            Some(row) if row.created_at > cutoff => Ok(Some(parse_uuid(&row.intent_id)?)),
            _ => Ok(None),
        }
    }

    /// Drop idempotency records older than `cutoff`.
    pub async fn idempotency_prune(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        let result = idempotency_keys::Entity::delete_many()
            .filter(idempotency_keys::Column::CreatedAt.lt(cutoff))
            .exec(self.db())
            .await?;
        Ok(result.rows_affected)
    }
}
