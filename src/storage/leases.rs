//! Lease namespace: conditional acquisition keyed by `(intent_id, scope)`,
//! holder-checked renewal and release, and expiry marking.
//!
//! Every operation that changes a lease also appends its event to the
//! intent's log inside the same transaction, so lease history interleaves
//! with the rest of the intent's events in commit order.

use chrono::{Duration, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::TransactionTrait;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde_json::json;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::model::{EventType, IntentEvent, Lease, LeaseStatus, PendingEvent, clamp_ttl};
use crate::storage::entity::{intents, leases};
use crate::storage::events::build_event_rows;
use crate::storage::{Store, parse_uuid};

pub(crate) fn lease_from_row(row: leases::Model) -> Result<Lease, CoreError> {
    Ok(Lease {
        id: parse_uuid(&row.id)?,
        intent_id: parse_uuid(&row.intent_id)?,
        scope: row.scope,
        holder_agent_id: row.holder_agent_id,
        status: row
            .status
            .parse()
            .map_err(|e: String| CoreError::internal(e))?,
        acquired_at: row.acquired_at,
        expires_at: row.expires_at,
    })
}

fn lease_payload(lease: &Lease) -> serde_json::Value {
    json!({
        "lease_id": lease.id,
        "scope": lease.scope,
        "holder_agent_id": lease.holder_agent_id,
        "expires_at": lease.expires_at,
    })
}

impl Store {
    /// Acquire the `(intent, scope)` pair, failing with the current holder
    /// and expiry when it is live. A stale ACTIVE row found on the way is
    /// marked EXPIRED in the same transaction, with its event.
    pub async fn acquire_lease(
        &self,
        intent_id: Uuid,
        scope: &str,
        holder: &str,
        ttl_seconds: u64,
    ) -> Result<(Lease, Vec<IntentEvent>), CoreError> {
        let now = Utc::now();
        let txn = self.db().begin().await?;
        let intent_row = intents::Entity::find_by_id(intent_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {intent_id}")))?;

        let mut pending: Vec<PendingEvent> = Vec::new();
        let existing = leases::Entity::find()
            .filter(leases::Column::IntentId.eq(intent_id.to_string()))
            .filter(leases::Column::Scope.eq(scope))
            .filter(leases::Column::Status.eq(LeaseStatus::Active.as_str()))
            .all(&txn)
            .await?;
        for row in existing {
            let stale = lease_from_row(row.clone())?;
            if stale.expires_at > now {
                return Err(CoreError::LeaseConflict {
                    holder: stale.holder_agent_id,
                    expires_at: stale.expires_at,
                });
            }
            let mut active: leases::ActiveModel = row.into();
            active.status = Set(LeaseStatus::Expired.as_str().to_string());
            let _ = active.update(&txn).await?;
            pending.push(PendingEvent::new(
                EventType::LeaseExpired,
                stale.holder_agent_id.clone(),
                lease_payload(&Lease {
                    status: LeaseStatus::Expired,
                    ..stale
                }),
            ));
        }

        let lease = Lease {
            id: Uuid::new_v4(),
            intent_id,
            scope: scope.to_string(),
            holder_agent_id: holder.to_string(),
            status: LeaseStatus::Active,
            acquired_at: now,
            expires_at: now + Duration::seconds(clamp_ttl(ttl_seconds) as i64),
        };
        leases::ActiveModel {
            id: Set(lease.id.to_string()),
            intent_id: Set(intent_id.to_string()),
            scope: Set(lease.scope.clone()),
            holder_agent_id: Set(lease.holder_agent_id.clone()),
            status: Set(lease.status.as_str().to_string()),
            acquired_at: Set(lease.acquired_at),
            expires_at: Set(lease.expires_at),
        }
        .insert(&txn)
        .await?;
        pending.push(PendingEvent::new(
            EventType::LeaseAcquired,
            holder.to_string(),
            lease_payload(&lease),
        ));

        let base_seq = intent_row.last_event_seq;
        let mut intent_active: intents::ActiveModel = intent_row.into();
        intent_active.last_event_seq = Set(base_seq + pending.len() as i64);
        let _ = intent_active.update(&txn).await?;
        let (models, committed) = build_event_rows(intent_id, base_seq, pending)?;
        for model in models {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok((lease, committed))
    }

    /// Extend `expires_at` relative to now. Only the current holder may
    /// renew, and only while the lease is live.
    pub async fn renew_lease(
        &self,
        intent_id: Uuid,
        lease_id: Uuid,
        holder: &str,
        ttl_seconds: u64,
    ) -> Result<(Lease, Vec<IntentEvent>), CoreError> {
        let now = Utc::now();
        let txn = self.db().begin().await?;
        let intent_row = intents::Entity::find_by_id(intent_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {intent_id}")))?;
        let row = leases::Entity::find_by_id(lease_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("lease {lease_id}")))?;
        let lease = lease_from_row(row.clone())?;
        if lease.holder_agent_id != holder || !lease.is_live(now) {
            return Err(CoreError::LeaseNotHeld(holder.to_string()));
        }
        let expires_at = now + Duration::seconds(clamp_ttl(ttl_seconds) as i64);
        let mut active: leases::ActiveModel = row.into();
        active.expires_at = Set(expires_at);
        let updated = lease_from_row(active.update(&txn).await?)?;

        let base_seq = intent_row.last_event_seq;
        let mut intent_active: intents::ActiveModel = intent_row.into();
        intent_active.last_event_seq = Set(base_seq + 1);
        let _ = intent_active.update(&txn).await?;
        let (models, committed) = build_event_rows(
            intent_id,
            base_seq,
            vec![PendingEvent::new(
                EventType::LeaseRenewed,
                holder.to_string(),
                lease_payload(&updated),
            )],
        )?;
        for model in models {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok((updated, committed))
    }

    /// Release a lease. Idempotent for the holder: releasing an already
    /// released or expired lease is a no-op; a non-holder is rejected.
    pub async fn release_lease(
        &self,
        intent_id: Uuid,
        lease_id: Uuid,
        holder: &str,
    ) -> Result<(Lease, Vec<IntentEvent>), CoreError> {
        let txn = self.db().begin().await?;
        let intent_row = intents::Entity::find_by_id(intent_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {intent_id}")))?;
        let row = leases::Entity::find_by_id(lease_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("lease {lease_id}")))?;
        let lease = lease_from_row(row.clone())?;
        if lease.holder_agent_id != holder {
            return Err(CoreError::LeaseNotHeld(holder.to_string()));
        }
        if lease.status != LeaseStatus::Active {
            return Ok((lease, Vec::new()));
        }
        let mut active: leases::ActiveModel = row.into();
        active.status = Set(LeaseStatus::Released.as_str().to_string());
        let released = lease_from_row(active.update(&txn).await?)?;

        let base_seq = intent_row.last_event_seq;
        let mut intent_active: intents::ActiveModel = intent_row.into();
        intent_active.last_event_seq = Set(base_seq + 1);
        let _ = intent_active.update(&txn).await?;
        let (models, committed) = build_event_rows(
            intent_id,
            base_seq,
            vec![PendingEvent::new(
                EventType::LeaseReleased,
                holder.to_string(),
                lease_payload(&released),
            )],
        )?;
        for model in models {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok((released, committed))
    }

    /// Mark one lease EXPIRED, appending its event. Used by the sweeper;
    /// returns `None` when the lease was already resolved by another path.
    pub async fn expire_lease(
        &self,
        lease_id: Uuid,
    ) -> Result<Option<(Lease, Vec<IntentEvent>)>, CoreError> {
        let now = Utc::now();
        let txn = self.db().begin().await?;
        let row = leases::Entity::find_by_id(lease_id.to_string())
            .one(&txn)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let lease = lease_from_row(row.clone())?;
        if lease.status != LeaseStatus::Active || lease.expires_at > now {
            return Ok(None);
        }
        let intent_row = intents::Entity::find_by_id(row.intent_id.clone())
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("intent {}", row.intent_id)))?;
        let mut active: leases::ActiveModel = row.into();
        active.status = Set(LeaseStatus::Expired.as_str().to_string());
        let expired = lease_from_row(active.update(&txn).await?)?;

        let base_seq = intent_row.last_event_seq;
        let intent_id = expired.intent_id;
        let mut intent_active: intents::ActiveModel = intent_row.into();
        intent_active.last_event_seq = Set(base_seq + 1);
        let _ = intent_active.update(&txn).await?;
        let (models, committed) = build_event_rows(
            intent_id,
            base_seq,
            vec![PendingEvent::new(
                EventType::LeaseExpired,
                expired.holder_agent_id.clone(),
                lease_payload(&expired),
            )],
        )?;
        for model in models {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok(Some((expired, committed)))
    }

    pub async fn list_leases(&self, intent_id: Uuid) -> Result<Vec<Lease>, CoreError> {
        let rows = leases::Entity::find()
            .filter(leases::Column::IntentId.eq(intent_id.to_string()))
            .order_by_asc(leases::Column::AcquiredAt)
            .all(self.db())
            .await?;
        rows.into_iter().map(lease_from_row).collect()
    }

    /// ACTIVE leases whose expiry has passed, for the sweeper. The
    /// comparison happens in code; lease counts are small.
    pub async fn overdue_leases(&self) -> Result<Vec<Lease>, CoreError> {
        let now = Utc::now();
        let rows = leases::Entity::find()
            .filter(leases::Column::Status.eq(LeaseStatus::Active.as_str()))
            .all(self.db())
            .await?;
        let mut overdue = Vec::new();
        for row in rows {
            let lease = lease_from_row(row)?;
            if lease.expires_at <= now {
                overdue.push(lease);
            }
        }
        Ok(overdue)
    }
}
