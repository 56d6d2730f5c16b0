//! Lease manager: scope-exclusive acquisition, holder-checked renewal,
//! idempotent release, and the expiry sweep.

use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::Engine;
use crate::errors::CoreError;
use crate::model::validate;
use crate::model::{AgentIdentity, Lease};

impl Engine {
    /// Acquire `(intent, scope)` for `ttl_seconds` (clamped). Fails with
    /// the current holder and expiry while the pair is live.
    pub async fn acquire_lease(
        &self,
        actor: &AgentIdentity,
        intent_id: Uuid,
        scope: &str,
        ttl_seconds: u64,
    ) -> Result<Lease, CoreError> {
        validate::validate_scope(scope)?;
        let _guard = self.lock_intent(intent_id).await;
        let intent = self.store().get_intent(intent_id).await?;
        if intent.status.is_terminal() {
            return Err(CoreError::validation(format!(
                "intent {intent_id} is {} and no longer accepts leases",
                intent.status
            )));
        }
        let (lease, events) = self
            .store()
            .acquire_lease(intent_id, scope, &actor.agent_id, ttl_seconds)
            .await?;
        info!(%intent_id, scope, holder = %actor.agent_id, "lease acquired");
        self.publish(&events);
        Ok(lease)
    }

    /// Extend a held lease relative to now. Only the current holder may
    /// renew.
    pub async fn renew_lease(
        &self,
        actor: &AgentIdentity,
        intent_id: Uuid,
        lease_id: Uuid,
        ttl_seconds: u64,
    ) -> Result<Lease, CoreError> {
        let _guard = self.lock_intent(intent_id).await;
        let (lease, events) = self
            .store()
            .renew_lease(intent_id, lease_id, &actor.agent_id, ttl_seconds)
            .await?;
        self.publish(&events);
        Ok(lease)
    }

    /// Release a lease. Idempotent for the holder.
    pub async fn release_lease(
        &self,
        actor: &AgentIdentity,
        intent_id: Uuid,
        lease_id: Uuid,
    ) -> Result<Lease, CoreError> {
        let _guard = self.lock_intent(intent_id).await;
        let (lease, events) = self
            .store()
            .release_lease(intent_id, lease_id, &actor.agent_id)
            .await?;
        self.publish(&events);
        Ok(lease)
    }

    /// Leases for an intent with expiry applied to the view, regardless
    /// of sweeper progress.
    pub async fn list_leases(&self, intent_id: Uuid) -> Result<Vec<Lease>, CoreError> {
        let _ = self.store().get_intent(intent_id).await?;
        let now = chrono::Utc::now();
        let leases = self.store().list_leases(intent_id).await?;
        Ok(leases
            .into_iter()
            .map(|lease| {
                let status = lease.effective_status(now);
                Lease { status, ..lease }
            })
            .collect())
    }

    /// One sweep pass: mark overdue ACTIVE leases expired and publish
    /// their events. Returns the number of leases expired.
    pub async fn sweep_expired_leases(&self) -> Result<usize, CoreError> {
        let overdue = self.store().overdue_leases().await?;
        let mut swept = 0;
        for lease in overdue {
            let _guard = self.lock_intent(lease.intent_id).await;
            if let Some((expired, events)) = self.store().expire_lease(lease.id).await? {
                debug!(lease_id = %expired.id, intent_id = %expired.intent_id, "lease expired");
                self.publish(&events);
                swept += 1;
            }
        }
        Ok(swept)
    }
}
