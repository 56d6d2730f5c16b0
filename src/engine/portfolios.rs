//! Portfolio operations and aggregate recomputation.
//!
//! Aggregates recompute when a member's status changes (the background
//! worker feeds on STATUS_CHANGED events) and on portfolio reads, and the
//! persisted summary only changes — and AGGREGATE_CHANGED only fires —
//! when the rolled-up numbers actually moved.

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::errors::CoreError;
use crate::model::validate;
use crate::model::{
    AgentIdentity, AggregateStatus, EventType, GovernancePolicy, Intent, MembershipRole,
    PendingEvent, Portfolio, PortfolioMember, PortfolioStatus,
};

impl Engine {
    pub async fn create_portfolio(
        &self,
        _actor: &AgentIdentity,
        name: &str,
        governance_policy: Option<GovernancePolicy>,
    ) -> Result<Portfolio, CoreError> {
        validate::require_non_empty(name, "name")?;
        let now = Utc::now();
        let portfolio = Portfolio {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: PortfolioStatus::Active,
            governance_policy,
            members: Vec::new(),
            aggregate_status: None,
            created_at: now,
            updated_at: now,
        };
        self.store().create_portfolio(&portfolio).await?;
        info!(portfolio_id = %portfolio.id, name, "portfolio created");
        Ok(portfolio)
    }

    /// Add an intent to a portfolio, emitting MEMBERSHIP_ADDED on the
    /// member's log and refreshing the roll-up.
    pub async fn add_portfolio_member(
        &self,
        actor: &AgentIdentity,
        portfolio_id: Uuid,
        intent_id: Uuid,
        role: MembershipRole,
        priority: i32,
    ) -> Result<Portfolio, CoreError> {
        let portfolio = self.store().get_portfolio(portfolio_id).await?;
        let _ = self.store().get_intent(intent_id).await?;
        if portfolio.members.iter().any(|m| m.intent_id == intent_id) {
            return Err(CoreError::validation(format!(
                "intent {intent_id} is already a member of portfolio {portfolio_id}"
            )));
        }
        let member = PortfolioMember {
            intent_id,
            role,
            priority,
            added_at: Utc::now(),
        };
        self.store()
            .add_portfolio_member(portfolio_id, &member)
            .await?;
        {
            let _guard = self.lock_intent(intent_id).await;
            let events = self
                .store()
                .append_events(
                    intent_id,
                    vec![PendingEvent::new(
                        EventType::MembershipAdded,
                        actor.agent_id.clone(),
                        json!({
                            "portfolio_id": portfolio_id,
                            "role": member.role,
                            "priority": member.priority,
                        }),
                    )],
                )
                .await?;
            self.publish(&events);
        }
        self.recompute_portfolio(portfolio_id, Some(intent_id))
            .await?;
        self.store().get_portfolio(portfolio_id).await
    }

    pub async fn remove_portfolio_member(
        &self,
        actor: &AgentIdentity,
        portfolio_id: Uuid,
        intent_id: Uuid,
    ) -> Result<Portfolio, CoreError> {
        let removed = self
            .store()
            .remove_portfolio_member(portfolio_id, intent_id)
            .await?;
        if !removed {
            return Err(CoreError::not_found(format!(
                "membership of {intent_id} in portfolio {portfolio_id}"
            )));
        }
        if self.store().try_get_intent(intent_id).await?.is_some() {
            let _guard = self.lock_intent(intent_id).await;
            let events = self
                .store()
                .append_events(
                    intent_id,
                    vec![PendingEvent::new(
                        EventType::MembershipRemoved,
                        actor.agent_id.clone(),
                        json!({ "portfolio_id": portfolio_id }),
                    )],
                )
                .await?;
            self.publish(&events);
        }
        self.recompute_portfolio(portfolio_id, None).await?;
        self.store().get_portfolio(portfolio_id).await
    }

    /// Portfolio with a fresh roll-up (recomputed on read so the summary
    /// is current even before the background worker catches up).
    pub async fn get_portfolio(&self, portfolio_id: Uuid) -> Result<Portfolio, CoreError> {
        self.recompute_portfolio(portfolio_id, None).await?;
        self.store().get_portfolio(portfolio_id).await
    }

    pub async fn list_portfolios(&self) -> Result<Vec<Portfolio>, CoreError> {
        self.store().list_portfolios().await
    }

    pub async fn update_portfolio_status(
        &self,
        _actor: &AgentIdentity,
        portfolio_id: Uuid,
        status: PortfolioStatus,
    ) -> Result<Portfolio, CoreError> {
        self.store()
            .update_portfolio_status(portfolio_id, status)
            .await
    }

    /// Recompute one portfolio's roll-up; persist and emit
    /// AGGREGATE_CHANGED (on the PRIMARY member's log, falling back to the
    /// triggering member) when it moved. Also evaluates cost thresholds.
    pub async fn recompute_portfolio(
        &self,
        portfolio_id: Uuid,
        triggered_by: Option<Uuid>,
    ) -> Result<Option<AggregateStatus>, CoreError> {
        let portfolio = self.store().get_portfolio(portfolio_id).await?;
        let mut members: Vec<Intent> = Vec::with_capacity(portfolio.members.len());
        for member in &portfolio.members {
            if let Some(intent) = self.store().try_get_intent(member.intent_id).await? {
                members.push(intent);
            }
        }
        let aggregate = self.aggregate_over(&members).await?;
        let changed = self
            .store()
            .set_portfolio_aggregate(portfolio_id, &aggregate)
            .await?;
        if changed {
            let locus = portfolio
                .members
                .iter()
                .find(|m| m.role == MembershipRole::Primary)
                .map(|m| m.intent_id)
                .or(triggered_by)
                .or_else(|| portfolio.members.first().map(|m| m.intent_id));
            if let Some(locus) = locus {
                let _guard = self.lock_intent(locus).await;
                let events = self
                    .store()
                    .append_events(
                        locus,
                        vec![PendingEvent::new(
                            EventType::AggregateChanged,
                            "system".to_string(),
                            json!({
                                "portfolio_id": portfolio_id,
                                "aggregate_status": aggregate,
                            }),
                        )],
                    )
                    .await?;
                self.publish(&events);
            }
            debug!(%portfolio_id, total = aggregate.total, "portfolio aggregate updated");
        }
        self.check_cost_threshold(&portfolio, triggered_by).await?;
        Ok(changed.then_some(aggregate))
    }

    /// Recompute a hierarchy root's roll-up; persist on the root record
    /// and emit AGGREGATE_CHANGED on the root's log when it moved.
    pub async fn recompute_hierarchy(
        &self,
        root_id: Uuid,
    ) -> Result<Option<AggregateStatus>, CoreError> {
        let descendants = self.descendants(root_id).await?;
        if descendants.is_empty() {
            return Ok(None);
        }
        let aggregate = self.aggregate_over(&descendants).await?;
        let previous = self.store().stored_intent_aggregate(root_id).await?;
        if previous.as_ref() == Some(&aggregate) {
            return Ok(None);
        }
        let _guard = self.lock_intent(root_id).await;
        let events = self
            .store()
            .set_intent_aggregate(
                root_id,
                &aggregate,
                vec![PendingEvent::new(
                    EventType::AggregateChanged,
                    "system".to_string(),
                    json!({ "root_id": root_id, "aggregate_status": aggregate }),
                )],
            )
            .await?;
        self.publish(&events);
        Ok(Some(aggregate))
    }

    /// React to one STATUS_CHANGED: refresh every portfolio containing
    /// the intent and the roll-up of its hierarchy root.
    pub async fn on_status_changed(&self, intent_id: Uuid) -> Result<(), CoreError> {
        for portfolio_id in self.store().portfolios_for_intent(intent_id).await? {
            if let Err(e) = self.recompute_portfolio(portfolio_id, Some(intent_id)).await {
                warn!(%portfolio_id, error = %e, "portfolio recompute failed");
            }
        }
        if let Some(root_id) = self.root_of(intent_id).await? {
            if let Err(e) = self.recompute_hierarchy(root_id).await {
                warn!(%root_id, error = %e, "hierarchy recompute failed");
            }
        }
        Ok(())
    }

    /// Walk the parent chain to the root; `None` for a standalone intent.
    async fn root_of(&self, intent_id: Uuid) -> Result<Option<Uuid>, CoreError> {
        let mut current = match self.store().try_get_intent(intent_id).await? {
            Some(intent) => intent,
            None => return Ok(None),
        };
        if current.parent_id.is_none() {
            // The intent is itself a root; worth recomputing only when it
            // actually has children.
            let has_children = !self.store().children_of(intent_id).await?.is_empty();
            return Ok(has_children.then_some(intent_id));
        }
        let mut hops = 0;
        while let Some(parent_id) = current.parent_id {
            hops += 1;
            if hops > 64 {
                warn!(%intent_id, "parent chain too deep, giving up");
                return Ok(None);
            }
            match self.store().try_get_intent(parent_id).await? {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok(Some(current.id))
    }

    /// Emit COST_THRESHOLD_EXCEEDED once per portfolio when the USD total
    /// over all members crosses the governance cap.
    async fn check_cost_threshold(
        &self,
        portfolio: &Portfolio,
        triggered_by: Option<Uuid>,
    ) -> Result<(), CoreError> {
        let Some(max_cost) = portfolio
            .governance_policy
            .as_ref()
            .and_then(|p| p.max_cost_usd)
        else {
            return Ok(());
        };
        if self.flagged_cost.contains_key(&portfolio.id) {
            return Ok(());
        }
        let mut total = 0.0;
        for member in &portfolio.members {
            let entries = self.store().costs_for_intent(member.intent_id).await?;
            total += entries
                .iter()
                .filter(|e| e.currency.eq_ignore_ascii_case("USD"))
                .map(|e| e.amount)
                .sum::<f64>();
        }
        if total <= max_cost {
            return Ok(());
        }
        self.flagged_cost.insert(portfolio.id, ());
        let locus = portfolio
            .members
            .iter()
            .find(|m| m.role == MembershipRole::Primary)
            .map(|m| m.intent_id)
            .or(triggered_by)
            .or_else(|| portfolio.members.first().map(|m| m.intent_id));
        if let Some(locus) = locus {
            let _guard = self.lock_intent(locus).await;
            let events = self
                .store()
                .append_events(
                    locus,
                    vec![PendingEvent::new(
                        EventType::CostThresholdExceeded,
                        "system".to_string(),
                        json!({
                            "portfolio_id": portfolio.id,
                            "max_cost_usd": max_cost,
                            "total_cost_usd": total,
                        }),
                    )],
                )
                .await?;
            self.publish(&events);
        }
        info!(portfolio_id = %portfolio.id, total, max_cost, "cost threshold exceeded");
        Ok(())
    }

    /// Emit TIMEOUT_REACHED once per portfolio whose governance timeout
    /// has elapsed. Called by the reconciler.
    pub(crate) async fn check_portfolio_timeouts(&self) -> Result<(), CoreError> {
        let now = Utc::now();
        for portfolio in self.store().list_portfolios().await? {
            if portfolio.status != PortfolioStatus::Active {
                continue;
            }
            let Some(timeout_hours) = portfolio
                .governance_policy
                .as_ref()
                .and_then(|p| p.timeout_hours)
            else {
                continue;
            };
            if self.flagged_timeout.contains_key(&portfolio.id) {
                continue;
            }
            if portfolio.created_at + Duration::hours(timeout_hours as i64) > now {
                continue;
            }
            self.flagged_timeout.insert(portfolio.id, ());
            let locus = portfolio
                .members
                .iter()
                .find(|m| m.role == MembershipRole::Primary)
                .map(|m| m.intent_id)
                .or_else(|| portfolio.members.first().map(|m| m.intent_id));
            if let Some(locus) = locus {
                let _guard = self.lock_intent(locus).await;
                let events = self
                    .store()
                    .append_events(
                        locus,
                        vec![PendingEvent::new(
                            EventType::TimeoutReached,
                            "system".to_string(),
                            json!({
                                "portfolio_id": portfolio.id,
                                "timeout_hours": timeout_hours,
                            }),
                        )],
                    )
                    .await?;
                self.publish(&events);
            }
            info!(portfolio_id = %portfolio.id, timeout_hours, "portfolio timeout reached");
        }
        Ok(())
    }
}
