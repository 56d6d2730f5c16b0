//! Portfolio namespace: flat compositions with memberships and a persisted
//! roll-up summary.

use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::model::{
    AggregateStatus, GovernancePolicy, Portfolio, PortfolioMember, PortfolioStatus,
};
use crate::storage::entity::{portfolio_members, portfolios};
use crate::storage::{Store, from_json, parse_uuid, to_json};

fn member_from_row(row: portfolio_members::Model) -> Result<PortfolioMember, CoreError> {
    Ok(PortfolioMember {
        intent_id: parse_uuid(&row.intent_id)?,
        role: row.role.parse().map_err(|e: String| CoreError::internal(e))?,
        priority: row.priority,
        added_at: row.added_at,
    })
}

fn portfolio_from_row(
    row: portfolios::Model,
    members: Vec<PortfolioMember>,
) -> Result<Portfolio, CoreError> {
    Ok(Portfolio {
        id: parse_uuid(&row.id)?,
        name: row.name,
        status: row
            .status
            .parse()
            .map_err(|e: String| CoreError::internal(e))?,
        governance_policy: row
            .governance_policy
            .as_deref()
            .map(from_json::<GovernancePolicy>)
            .transpose()?,
        members,
        aggregate_status: row
            .aggregate
            .as_deref()
            .map(from_json::<AggregateStatus>)
            .transpose()?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

impl Store {
    pub async fn create_portfolio(&self, portfolio: &Portfolio) -> Result<(), CoreError> {
        portfolios::ActiveModel {
            id: Set(portfolio.id.to_string()),
            name: Set(portfolio.name.clone()),
            status: Set(portfolio.status.as_str().to_string()),
            governance_policy: Set(portfolio
                .governance_policy
                .as_ref()
                .map(to_json)
                .transpose()?),
            aggregate: Set(None),
            created_at: Set(portfolio.created_at),
            updated_at: Set(portfolio.updated_at),
        }
        .insert(self.db())
        .await?;
        Ok(())
    }

    pub async fn try_get_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>, CoreError> {
        let Some(row) = portfolios::Entity::find_by_id(id.to_string())
            .one(self.db())
            .await?
        else {
            return Ok(None);
        };
        let members = self.portfolio_members(id).await?;
        Ok(Some(portfolio_from_row(row, members)?))
    }

    pub async fn get_portfolio(&self, id: Uuid) -> Result<Portfolio, CoreError> {
        self.try_get_portfolio(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("portfolio {id}")))
    }

    pub async fn list_portfolios(&self) -> Result<Vec<Portfolio>, CoreError> {
        let rows = portfolios::Entity::find()
            .order_by_asc(portfolios::Column::CreatedAt)
            .all(self.db())
            .await?;
        let mut portfolios = Vec::with_capacity(rows.len());
        for row in rows {
            let members = self.portfolio_members(parse_uuid(&row.id)?).await?;
            portfolios.push(portfolio_from_row(row, members)?);
        }
        Ok(portfolios)
    }

    pub async fn portfolio_members(&self, id: Uuid) -> Result<Vec<PortfolioMember>, CoreError> {
        let rows = portfolio_members::Entity::find()
            .filter(portfolio_members::Column::PortfolioId.eq(id.to_string()))
            .order_by_asc(portfolio_members::Column::Priority)
            .order_by_asc(portfolio_members::Column::AddedAt)
            .all(self.db())
            .await?;
        rows.into_iter().map(member_from_row).collect()
    }

    pub async fn add_portfolio_member(
        &self,
        portfolio_id: Uuid,
        member: &PortfolioMember,
    ) -> Result<(), CoreError> {
        portfolio_members::ActiveModel {
            portfolio_id: Set(portfolio_id.to_string()),
            intent_id: Set(member.intent_id.to_string()),
            role: Set(member.role.as_str().to_string()),
            priority: Set(member.priority),
            added_at: Set(member.added_at),
        }
        .insert(self.db())
        .await?;
        Ok(())
    }

    /// Returns whether a membership row was actually removed.
    pub async fn remove_portfolio_member(
        &self,
        portfolio_id: Uuid,
        intent_id: Uuid,
    ) -> Result<bool, CoreError> {
        let result = portfolio_members::Entity::delete_many()
            .filter(portfolio_members::Column::PortfolioId.eq(portfolio_id.to_string()))
            .filter(portfolio_members::Column::IntentId.eq(intent_id.to_string()))
            .exec(self.db())
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn update_portfolio_status(
        &self,
        id: Uuid,
        status: PortfolioStatus,
    ) -> Result<Portfolio, CoreError> {
        let row = portfolios::Entity::find_by_id(id.to_string())
            .one(self.db())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("portfolio {id}")))?;
        let mut active: portfolios::ActiveModel = row.into();
        active.status = Set(status.as_str().to_string());
        active.updated_at = Set(Utc::now());
        let updated = active.update(self.db()).await?;
        let members = self.portfolio_members(id).await?;
        portfolio_from_row(updated, members)
    }

    /// Persist a new roll-up summary; returns false when it matches the
    /// stored one (callers skip the event in that case).
    pub async fn set_portfolio_aggregate(
        &self,
        id: Uuid,
        aggregate: &AggregateStatus,
    ) -> Result<bool, CoreError> {
        let row = portfolios::Entity::find_by_id(id.to_string())
            .one(self.db())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("portfolio {id}")))?;
        let previous = row
            .aggregate
            .as_deref()
            .map(from_json::<AggregateStatus>)
            .transpose()?;
        if previous.as_ref() == Some(aggregate) {
            return Ok(false);
        }
        let mut active: portfolios::ActiveModel = row.into();
        active.aggregate = Set(Some(to_json(aggregate)?));
        active.updated_at = Set(Utc::now());
        let _ = active.update(self.db()).await?;
        Ok(true)
    }

    /// Portfolios that contain the given intent, via the by-intent index.
    pub async fn portfolios_for_intent(&self, intent_id: Uuid) -> Result<Vec<Uuid>, CoreError> {
        let rows = portfolio_members::Entity::find()
            .filter(portfolio_members::Column::IntentId.eq(intent_id.to_string()))
            .all(self.db())
            .await?;
        rows.iter().map(|row| parse_uuid(&row.portfolio_id)).collect()
    }
}
