//! Portfolio endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::ApiKeyAuth;
use crate::errors::CoreError;
use crate::model::{GovernancePolicy, MembershipRole, Portfolio, PortfolioStatus};
use crate::server::{AppState, identify};

#[derive(Deserialize)]
pub struct PortfolioBody {
    pub name: String,
    #[serde(default)]
    pub governance_policy: Option<GovernancePolicy>,
}

pub async fn create_portfolio(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PortfolioBody>,
) -> Result<(StatusCode, Json<Portfolio>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let portfolio = state
        .engine
        .create_portfolio(&actor, &body.name, body.governance_policy)
        .await?;
    Ok((StatusCode::CREATED, Json(portfolio)))
}

pub async fn list_portfolios(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Portfolio>>, CoreError> {
    let _ = identify(&state, &headers)?;
    Ok(Json(state.engine.list_portfolios().await?))
}

pub async fn get_portfolio(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Portfolio>, CoreError> {
    let _ = identify(&state, &headers)?;
    Ok(Json(state.engine.get_portfolio(id).await?))
}

#[derive(Deserialize)]
pub struct StatusBody {
    pub status: PortfolioStatus,
}

pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Portfolio>, CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let portfolio = state
        .engine
        .update_portfolio_status(&actor, id, body.status)
        .await?;
    Ok(Json(portfolio))
}

#[derive(Deserialize)]
pub struct MemberBody {
    pub intent_id: Uuid,
    pub role: MembershipRole,
    #[serde(default)]
    pub priority: i32,
}

pub async fn add_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<MemberBody>,
) -> Result<(StatusCode, Json<Portfolio>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let portfolio = state
        .engine
        .add_portfolio_member(&actor, id, body.intent_id, body.role, body.priority)
        .await?;
    Ok((StatusCode::CREATED, Json(portfolio)))
}

pub async fn remove_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, intent_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Portfolio>, CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let portfolio = state
        .engine
        .remove_portfolio_member(&actor, id, intent_id)
        .await?;
    Ok(Json(portfolio))
}
