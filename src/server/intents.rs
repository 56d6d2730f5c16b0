//! Intent, lease, and retry endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::ApiKeyAuth;
use crate::engine::{FailureReport, IntentGraph};
use crate::errors::CoreError;
use crate::model::{
    EventType, FailureRecord, Intent, IntentEvent, IntentFilter, IntentStatus, Lease, NewIntent,
    RetryPolicy,
};
use crate::server::{AppState, identify};

pub async fn create_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<NewIntent>,
) -> Result<(StatusCode, Json<Intent>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let intent = state.engine.create_intent(&actor, params).await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub creator_agent_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

pub async fn list_intents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Intent>>, CoreError> {
    let _ = identify(&state, &headers)?;
    let status = query
        .status
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(CoreError::Validation)?;
    let filter = IntentFilter {
        status,
        creator_agent_id: query.creator_agent_id,
        parent_id: query.parent_id,
        limit: query.limit,
        offset: query.offset,
    };
    Ok(Json(state.engine.list_intents(&filter).await?))
}

pub async fn get_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Intent>, CoreError> {
    let _ = identify(&state, &headers)?;
    Ok(Json(state.engine.get_intent(id).await?))
}

#[derive(Deserialize)]
pub struct StatePatch {
    pub expected_version: i64,
    pub patch: Value,
}

pub async fn patch_state(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<StatePatch>,
) -> Result<Json<Intent>, CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let intent = state
        .engine
        .update_state(&actor, id, body.expected_version, body.patch)
        .await?;
    Ok(Json(intent))
}

#[derive(Deserialize)]
pub struct StateReplace {
    pub expected_version: i64,
    pub state: Value,
}

pub async fn replace_state(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<StateReplace>,
) -> Result<Json<Intent>, CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let intent = state
        .engine
        .replace_state(&actor, id, body.expected_version, body.state)
        .await?;
    Ok(Json(intent))
}

#[derive(Deserialize)]
pub struct StatusChange {
    pub expected_version: i64,
    pub status: IntentStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn patch_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusChange>,
) -> Result<Json<Intent>, CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let intent = state
        .engine
        .set_status(&actor, id, body.expected_version, body.status, body.reason)
        .await?;
    Ok(Json(intent))
}

#[derive(Deserialize)]
pub struct ConstraintsUpdate {
    pub expected_version: i64,
    pub constraints: Vec<String>,
}

pub async fn put_constraints(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ConstraintsUpdate>,
) -> Result<Json<Intent>, CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let intent = state
        .engine
        .set_constraints(&actor, id, body.expected_version, body.constraints)
        .await?;
    Ok(Json(intent))
}

pub async fn get_graph(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<IntentGraph>, CoreError> {
    let _ = identify(&state, &headers)?;
    Ok(Json(state.engine.get_graph(id).await?))
}

pub async fn ready_children(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Intent>>, CoreError> {
    let _ = identify(&state, &headers)?;
    Ok(Json(state.engine.ready_children(id).await?))
}

pub async fn blocked_children(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Intent>>, CoreError> {
    let _ = identify(&state, &headers)?;
    Ok(Json(state.engine.blocked_children(id).await?))
}

#[derive(Deserialize)]
pub struct EventAppend {
    pub event_type: EventType,
    #[serde(default)]
    pub payload: Value,
}

pub async fn append_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<EventAppend>,
) -> Result<(StatusCode, Json<IntentEvent>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let event = state
        .engine
        .append_audit_event(&actor, id, body.event_type, body.payload)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

#[derive(Deserialize)]
pub struct EventsPage {
    #[serde(default)]
    pub from: Option<i64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

pub async fn list_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(page): Query<EventsPage>,
) -> Result<Json<Vec<IntentEvent>>, CoreError> {
    let _ = identify(&state, &headers)?;
    let events = state
        .engine
        .list_events(id, page.from.unwrap_or(1), page.limit.unwrap_or(100))
        .await?;
    Ok(Json(events))
}

#[derive(Deserialize)]
pub struct LeaseRequest {
    pub scope: String,
    pub ttl_seconds: u64,
}

pub async fn acquire_lease(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<LeaseRequest>,
) -> Result<(StatusCode, Json<Lease>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let lease = state
        .engine
        .acquire_lease(&actor, id, &body.scope, body.ttl_seconds)
        .await?;
    Ok((StatusCode::CREATED, Json(lease)))
}

pub async fn list_leases(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Lease>>, CoreError> {
    let _ = identify(&state, &headers)?;
    Ok(Json(state.engine.list_leases(id).await?))
}

pub async fn release_lease(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, lease_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Lease>, CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    Ok(Json(state.engine.release_lease(&actor, id, lease_id).await?))
}

#[derive(Deserialize)]
pub struct LeaseRenewal {
    pub ttl_seconds: u64,
}

pub async fn renew_lease(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, lease_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<LeaseRenewal>,
) -> Result<Json<Lease>, CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let lease = state
        .engine
        .renew_lease(&actor, id, lease_id, body.ttl_seconds)
        .await?;
    Ok(Json(lease))
}

#[derive(Deserialize)]
pub struct RetryPolicyUpdate {
    pub expected_version: i64,
    pub policy: RetryPolicy,
}

pub async fn set_retry_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<RetryPolicyUpdate>,
) -> Result<Json<Intent>, CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let intent = state
        .engine
        .set_retry_policy(&actor, id, body.expected_version, body.policy)
        .await?;
    Ok(Json(intent))
}

#[derive(Deserialize)]
pub struct FailureBody {
    pub error_type: String,
    pub error_message: String,
    pub recoverable: bool,
    #[serde(default)]
    pub context: Option<Value>,
}

pub async fn record_failure(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<FailureBody>,
) -> Result<(StatusCode, Json<FailureRecord>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let record = state
        .engine
        .record_failure(
            &actor,
            id,
            FailureReport {
                error_type: body.error_type,
                error_message: body.error_message,
                recoverable: body.recoverable,
                context: body.context,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list_failures(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<FailureRecord>>, CoreError> {
    let _ = identify(&state, &headers)?;
    Ok(Json(state.engine.get_attempts(id).await?))
}
