//! Governance endpoints: comments, arbitration, decisions, costs,
//! attachments, and the governor-only credential/grant administration.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::ApiKeyAuth;
use crate::errors::CoreError;
use crate::model::{
    Attachment, AuthType, CostEntry, CostSummary, CostType, Credential, GrantConstraints,
    IntentEvent, ToolGrant,
};
use crate::server::{AppState, identify};

#[derive(Deserialize)]
pub struct CommentBody {
    pub message: String,
}

pub async fn add_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<CommentBody>,
) -> Result<(StatusCode, Json<IntentEvent>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let event = state.engine.add_comment(&actor, id, &body.message).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

#[derive(Deserialize)]
pub struct ArbitrationBody {
    pub question: String,
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

pub async fn request_arbitration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ArbitrationBody>,
) -> Result<(StatusCode, Json<IntentEvent>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let event = state
        .engine
        .request_arbitration(&actor, id, &body.question, body.options)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

#[derive(Deserialize)]
pub struct DecisionBody {
    pub decision: String,
    #[serde(default)]
    pub rationale: Option<String>,
}

pub async fn record_decision(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<DecisionBody>,
) -> Result<(StatusCode, Json<IntentEvent>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_governor(&actor)?;
    let event = state
        .engine
        .record_decision(&actor, id, &body.decision, body.rationale)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

#[derive(Deserialize)]
pub struct CostBody {
    pub cost_type: CostType,
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn record_cost(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<CostBody>,
) -> Result<(StatusCode, Json<CostEntry>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let entry = state
        .engine
        .record_cost(
            &actor,
            id,
            body.cost_type,
            body.amount,
            &body.currency,
            body.description,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(serde::Serialize)]
pub struct CostsView {
    pub entries: Vec<CostEntry>,
    pub summary: CostSummary,
}

pub async fn list_costs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<CostsView>, CoreError> {
    let _ = identify(&state, &headers)?;
    let entries = state.engine.list_costs(id).await?;
    let summary = CostSummary::from_entries(&entries);
    Ok(Json(CostsView { entries, summary }))
}

#[derive(Deserialize)]
pub struct AttachmentBody {
    pub filename: String,
    pub content_type: String,
    /// Base64-encoded blob.
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn add_attachment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<AttachmentBody>,
) -> Result<(StatusCode, Json<Attachment>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let content = BASE64
        .decode(&body.content)
        .map_err(|_| CoreError::validation("content must be valid base64".to_string()))?;
    let attachment = state
        .engine
        .add_attachment(
            &actor,
            id,
            &body.filename,
            &body.content_type,
            &content,
            body.metadata,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

pub async fn list_attachments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Attachment>>, CoreError> {
    let _ = identify(&state, &headers)?;
    Ok(Json(state.engine.list_attachments(id).await?))
}

pub async fn get_attachment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, CoreError> {
    let _ = identify(&state, &headers)?;
    let (attachment, blob) = state.engine.get_attachment(id).await?;
    Ok((
        [(header::CONTENT_TYPE, attachment.content_type.clone())],
        blob,
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct CredentialBody {
    pub auth_type: AuthType,
    pub metadata: Value,
    /// Secret document; sealed at rest, never echoed back.
    pub secret: Value,
}

pub async fn register_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CredentialBody>,
) -> Result<(StatusCode, Json<Credential>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_governor(&actor)?;
    let credential = Credential {
        id: Uuid::new_v4(),
        auth_type: body.auth_type,
        metadata: body.metadata,
        created_at: Utc::now(),
    };
    state
        .engine
        .store()
        .put_credential(&credential, &body.secret)
        .await?;
    Ok((StatusCode::CREATED, Json(credential)))
}

#[derive(Deserialize)]
pub struct GrantBody {
    pub agent_id: String,
    pub tool_name: String,
    pub credential_id: Uuid,
    #[serde(default)]
    pub constraints: Option<GrantConstraints>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn register_grant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GrantBody>,
) -> Result<(StatusCode, Json<ToolGrant>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_governor(&actor)?;
    // Credential must exist before a grant can reference it.
    let _ = state.engine.store().credential(body.credential_id).await?;
    let grant = ToolGrant {
        id: Uuid::new_v4(),
        agent_id: body.agent_id,
        tool_name: body.tool_name,
        credential_id: body.credential_id,
        constraints: body.constraints,
        expires_at: body.expires_at,
        created_at: Utc::now(),
    };
    state.engine.store().put_grant(&grant).await?;
    Ok((StatusCode::CREATED, Json(grant)))
}
