//! Tool invocation endpoint. The result envelope is always the body; the
//! wire status tracks the outcome kind.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::ApiKeyAuth;
use crate::errors::CoreError;
use crate::server::{AppState, identify};
use crate::tools::{ToolCallStatus, ToolExecutionResult};

#[derive(Deserialize)]
pub struct InvokeBody {
    #[serde(default)]
    pub parameters: Value,
}

pub async fn invoke_tool(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, tool_name)): Path<(Uuid, String)>,
    Json(body): Json<InvokeBody>,
) -> Result<(StatusCode, Json<ToolExecutionResult>), CoreError> {
    let actor = identify(&state, &headers)?;
    ApiKeyAuth::require_writer(&actor)?;
    let result = state
        .tools
        .invoke(&actor, id, &tool_name, body.parameters)
        .await?;
    Ok((wire_status(&result), Json(result)))
}

fn wire_status(result: &ToolExecutionResult) -> StatusCode {
    match result.status {
        ToolCallStatus::Success => StatusCode::OK,
        ToolCallStatus::Denied => StatusCode::FORBIDDEN,
        ToolCallStatus::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ToolCallStatus::Error => StatusCode::BAD_GATEWAY,
    }
}
