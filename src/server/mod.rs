//! HTTP surface: a JSON-over-HTTP API plus an SSE event stream.
//!
//! This layer does parsing, authentication, and content negotiation only;
//! every behavior lives in the engine and the tool broker. Errors map to
//! stable statuses with a machine-readable `error_kind` body.

mod governance;
mod intents;
mod portfolios;
mod stream;
mod tools;

use std::sync::Arc;

use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;
use tracing::error;

use crate::auth::{API_KEY_HEADER, ApiKeyAuth};
use crate::engine::Engine;
use crate::errors::CoreError;
use crate::model::AgentIdentity;
use crate::tools::ToolBroker;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub tools: Arc<ToolBroker>,
    pub auth: Arc<ApiKeyAuth>,
}

/// Build the router over an engine, a tool broker, and an API-key table.
pub fn create_app(engine: Arc<Engine>, tools: Arc<ToolBroker>, auth: Arc<ApiKeyAuth>) -> Router {
    let state = AppState {
        engine,
        tools,
        auth,
    };
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/intents",
            post(intents::create_intent).get(intents::list_intents),
        )
        .route("/intents/{id}", get(intents::get_intent))
        .route(
            "/intents/{id}/state",
            axum::routing::patch(intents::patch_state).put(intents::replace_state),
        )
        .route("/intents/{id}/status", axum::routing::patch(intents::patch_status))
        .route("/intents/{id}/constraints", axum::routing::put(intents::put_constraints))
        .route("/intents/{id}/graph", get(intents::get_graph))
        .route("/intents/{id}/children/ready", get(intents::ready_children))
        .route("/intents/{id}/children/blocked", get(intents::blocked_children))
        .route(
            "/intents/{id}/events",
            post(intents::append_event).get(intents::list_events),
        )
        .route(
            "/intents/{id}/leases",
            post(intents::acquire_lease).get(intents::list_leases),
        )
        .route(
            "/intents/{id}/leases/{lease_id}",
            delete(intents::release_lease),
        )
        .route(
            "/intents/{id}/leases/{lease_id}/renew",
            post(intents::renew_lease),
        )
        .route(
            "/intents/{id}/retry_policy",
            post(intents::set_retry_policy),
        )
        .route(
            "/intents/{id}/failures",
            post(intents::record_failure).get(intents::list_failures),
        )
        .route("/intents/{id}/comments", post(governance::add_comment))
        .route(
            "/intents/{id}/arbitration",
            post(governance::request_arbitration),
        )
        .route("/intents/{id}/decisions", post(governance::record_decision))
        .route(
            "/intents/{id}/costs",
            post(governance::record_cost).get(governance::list_costs),
        )
        .route(
            "/intents/{id}/attachments",
            post(governance::add_attachment).get(governance::list_attachments),
        )
        .route("/attachments/{id}", get(governance::get_attachment))
        .route("/credentials", post(governance::register_credential))
        .route("/grants", post(governance::register_grant))
        .route(
            "/portfolios",
            post(portfolios::create_portfolio).get(portfolios::list_portfolios),
        )
        .route("/portfolios/{id}", get(portfolios::get_portfolio))
        .route(
            "/portfolios/{id}/status",
            axum::routing::patch(portfolios::update_status),
        )
        .route("/portfolios/{id}/members", post(portfolios::add_member))
        .route(
            "/portfolios/{id}/members/{intent_id}",
            delete(portfolios::remove_member),
        )
        .route("/intents/{id}/tools/{tool_name}", post(tools::invoke_tool))
        .route("/streams/events", get(stream::stream_events))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Resolve the caller from the API-key header.
pub(crate) fn identify(state: &AppState, headers: &HeaderMap) -> Result<AgentIdentity, CoreError> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(CoreError::Unauthenticated)?;
    state.auth.authenticate(api_key)
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &self {
            // Never leak internals on the wire.
            CoreError::Storage(e) => {
                error!(error = %e, "storage failure");
                "internal error".to_string()
            }
            CoreError::Internal(e) => {
                error!(error = %e, "internal failure");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let mut body = json!({
            "error_kind": self.kind(),
            "message": message,
        });
        match &self {
            CoreError::VersionConflict { current_version } => {
                body["current_version"] = json!(current_version);
            }
            CoreError::LeaseConflict { holder, expires_at } => {
                body["holder_agent_id"] = json!(holder);
                body["expires_at"] = json!(expires_at);
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}
