//! OAuth2 adapter: bearer execution with one automatic token refresh.
//!
//! Executes like the REST adapter using `access_token` from the secret
//! document. On an upstream 401 with refresh material available it
//! attempts one refresh (`client_credentials` or `refresh_token` grant)
//! against `token_url`, retries once, and marks the retried success with
//! a `_refreshed` flag.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::tools::adapter::{AdapterContext, ToolAdapter, ToolExecutionResult};
use crate::tools::guard::validate_url;
use crate::tools::rest::{ReadError, execute_rest, read_capped};
use crate::tools::sanitize::{clamp_timeout, strip_secrets};

pub struct OAuth2Adapter;

#[async_trait]
impl ToolAdapter for OAuth2Adapter {
    async fn execute(&self, ctx: &AdapterContext<'_>) -> ToolExecutionResult {
        let Some(access_token) = ctx.secret.get("access_token").and_then(|v| v.as_str()) else {
            return ToolExecutionResult::error("OAuth2 credential missing `access_token`");
        };

        let mut result = execute_rest(ctx, Some(access_token)).await;
        if result.http_status == Some(401) && can_refresh(ctx) {
            if let Some(fresh_token) = refresh_token(ctx).await {
                result = execute_rest(ctx, Some(&fresh_token)).await;
                if result.status == crate::tools::adapter::ToolCallStatus::Success {
                    let payload = result.result.take().unwrap_or_else(|| Value::Object(Default::default()));
                    let mut object = match payload {
                        Value::Object(map) => map,
                        other => {
                            let mut map = serde_json::Map::new();
                            map.insert("result".to_string(), other);
                            map
                        }
                    };
                    object.insert("_refreshed".to_string(), Value::Bool(true));
                    result.result = Some(Value::Object(object));
                }
            }
        }
        result
    }
}

fn can_refresh(ctx: &AdapterContext<'_>) -> bool {
    let has_token_url = ctx
        .metadata
        .get("token_url")
        .and_then(|v| v.as_str())
        .is_some();
    let has_client_credentials = ctx.secret.get("client_id").and_then(|v| v.as_str()).is_some()
        && ctx
            .secret
            .get("client_secret")
            .and_then(|v| v.as_str())
            .is_some();
    let has_refresh_token = ctx
        .secret
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .is_some();
    has_token_url && (has_client_credentials || has_refresh_token)
}

async fn refresh_token(ctx: &AdapterContext<'_>) -> Option<String> {
    let token_url = ctx.metadata.get("token_url").and_then(|v| v.as_str())?;
    if let Err(reason) = validate_url(token_url, None, ctx.limits.allow_loopback) {
        warn!(reason, "token URL blocked by security validation");
        return None;
    }

    let grant_type = ctx
        .metadata
        .get("token_grant_type")
        .and_then(|v| v.as_str())
        .unwrap_or("client_credentials");
    let mut form: Vec<(&str, String)> = vec![("grant_type", grant_type.to_string())];
    if grant_type == "refresh_token" {
        let refresh = ctx.secret.get("refresh_token").and_then(|v| v.as_str())?;
        form.push(("refresh_token", refresh.to_string()));
    }

    let timeout = clamp_timeout(
        ctx.metadata.get("timeout_ms").and_then(|v| v.as_u64()),
        ctx.limits,
    );
    let mut request = ctx.http.post(token_url).timeout(timeout).form(&form);
    if let Some(client_id) = ctx.secret.get("client_id").and_then(|v| v.as_str()) {
        let client_secret = ctx
            .secret
            .get("client_secret")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        request = request.basic_auth(client_id, Some(client_secret));
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %strip_secrets(&e.to_string()), "token refresh failed");
            return None;
        }
    };
    if !response.status().is_success() {
        warn!(status = response.status().as_u16(), "token refresh rejected");
        return None;
    }
    let body = match read_capped(response, ctx.limits.max_response_bytes).await {
        Ok(body) => body,
        Err(ReadError::TooLarge) => {
            warn!("token refresh response too large");
            return None;
        }
        Err(_) => return None,
    };
    serde_json::from_slice::<Value>(&body)
        .ok()?
        .get("access_token")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
