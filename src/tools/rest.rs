//! REST adapter: API-key, bearer, and basic auth against a configured
//! base URL and per-tool endpoint table.
//!
//! Credential metadata layout:
//!
//! ```json
//! {
//!   "base_url": "https://api.example.com",
//!   "endpoints": {
//!     "search": {
//!       "path": "/v1/search",
//!       "method": "POST",
//!       "headers": {"X-Custom": "value"},
//!       "param_mapping": "body"
//!     }
//!   },
//!   "auth": {
//!     "location": "header",
//!     "header_name": "X-API-Key",
//!     "query_param": "apikey",
//!     "header_prefix": "Bearer"
//!   },
//!   "timeout_ms": 30000,
//!   "allowed_hosts": ["api.example.com"]
//! }
//! ```
//!
//! Secrets: `api_key` / `token` for key and bearer auth, `username` +
//! `password` for basic auth.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};

use crate::model::AuthType;
use crate::tools::adapter::{AdapterContext, ToolAdapter, ToolExecutionResult};
use crate::tools::guard::validate_url;
use crate::tools::sanitize::{clamp_timeout, fingerprint, strip_secrets};

const RAW_BODY_PREVIEW: usize = 5_000;

pub struct RestAdapter;

#[async_trait]
impl ToolAdapter for RestAdapter {
    async fn execute(&self, ctx: &AdapterContext<'_>) -> ToolExecutionResult {
        execute_rest(ctx, None).await
    }
}

/// Shared REST execution. `token_override` forces bearer auth with the
/// given token (used by the OAuth2 adapter).
pub(crate) async fn execute_rest(
    ctx: &AdapterContext<'_>,
    token_override: Option<&str>,
) -> ToolExecutionResult {
    let Some(base_url) = ctx.metadata.get("base_url").and_then(|v| v.as_str()) else {
        return ToolExecutionResult::error("credential metadata missing `base_url`");
    };

    let endpoint = ctx
        .metadata
        .get("endpoints")
        .and_then(|e| e.get(ctx.tool_name))
        .cloned()
        .unwrap_or_else(|| json!({}));
    let path = endpoint
        .get("path")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("/{}", ctx.tool_name));
    let method_name = endpoint
        .get("method")
        .and_then(|v| v.as_str())
        .unwrap_or("POST")
        .to_ascii_uppercase();
    let Ok(method) = Method::from_bytes(method_name.as_bytes()) else {
        return ToolExecutionResult::error(format!("invalid method `{method_name}`"));
    };
    let param_mapping = endpoint
        .get("param_mapping")
        .and_then(|v| v.as_str())
        .unwrap_or("body");

    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    let allowed_hosts = ctx.allowed_hosts();
    if let Err(reason) = validate_url(&url, allowed_hosts.as_deref(), ctx.limits.allow_loopback) {
        return ToolExecutionResult::denied(
            format!("security validation failed: {reason}"),
            "DENIED",
        );
    }

    let mut headers = HeaderMap::new();
    if let Some(extra) = endpoint.get("headers").and_then(|v| v.as_object()) {
        for (name, value) in extra {
            if let (Ok(name), Some(Ok(value))) = (
                HeaderName::from_bytes(name.as_bytes()),
                value.as_str().map(HeaderValue::from_str),
            ) {
                headers.insert(name, value);
            }
        }
    }

    let auth = ctx.metadata.get("auth").cloned().unwrap_or_else(|| json!({}));
    let mut auth_query: Option<(String, String)> = None;
    let mut basic: Option<(String, String)> = None;

    let effective_auth = if token_override.is_some() {
        AuthType::Bearer
    } else {
        ctx.auth_type
    };
    match effective_auth {
        AuthType::ApiKey | AuthType::Bearer | AuthType::Oauth2 => {
            let secret_value = token_override
                .map(str::to_string)
                .or_else(|| {
                    ctx.secret
                        .get("api_key")
                        .or_else(|| ctx.secret.get("token"))
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_default();
            let location = auth.get("location").and_then(|v| v.as_str()).unwrap_or("header");
            if location == "query" {
                let param = auth
                    .get("query_param")
                    .and_then(|v| v.as_str())
                    .unwrap_or("api_key");
                auth_query = Some((param.to_string(), secret_value));
            } else {
                let header_name = auth
                    .get("header_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Authorization");
                let mut prefix = auth
                    .get("header_prefix")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                if prefix.is_empty() && effective_auth != AuthType::ApiKey {
                    prefix = "Bearer".to_string();
                }
                let rendered = if prefix.is_empty() {
                    secret_value
                } else {
                    format!("{prefix} {secret_value}")
                };
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(header_name.as_bytes()),
                    HeaderValue::from_str(&rendered),
                ) {
                    headers.insert(name, value);
                }
            }
        }
        AuthType::Basic => {
            basic = Some((
                ctx.secret
                    .get("username")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                ctx.secret
                    .get("password")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            ));
        }
        AuthType::Webhook => {}
    }

    let timeout = clamp_timeout(
        ctx.metadata.get("timeout_ms").and_then(|v| v.as_u64()),
        ctx.limits,
    );
    let request_fingerprint = fingerprint(method.as_str(), &url, ctx.parameters);

    let mut request = ctx
        .http
        .request(method.clone(), &url)
        .timeout(timeout)
        .headers(headers);
    if let Some((username, password)) = basic {
        request = request.basic_auth(username, Some(password));
    }
    let has_body = method == Method::POST || method == Method::PUT || method == Method::PATCH;
    let params_in_query = !has_body || param_mapping == "query";
    // One merged query map: caller parameters win over the auth param on
    // a key collision, and no key is serialized twice.
    let mut query: Vec<(String, String)> = Vec::new();
    if let Some((param, value)) = auth_query {
        query.push((param, value));
    }
    if params_in_query {
        for (key, value) in query_pairs(ctx.parameters) {
            if let Some(existing) = query.iter_mut().find(|(k, _)| *k == key) {
                existing.1 = value;
            } else {
                query.push((key, value));
            }
        }
    } else {
        request = request.json(ctx.parameters);
    }
    if !query.is_empty() {
        request = request.query(&query);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => {
            let mut result = ToolExecutionResult::timeout();
            result.request_fingerprint = Some(request_fingerprint);
            return result;
        }
        Err(e) if e.is_connect() => {
            let mut result =
                ToolExecutionResult::error(format!("connection failed: {}", strip_secrets(&e.to_string())));
            result.request_fingerprint = Some(request_fingerprint);
            return result;
        }
        Err(e) => {
            let mut result = ToolExecutionResult::error(format!(
                "execution failed: {}",
                strip_secrets(&e.to_string())
            ));
            result.request_fingerprint = Some(request_fingerprint);
            return result;
        }
    };

    let http_status = response.status().as_u16();
    let success = response.status().is_success();
    let body = match read_capped(response, ctx.limits.max_response_bytes).await {
        Ok(body) => body,
        Err(ReadError::TooLarge) => {
            return ToolExecutionResult::too_large(
                ctx.limits.max_response_bytes,
                http_status,
                request_fingerprint,
            );
        }
        Err(ReadError::Timeout) => {
            let mut result = ToolExecutionResult::timeout();
            result.request_fingerprint = Some(request_fingerprint);
            return result;
        }
        Err(ReadError::Other(message)) => {
            let mut result = ToolExecutionResult::error(message);
            result.request_fingerprint = Some(request_fingerprint);
            return result;
        }
    };

    let payload = parse_body(&body);
    if success {
        ToolExecutionResult::success(payload, http_status, request_fingerprint)
    } else {
        let mut result = ToolExecutionResult::error(format!("upstream returned HTTP {http_status}"));
        result.result = Some(payload);
        result.http_status = Some(http_status);
        result.request_fingerprint = Some(request_fingerprint);
        result
    }
}

pub(crate) enum ReadError {
    TooLarge,
    Timeout,
    Other(String),
}

/// Read the response body up to the size cap; abort past it.
pub(crate) async fn read_capped(
    response: reqwest::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, ReadError> {
    let mut stream = response.bytes_stream();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                ReadError::Timeout
            } else {
                ReadError::Other(format!("read failed: {}", strip_secrets(&e.to_string())))
            }
        })?;
        if body.len() + chunk.len() > max_bytes {
            return Err(ReadError::TooLarge);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Parse the body as JSON, falling back to a raw-text preview.
pub(crate) fn parse_body(body: &[u8]) -> Value {
    match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            let preview: String = text.chars().take(RAW_BODY_PREVIEW).collect();
            json!({ "raw": preview })
        }
    }
}

/// Flatten a parameter object into query pairs, stringifying scalars and
/// JSON-encoding anything nested.
pub(crate) fn query_pairs(parameters: &Value) -> Vec<(String, String)> {
    match parameters {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), rendered)
            })
            .collect(),
        _ => Vec::new(),
    }
}
