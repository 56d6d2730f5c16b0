//! Webhook adapter: POST a standardized JSON envelope, optionally signed.
//!
//! The body is `{tool_name, parameters, timestamp}`; with a
//! `signing_secret` in the secret document the exact body bytes are
//! HMAC-SHA256 signed into `X-OpenIntent-Signature: sha256=<hex>`.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use ring::hmac;
use serde_json::json;

use crate::tools::adapter::{AdapterContext, ToolAdapter, ToolExecutionResult};
use crate::tools::guard::validate_url;
use crate::tools::rest::{ReadError, parse_body, read_capped};
use crate::tools::sanitize::{clamp_timeout, fingerprint, strip_secrets};

pub const SIGNATURE_HEADER: &str = "X-OpenIntent-Signature";

pub struct WebhookAdapter;

#[async_trait]
impl ToolAdapter for WebhookAdapter {
    async fn execute(&self, ctx: &AdapterContext<'_>) -> ToolExecutionResult {
        let Some(webhook_url) = ctx.metadata.get("base_url").and_then(|v| v.as_str()) else {
            return ToolExecutionResult::error("webhook credential missing `base_url`");
        };
        let allowed_hosts = ctx.allowed_hosts();
        if let Err(reason) =
            validate_url(webhook_url, allowed_hosts.as_deref(), ctx.limits.allow_loopback)
        {
            return ToolExecutionResult::denied(
                format!("security validation failed: {reason}"),
                "DENIED",
            );
        }

        let envelope = json!({
            "tool_name": ctx.tool_name,
            "parameters": ctx.parameters,
            "timestamp": Utc::now().timestamp_millis() as f64 / 1000.0,
        });
        let body = envelope.to_string();
        let request_fingerprint = fingerprint("POST", webhook_url, &envelope);

        let timeout = clamp_timeout(
            ctx.metadata.get("timeout_ms").and_then(|v| v.as_u64()),
            ctx.limits,
        );
        let mut request = ctx
            .http
            .post(webhook_url)
            .timeout(timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone());
        if let Some(signing_secret) = ctx.secret.get("signing_secret").and_then(|v| v.as_str()) {
            let key = hmac::Key::new(hmac::HMAC_SHA256, signing_secret.as_bytes());
            let tag = hmac::sign(&key, body.as_bytes());
            request = request.header(
                SIGNATURE_HEADER,
                format!("sha256={}", hex::encode(tag.as_ref())),
            );
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                let mut result = ToolExecutionResult::timeout();
                result.request_fingerprint = Some(request_fingerprint);
                return result;
            }
            Err(e) => {
                let mut result = ToolExecutionResult::error(format!(
                    "webhook dispatch failed: {}",
                    strip_secrets(&e.to_string())
                ));
                result.request_fingerprint = Some(request_fingerprint);
                return result;
            }
        };

        let http_status = response.status().as_u16();
        let success = response.status().is_success();
        let payload = match read_capped(response, ctx.limits.max_response_bytes).await {
            Ok(body) => parse_body(&body),
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

        if success {
            ToolExecutionResult::success(payload, http_status, request_fingerprint)
        } else {
            let mut result =
                ToolExecutionResult::error(format!("webhook returned HTTP {http_status}"));
            result.result = Some(payload);
            result.http_status = Some(http_status);
            result.request_fingerprint = Some(request_fingerprint);
            result
        }
    }
}
