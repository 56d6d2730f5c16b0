//! Response and error sanitization.
//!
//! Results are sanitized before they appear anywhere outside the broker:
//! keys matching the secret pattern are replaced with `[REDACTED]`, long
//! base64-like runs in error strings are redacted, oversized strings and
//! lists are truncated, and recursion is capped.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

const MAX_DEPTH: usize = 10;
const MAX_STRING_CHARS: usize = 10_000;
const MAX_LIST_ITEMS: usize = 100;
const FINGERPRINT_BODY_PREFIX: usize = 2_000;

static SENSITIVE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(secret|password|token|key|auth|credential|api.?key|bearer|access.?token)")
        .expect("sensitive-key pattern")
});

static SECRET_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(api[_-]?key|token|secret|password|bearer)\s*[=:]\s*\S+")
        .expect("secret-assignment pattern")
});

static BASE64_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/]{40,}={0,2}").expect("base64-run pattern"));

/// Recursively strip sensitive-looking values before audit or return.
pub fn sanitize_value(value: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String("[TRUNCATED]".to_string());
    }
    match value {
        Value::Object(map) => {
            let mut sanitized = Map::new();
            for (key, entry) in map {
                if SENSITIVE_KEY.is_match(key) {
                    sanitized.insert(key.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    sanitized.insert(key.clone(), sanitize_value(entry, depth + 1));
                }
            }
            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(MAX_LIST_ITEMS)
                .map(|item| sanitize_value(item, depth + 1))
                .collect(),
        ),
        Value::String(s) if s.chars().count() > MAX_STRING_CHARS => {
            let truncated: String = s.chars().take(MAX_STRING_CHARS).collect();
            Value::String(format!("{truncated}...[TRUNCATED]"))
        }
        other => other.clone(),
    }
}

/// Remove anything that looks like a secret from an error message.
pub fn strip_secrets(error: &str) -> String {
    let cleaned = SECRET_ASSIGNMENT.replace_all(error, "$1=[REDACTED]");
    BASE64_RUN.replace_all(&cleaned, "[REDACTED]").into_owned()
}

/// Clamp a requested timeout to the broker bounds.
pub fn clamp_timeout(timeout_ms: Option<u64>, limits: &crate::config::BrokerConfig) -> std::time::Duration {
    let requested = timeout_ms.unwrap_or(limits.default_timeout_ms);
    std::time::Duration::from_millis(requested.clamp(limits.min_timeout_ms, limits.max_timeout_ms))
}

/// First 16 hex chars of `SHA-256("METHOD|URL|BODY_PREFIX")`, for audit
/// correlation without secret exposure.
pub fn fingerprint(method: &str, url: &str, body: &Value) -> String {
    let body_str = body.to_string();
    let prefix: String = body_str.chars().take(FINGERPRINT_BODY_PREFIX).collect();
    let mut hasher = Sha256::new();
    hasher.update(format!("{method}|{url}|{prefix}").as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;
    use serde_json::json;

    #[test]
    fn test_redacts_sensitive_keys() {
        let value = json!({
            "api_key": "sk-AAAA",
            "Authorization": "Bearer abc",
            "client_secret": "xyz",
            "data": {"password": "p", "plain": 1},
        });
        let sanitized = sanitize_value(&value, 0);
        assert_eq!(sanitized["api_key"], "[REDACTED]");
        assert_eq!(sanitized["Authorization"], "[REDACTED]");
        assert_eq!(sanitized["client_secret"], "[REDACTED]");
        assert_eq!(sanitized["data"]["password"], "[REDACTED]");
        assert_eq!(sanitized["data"]["plain"], 1);
    }

    #[test]
    fn test_truncates_long_strings_and_lists() {
        let long = "x".repeat(12_000);
        let sanitized = sanitize_value(&json!({ "raw": long }), 0);
        let raw = sanitized["raw"].as_str().unwrap();
        assert!(raw.ends_with("...[TRUNCATED]"));
        assert!(raw.len() < 11_000);

        let list: Vec<u64> = (0..500).collect();
        let sanitized = sanitize_value(&json!(list), 0);
        assert_eq!(sanitized.as_array().unwrap().len(), 100);
    }

    #[test]
    fn test_depth_cap() {
        let mut value = json!("leaf");
        for _ in 0..15 {
            value = json!({ "inner": value });
        }
        let sanitized = sanitize_value(&value, 0);
        assert!(sanitized.to_string().contains("[TRUNCATED]"));
    }

    #[test]
    fn test_strip_secret_assignments() {
        let stripped = strip_secrets("request failed: api_key=sk-12345 for host");
        assert!(!stripped.contains("sk-12345"));
        assert!(stripped.contains("api_key=[REDACTED]"));

        let stripped = strip_secrets("token: eyJhbGciOiJIUzI1NiJ9");
        assert!(!stripped.contains("eyJ"));
    }

    #[test]
    fn test_strip_base64_runs() {
        let blob = "A".repeat(64);
        let stripped = strip_secrets(&format!("upstream said {blob} no"));
        assert!(!stripped.contains(&blob));
        assert!(stripped.contains("[REDACTED]"));
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint("POST", "https://api.example.com/v1", &json!({"q": "x"}));
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        // Stable for identical input, different for different input.
        assert_eq!(
            fp,
            fingerprint("POST", "https://api.example.com/v1", &json!({"q": "x"}))
        );
        assert_ne!(
            fp,
            fingerprint("GET", "https://api.example.com/v1", &json!({"q": "x"}))
        );
    }

    quickcheck! {
        fn prop_sanitized_never_contains_secret_values(secret: String) -> bool {
            if secret.len() < 8 || secret.contains("[REDACTED]") {
                return true;
            }
            let value = json!({ "api_key": secret, "nested": { "token": secret } });
            !sanitize_value(&value, 0).to_string().contains(&secret)
        }
    }
}
