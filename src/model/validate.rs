//! Input validation helpers, applied before any state is touched.
//!
//! Each helper returns a `Validation` error naming the offending field so
//! callers can surface a 400 without partial effects.

use serde_json::Value;

use crate::errors::CoreError;

pub const TITLE_MAX: usize = 500;
pub const DESCRIPTION_MAX: usize = 10_000;
pub const AGENT_ID_MAX: usize = 255;

pub fn require_non_empty(value: &str, field: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

pub fn validate_title(title: &str) -> Result<(), CoreError> {
    require_non_empty(title, "title")?;
    if title.len() > TITLE_MAX {
        return Err(CoreError::validation(format!(
            "title must be at most {TITLE_MAX} characters"
        )));
    }
    Ok(())
}

pub fn validate_description(description: &str) -> Result<(), CoreError> {
    if description.len() > DESCRIPTION_MAX {
        return Err(CoreError::validation(format!(
            "description must be at most {DESCRIPTION_MAX} characters"
        )));
    }
    Ok(())
}

pub fn validate_agent_id(agent_id: &str) -> Result<(), CoreError> {
    require_non_empty(agent_id, "agent_id")?;
    if agent_id.len() > AGENT_ID_MAX {
        return Err(CoreError::validation(format!(
            "agent_id must be at most {AGENT_ID_MAX} characters"
        )));
    }
    Ok(())
}

/// Scope grammar: `ident(.ident)*` where ident is `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_scope(scope: &str) -> Result<(), CoreError> {
    let valid = !scope.is_empty()
        && scope.split('.').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                }
                _ => false,
            }
        });
    if !valid {
        return Err(CoreError::validation(format!(
            "scope must be a dot-separated path of identifiers, got `{scope}`"
        )));
    }
    Ok(())
}

pub fn validate_currency(currency: &str) -> Result<(), CoreError> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(CoreError::validation(
            "currency must be a 3-letter code".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_amount(amount: f64) -> Result<(), CoreError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(CoreError::validation(
            "amount must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}

/// State documents and patches must be JSON objects at the top level.
pub fn validate_state_object(value: &Value, field: &str) -> Result<(), CoreError> {
    if !value.is_object() {
        return Err(CoreError::validation(format!(
            "{field} must be a JSON object"
        )));
    }
    Ok(())
}
