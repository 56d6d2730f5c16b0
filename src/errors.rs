//! Error types for the OpenIntent engine.
//!
//! This module defines a unified error enumeration used across the storage
//! layer, the coordination services, the event broker, the tool-execution
//! broker, and the HTTP surface. It integrates with `thiserror` to provide
//! rich `Display` implementations and error source chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - `kind()` and `http_status()` give the stable machine-readable error
//!   kind and wire status for the HTTP surface.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the OpenIntent engine.
///
/// - Used across storage, coordination services, fan-out and the tool broker.
/// - Implements `std::error::Error` via `thiserror`.
pub enum CoreError {
    /// Malformed input, rejected before any state was touched.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Missing or unknown API key.
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Authenticated, but the agent's role lacks permission.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Target record absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed; carries the current version.
    #[error("Version conflict: current version is {current_version}")]
    VersionConflict { current_version: i64 },

    /// The `(intent, scope)` pair is already held by another agent.
    #[error("Lease conflict: scope held by `{holder}` until {expires_at}")]
    LeaseConflict {
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// Renewal or release attempted by an agent that does not hold the lease.
    #[error("Lease not held by `{0}`")]
    LeaseNotHeld(String),

    /// Tool grant missing, expired, or violating a constraint.
    #[error("Grant denied: {0}")]
    GrantDenied(String),

    /// Upstream response exceeded the broker's size cap.
    #[error("Upstream response exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },

    /// Upstream call exceeded the clamped deadline.
    #[error("Upstream call timed out")]
    Timeout,

    /// Underlying database failure.
    #[error("Storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),

    /// Anything else; logged, never detailed on the wire.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(msg.into())
    }

    /// Stable machine-readable kind, surfaced as `error_kind` on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION",
            CoreError::Unauthenticated => "UNAUTHENTICATED",
            CoreError::Unauthorized(_) => "UNAUTHORIZED",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::VersionConflict { .. } => "VERSION_CONFLICT",
            CoreError::LeaseConflict { .. } => "LEASE_CONFLICT",
            CoreError::LeaseNotHeld(_) => "LEASE_NOT_HELD",
            CoreError::GrantDenied(_) => "GRANT_DENIED",
            CoreError::ResponseTooLarge { .. } => "RESPONSE_TOO_LARGE",
            CoreError::Timeout => "TIMEOUT",
            CoreError::Storage(_) => "INTERNAL",
            CoreError::Internal(_) => "INTERNAL",
        }
    }

    /// Wire status for the HTTP surface.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 400,
            CoreError::Unauthenticated => 401,
            CoreError::Unauthorized(_) => 403,
            CoreError::NotFound(_) => 404,
            CoreError::VersionConflict { .. } => 409,
            CoreError::LeaseConflict { .. } => 409,
            CoreError::LeaseNotHeld(_) => 409,
            CoreError::GrantDenied(_) => 403,
            CoreError::ResponseTooLarge { .. } => 502,
            CoreError::Timeout => 504,
            CoreError::Storage(_) => 500,
            CoreError::Internal(_) => 500,
        }
    }
}
