//! Scope-exclusive work leases.
//!
//! A lease is a time-bounded exclusive claim on one `(intent, scope)` pair.
//! Scopes are dotted identifiers treated as opaque strings; the manager
//! does not infer hierarchy, so `section.1` and `section.1.paragraph.2`
//! are independent claims.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Requested TTLs are clamped to `[TTL_MIN_SECONDS, TTL_MAX_SECONDS]`.
pub const TTL_MIN_SECONDS: u64 = 1;
pub const TTL_MAX_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Active,
    Released,
    Expired,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Active => "active",
            LeaseStatus::Released => "released",
            LeaseStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LeaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LeaseStatus::Active),
            "released" => Ok(LeaseStatus::Released),
            "expired" => Ok(LeaseStatus::Expired),
            other => Err(format!("unknown lease status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub id: Uuid,
    pub intent_id: Uuid,
    pub scope: String,
    pub holder_agent_id: String,
    pub status: LeaseStatus,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Expiry is best-effort: readers must treat a past-expiry ACTIVE lease
    /// as already released even before the sweeper has marked it.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == LeaseStatus::Active && self.expires_at > now
    }

    /// Status as observed at `now`, independent of sweeper progress.
    pub fn effective_status(&self, now: DateTime<Utc>) -> LeaseStatus {
        if self.status == LeaseStatus::Active && self.expires_at <= now {
            LeaseStatus::Expired
        } else {
            self.status
        }
    }
}

/// Clamp a requested TTL to the allowed bounds.
pub fn clamp_ttl(ttl_seconds: u64) -> u64 {
    ttl_seconds.clamp(TTL_MIN_SECONDS, TTL_MAX_SECONDS)
}
