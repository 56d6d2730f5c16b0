//! The intent record and its lifecycle state machine.
//!
//! An [`Intent`] is the shared, versioned state record every coordination
//! feature hangs off: the append-only event log, the work leases, the cost
//! ledger, the retry policy, and optional membership in larger compositions
//! (a parent/child hierarchy or a flat portfolio).
//!
//! # Status transitions
//!
//! ```text
//!  PENDING ─────► ACTIVE ─────► COMPLETED
//!     │             │ ▲
//!     │             ▼ │
//!     │          BLOCKED
//!     │             │
//!     ▼             ▼
//!  CANCELLED     FAILED
//! ```
//!
//! - `Pending` → `Active`: an agent accepts the assignment.
//! - `Active` ↔ `Blocked`: explicit block/unblock, e.g. pending arbitration.
//! - `Active`/`Blocked` → `Completed`: terminal success.
//! - Any non-terminal state → `Cancelled`: explicit cancel.
//! - `Active`/`Blocked` → `Failed`: the retry subsystem declares terminal
//!   failure once the budget is exhausted or a failure is unrecoverable.
//!
//! Terminal states reject further state/status/constraint mutations but
//! still accept event appends for audit.
//!
//! # Versioning
//!
//! `version` increases by exactly one on every accepted mutation of state,
//! status, constraints, or retry policy. Mutating calls carry the version
//! the caller last observed; a mismatch is rejected with the current
//! version so the caller can re-read and retry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::retry::RetryPolicy;

/// Lifecycle status of an intent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Created, not yet picked up by an agent.
    Pending,
    /// An agent is working on it.
    Active,
    /// Work is suspended, e.g. while an arbitration request is open.
    Blocked,
    /// Terminal success.
    Completed,
    /// Terminal: explicitly abandoned.
    Cancelled,
    /// Terminal: the retry budget was exhausted or an unrecoverable
    /// failure was recorded.
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Active => "active",
            IntentStatus::Blocked => "blocked",
            IntentStatus::Completed => "completed",
            IntentStatus::Cancelled => "cancelled",
            IntentStatus::Failed => "failed",
        }
    }

    /// Terminal statuses accept event appends for audit but reject every
    /// state/status/constraint mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Completed | IntentStatus::Cancelled | IntentStatus::Failed
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition(&self, next: IntentStatus) -> bool {
        use IntentStatus::*;
        match (self, next) {
            (Pending, Active) | (Pending, Cancelled) => true,
            (Active, Blocked) | (Active, Completed) | (Active, Cancelled) | (Active, Failed) => {
                true
            }
            (Blocked, Active) | (Blocked, Completed) | (Blocked, Cancelled) | (Blocked, Failed) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IntentStatus::Pending),
            "active" => Ok(IntentStatus::Active),
            "blocked" => Ok(IntentStatus::Blocked),
            "completed" => Ok(IntentStatus::Completed),
            "cancelled" => Ok(IntentStatus::Cancelled),
            "failed" => Ok(IntentStatus::Failed),
            other => Err(format!("unknown intent status: {other}")),
        }
    }
}

/// The central coordination record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub creator_agent_id: String,
    pub status: IntentStatus,
    /// Free-form working memory. Always a JSON object at the top level;
    /// patched by top-level shallow merge, replaced only by the explicit
    /// replace operation.
    pub state: Value,
    /// Monotonically increasing; bumped on every accepted mutation.
    pub version: i64,
    /// Human-readable predicates. Informational to the engine.
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Intents that must reach `Completed` before this one is ready.
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Intent {
    /// Build a fresh `Pending` intent from creation parameters.
    pub fn new(params: NewIntent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: params.title,
            description: params.description,
            creator_agent_id: params.creator_agent_id,
            status: IntentStatus::Pending,
            state: params
                .state
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            version: 1,
            constraints: params.constraints,
            parent_id: params.parent_id,
            depends_on: params.depends_on,
            retry_policy: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Intent: {} ({})", self.id, self.status)
    }
}

/// Parameters accepted when creating an intent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewIntent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub creator_agent_id: String,
    #[serde(default)]
    pub state: Option<Value>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    /// Optional client-side idempotency key; a duplicate within the
    /// configured window returns the earlier intent instead of a new one.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Filters accepted by the list operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntentFilter {
    pub status: Option<IntentStatus>,
    pub creator_agent_id: Option<String>,
    pub parent_id: Option<Uuid>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Top-level shallow merge: keys in `patch` replace keys in `state`,
/// unreferenced keys are preserved, nested values are replaced wholesale.
pub fn shallow_merge(state: &Value, patch: &Value) -> Value {
    let mut merged = match state {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let Value::Object(patch_map) = patch {
        for (k, v) in patch_map {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transitions() {
        use IntentStatus::*;
        assert!(Pending.can_transition(Active));
        assert!(Pending.can_transition(Cancelled));
        assert!(!Pending.can_transition(Completed));
        assert!(Active.can_transition(Blocked));
        assert!(Blocked.can_transition(Active));
        assert!(Active.can_transition(Completed));
        assert!(Blocked.can_transition(Failed));
        assert!(!Completed.can_transition(Active));
        assert!(!Cancelled.can_transition(Pending));
        assert!(!Failed.can_transition(Active));
    }

    #[test]
    fn test_terminal() {
        assert!(IntentStatus::Completed.is_terminal());
        assert!(IntentStatus::Cancelled.is_terminal());
        assert!(IntentStatus::Failed.is_terminal());
        assert!(!IntentStatus::Blocked.is_terminal());
    }

    #[test]
    fn test_shallow_merge_replaces_top_level_only() {
        let state = json!({"a": {"x": 1}, "b": 2});
        let patch = json!({"a": {"y": 3}, "c": 4});
        let merged = shallow_merge(&state, &patch);
        // Nested values are replaced wholesale, not deep-merged.
        assert_eq!(merged, json!({"a": {"y": 3}, "b": 2, "c": 4}));
    }

    #[test]
    fn test_shallow_merge_preserves_unreferenced_keys() {
        let state = json!({"keep": true, "drop": 1});
        let merged = shallow_merge(&state, &json!({"drop": 2}));
        assert_eq!(merged, json!({"keep": true, "drop": 2}));
    }

    #[test]
    fn test_status_serde_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&IntentStatus::Pending).unwrap(),
            "\"pending\""
        );
        let s: IntentStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(s, IntentStatus::Failed);
    }
}
