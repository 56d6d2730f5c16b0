//! The append-only event record and the event taxonomy.
//!
//! Every mutating operation appends at least one event to the intent's log
//! inside the same storage transaction, so the log is an authoritative,
//! gap-free history: `sequence` runs 1, 2, 3, … per intent in commit order.
//! Subscribers observe a single intent's events in that order; across
//! intents no global order is promised.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Exhaustive event taxonomy.
///
/// The `Llm*`, `Stream*` and `ToolCall*` kinds are appended by external
/// clients (LLM adapters, MCP bridges) and by the tool broker; the engine
/// assigns them no semantics beyond log append and fan-out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Intent lifecycle.
    Created,
    StatePatched,
    StateReplaced,
    StatusChanged,
    ConstraintsUpdated,
    // Leases.
    LeaseAcquired,
    LeaseRenewed,
    LeaseReleased,
    LeaseExpired,
    // Composition.
    MembershipAdded,
    MembershipRemoved,
    AggregateChanged,
    // Governance.
    Comment,
    ArbitrationRequested,
    DecisionRecorded,
    CostRecorded,
    CostThresholdExceeded,
    TimeoutReached,
    AttachmentCreated,
    // Retry / failure.
    RetryPolicySet,
    FailureRecorded,
    RetryScheduled,
    RetryExhausted,
    // Client-side LLM / stream audit.
    LlmRequestStarted,
    LlmRequestCompleted,
    LlmRequestFailed,
    StreamStarted,
    StreamChunk,
    StreamCompleted,
    StreamCancelled,
    // Tool broker audit.
    ToolCallStarted,
    ToolCallCompleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::StatePatched => "state_patched",
            EventType::StateReplaced => "state_replaced",
            EventType::StatusChanged => "status_changed",
            EventType::ConstraintsUpdated => "constraints_updated",
            EventType::LeaseAcquired => "lease_acquired",
            EventType::LeaseRenewed => "lease_renewed",
            EventType::LeaseReleased => "lease_released",
            EventType::LeaseExpired => "lease_expired",
            EventType::MembershipAdded => "membership_added",
            EventType::MembershipRemoved => "membership_removed",
            EventType::AggregateChanged => "aggregate_changed",
            EventType::Comment => "comment",
            EventType::ArbitrationRequested => "arbitration_requested",
            EventType::DecisionRecorded => "decision_recorded",
            EventType::CostRecorded => "cost_recorded",
            EventType::CostThresholdExceeded => "cost_threshold_exceeded",
            EventType::TimeoutReached => "timeout_reached",
            EventType::AttachmentCreated => "attachment_created",
            EventType::RetryPolicySet => "retry_policy_set",
            EventType::FailureRecorded => "failure_recorded",
            EventType::RetryScheduled => "retry_scheduled",
            EventType::RetryExhausted => "retry_exhausted",
            EventType::LlmRequestStarted => "llm_request_started",
            EventType::LlmRequestCompleted => "llm_request_completed",
            EventType::LlmRequestFailed => "llm_request_failed",
            EventType::StreamStarted => "stream_started",
            EventType::StreamChunk => "stream_chunk",
            EventType::StreamCompleted => "stream_completed",
            EventType::StreamCancelled => "stream_cancelled",
            EventType::ToolCallStarted => "tool_call_started",
            EventType::ToolCallCompleted => "tool_call_completed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown event type: {s}"))
    }
}

/// One committed entry in an intent's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentEvent {
    pub id: Uuid,
    pub intent_id: Uuid,
    /// Per-intent monotonic position, assigned at commit.
    pub sequence: i64,
    pub event_type: EventType,
    pub actor_agent_id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// An event that has been decided on but not yet committed; the storage
/// layer assigns `id`, `sequence`, and the commit timestamp.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub event_type: EventType,
    pub actor_agent_id: String,
    pub payload: Value,
}

impl PendingEvent {
    pub fn new(event_type: EventType, actor: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type,
            actor_agent_id: actor.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&EventType::StatePatched).unwrap(),
            "\"state_patched\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::ToolCallCompleted).unwrap(),
            "\"tool_call_completed\""
        );
        assert_eq!(
            "lease_expired".parse::<EventType>().unwrap(),
            EventType::LeaseExpired
        );
        assert!("no_such_event".parse::<EventType>().is_err());
    }

    #[test]
    fn test_as_str_matches_serde() {
        for ty in [
            EventType::Created,
            EventType::AggregateChanged,
            EventType::RetryExhausted,
            EventType::StreamChunk,
        ] {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
        }
    }
}
