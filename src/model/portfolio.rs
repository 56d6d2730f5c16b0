//! Flat portfolio composition and rolled-up aggregate status.
//!
//! Two composition shapes share the aggregate machinery: a hierarchy (tree
//! via `parent_id`, dependencies via `depends_on`) and a flat portfolio
//! with explicit memberships and an optional governance policy.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::IntentStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortfolioStatus {
    Active,
    Completed,
    Cancelled,
}

impl PortfolioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortfolioStatus::Active => "active",
            PortfolioStatus::Completed => "completed",
            PortfolioStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PortfolioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PortfolioStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PortfolioStatus::Active),
            "completed" => Ok(PortfolioStatus::Completed),
            "cancelled" => Ok(PortfolioStatus::Cancelled),
            other => Err(format!("unknown portfolio status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Primary,
    Member,
    Dependency,
}

impl MembershipRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipRole::Primary => "primary",
            MembershipRole::Member => "member",
            MembershipRole::Dependency => "dependency",
        }
    }
}

impl FromStr for MembershipRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(MembershipRole::Primary),
            "member" => Ok(MembershipRole::Member),
            "dependency" => Ok(MembershipRole::Dependency),
            other => Err(format!("unknown membership role: {other}")),
        }
    }
}

/// Informational to the engine; enforcement hooks surface as events
/// (cost/timeout thresholds) that external orchestrators act on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GovernancePolicy {
    #[serde(default)]
    pub require_all_completed: bool,
    #[serde(default)]
    pub allow_partial_completion: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_hours: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioMember {
    pub intent_id: Uuid,
    pub role: MembershipRole,
    pub priority: i32,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Uuid,
    pub name: String,
    pub status: PortfolioStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance_policy: Option<GovernancePolicy>,
    #[serde(default)]
    pub members: Vec<PortfolioMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_status: Option<AggregateStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rolled-up completion summary over a set of member intents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateStatus {
    pub total: u64,
    /// Histogram keyed by status wire name.
    pub by_status: BTreeMap<String, u64>,
    /// `round(100 · |completed| / total)`; 0 for an empty set.
    pub completion_percentage: f64,
    /// Fraction of members for which a `Completed` terminal state is still
    /// possible: members that are neither failed/cancelled themselves nor
    /// downstream of a failed/cancelled dependency.
    pub reachable_completion: f64,
}

impl AggregateStatus {
    /// Compute the histogram and completion percentage for a set of
    /// statuses. `unreachable` is the count of members that can no longer
    /// complete (terminal non-success, or dependent on one).
    pub fn compute(statuses: &[IntentStatus], unreachable: u64) -> Self {
        let total = statuses.len() as u64;
        let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
        let mut completed = 0u64;
        for status in statuses {
            *by_status.entry(status.as_str().to_string()).or_insert(0) += 1;
            if *status == IntentStatus::Completed {
                completed += 1;
            }
        }
        let completion_percentage = if total == 0 {
            0.0
        } else {
            (completed as f64 * 100.0 / total as f64).round()
        };
        let reachable_completion = if total == 0 {
            1.0
        } else {
            (total.saturating_sub(unreachable)) as f64 / total as f64
        };
        Self {
            total,
            by_status,
            completion_percentage,
            reachable_completion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_histogram() {
        use IntentStatus::*;
        let agg = AggregateStatus::compute(&[Completed, Completed, Pending, Failed], 1);
        assert_eq!(agg.total, 4);
        assert_eq!(agg.by_status.get("completed"), Some(&2));
        assert_eq!(agg.by_status.get("pending"), Some(&1));
        assert_eq!(agg.by_status.get("failed"), Some(&1));
        assert_eq!(agg.completion_percentage, 50.0);
        assert_eq!(agg.reachable_completion, 0.75);
    }

    #[test]
    fn test_aggregate_empty() {
        let agg = AggregateStatus::compute(&[], 0);
        assert_eq!(agg.total, 0);
        assert_eq!(agg.completion_percentage, 0.0);
        assert_eq!(agg.reachable_completion, 1.0);
    }

    #[test]
    fn test_percentage_rounds() {
        use IntentStatus::*;
        let agg = AggregateStatus::compute(&[Completed, Pending, Pending], 0);
        // 33.33… rounds to 33.
        assert_eq!(agg.completion_percentage, 33.0);
    }
}
