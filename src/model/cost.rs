//! Cost ledger entries and per-intent summaries.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostType {
    Compute,
    Api,
    Tokens,
    Storage,
    Other,
}

impl CostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostType::Compute => "compute",
            CostType::Api => "api",
            CostType::Tokens => "tokens",
            CostType::Storage => "storage",
            CostType::Other => "other",
        }
    }
}

impl fmt::Display for CostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CostType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compute" => Ok(CostType::Compute),
            "api" => Ok(CostType::Api),
            "tokens" => Ok(CostType::Tokens),
            "storage" => Ok(CostType::Storage),
            "other" => Ok(CostType::Other),
            other => Err(format!("unknown cost type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    pub id: Uuid,
    pub intent_id: Uuid,
    pub agent_id: String,
    pub cost_type: CostType,
    pub amount: f64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Rolled-up totals over an intent's ledger.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CostSummary {
    pub entry_count: u64,
    /// Totals keyed by currency code.
    pub total_by_currency: BTreeMap<String, f64>,
    /// Totals keyed by cost type wire name (all currencies mixed; the
    /// per-currency map is the authoritative total).
    pub by_type: BTreeMap<String, f64>,
}

impl CostSummary {
    pub fn from_entries(entries: &[CostEntry]) -> Self {
        let mut summary = CostSummary::default();
        for entry in entries {
            summary.entry_count += 1;
            *summary
                .total_by_currency
                .entry(entry.currency.clone())
                .or_insert(0.0) += entry.amount;
            *summary
                .by_type
                .entry(entry.cost_type.as_str().to_string())
                .or_insert(0.0) += entry.amount;
        }
        summary
    }

    /// Total in the given currency, for governance threshold checks.
    pub fn total_in(&self, currency: &str) -> f64 {
        self.total_by_currency.get(currency).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cost_type: CostType, amount: f64, currency: &str) -> CostEntry {
        CostEntry {
            id: Uuid::new_v4(),
            intent_id: Uuid::new_v4(),
            agent_id: "agent-a".to_string(),
            cost_type,
            amount,
            currency: currency.to_string(),
            description: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_totals() {
        let entries = vec![
            entry(CostType::Tokens, 0.5, "USD"),
            entry(CostType::Tokens, 1.5, "USD"),
            entry(CostType::Api, 3.0, "EUR"),
        ];
        let summary = CostSummary::from_entries(&entries);
        assert_eq!(summary.entry_count, 3);
        assert_eq!(summary.total_in("USD"), 2.0);
        assert_eq!(summary.total_in("EUR"), 3.0);
        assert_eq!(summary.total_in("GBP"), 0.0);
        assert_eq!(summary.by_type.get("tokens"), Some(&2.0));
    }
}
