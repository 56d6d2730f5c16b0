//! Retry policies, backoff formulas, and failure records.
//!
//! The engine never re-dispatches work itself: it records each attempt,
//! emits the intent to retry (with the computed delay), and escalates to
//! terminal failure when the budget is exhausted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed,
    Linear,
    Exponential,
}

impl RetryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStrategy::Fixed => "fixed",
            RetryStrategy::Linear => "linear",
            RetryStrategy::Exponential => "exponential",
        }
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(RetryStrategy::Fixed),
            "linear" => Ok(RetryStrategy::Linear),
            "exponential" => Ok(RetryStrategy::Exponential),
            other => Err(format!("unknown retry strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Number of recorded failures after which the intent is declared
    /// terminally failed.
    pub failure_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            failure_threshold: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt_number` (1-based).
    ///
    /// - fixed: `base`
    /// - linear: `min(base · n, max)`
    /// - exponential: `min(base · 2^(n−1), max)`
    pub fn delay_for_attempt(&self, attempt_number: u32) -> u64 {
        let n = attempt_number.max(1);
        match self.strategy {
            RetryStrategy::Fixed => self.base_delay_ms.min(self.max_delay_ms),
            RetryStrategy::Linear => self
                .base_delay_ms
                .saturating_mul(n as u64)
                .min(self.max_delay_ms),
            RetryStrategy::Exponential => {
                let factor = 1u64.checked_shl(n - 1).unwrap_or(u64::MAX);
                self.base_delay_ms
                    .saturating_mul(factor)
                    .min(self.max_delay_ms)
            }
        }
    }

    /// Whether recording failure number `attempt_number` exhausts the budget.
    pub fn exhausted(&self, attempt_number: u32) -> bool {
        attempt_number >= self.failure_threshold
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: Uuid,
    pub intent_id: Uuid,
    /// 1-based position of this failure in the intent's attempt history.
    pub attempt_number: u32,
    pub error_type: String,
    pub error_message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    fn policy(strategy: RetryStrategy, base: u64, max: u64) -> RetryPolicy {
        RetryPolicy {
            strategy,
            max_retries: 10,
            base_delay_ms: base,
            max_delay_ms: max,
            failure_threshold: 10,
        }
    }

    #[test]
    fn test_fixed_delay() {
        let p = policy(RetryStrategy::Fixed, 500, 10_000);
        assert_eq!(p.delay_for_attempt(1), 500);
        assert_eq!(p.delay_for_attempt(7), 500);
    }

    #[test]
    fn test_linear_delay() {
        let p = policy(RetryStrategy::Linear, 1_000, 3_500);
        assert_eq!(p.delay_for_attempt(1), 1_000);
        assert_eq!(p.delay_for_attempt(2), 2_000);
        assert_eq!(p.delay_for_attempt(3), 3_000);
        assert_eq!(p.delay_for_attempt(4), 3_500);
    }

    #[test]
    fn test_exponential_delay() {
        let p = policy(RetryStrategy::Exponential, 1_000, 10_000);
        assert_eq!(p.delay_for_attempt(1), 1_000);
        assert_eq!(p.delay_for_attempt(2), 2_000);
        assert_eq!(p.delay_for_attempt(3), 4_000);
        assert_eq!(p.delay_for_attempt(4), 8_000);
        assert_eq!(p.delay_for_attempt(5), 10_000);
        assert_eq!(p.delay_for_attempt(60), 10_000);
    }

    #[test]
    fn test_threshold() {
        let p = RetryPolicy {
            failure_threshold: 3,
            ..RetryPolicy::default()
        };
        assert!(!p.exhausted(1));
        assert!(!p.exhausted(2));
        assert!(p.exhausted(3));
        assert!(p.exhausted(4));
    }

    quickcheck! {
        fn prop_delay_never_exceeds_max(base: u32, max: u32, attempt: u8) -> bool {
            let max = max as u64;
            let attempt = (attempt as u32).max(1);
            [RetryStrategy::Fixed, RetryStrategy::Linear, RetryStrategy::Exponential]
                .into_iter()
                .all(|strategy| {
                    policy(strategy, base as u64, max).delay_for_attempt(attempt) <= max
                })
        }

        fn prop_linear_monotonic(base: u16, attempt: u8) -> bool {
            let p = policy(RetryStrategy::Linear, base as u64, u64::MAX);
            let n = (attempt as u32).max(1);
            p.delay_for_attempt(n + 1) >= p.delay_for_attempt(n)
        }
    }
}
