use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role attached to an authenticated agent, used for coarse access control.
///
/// - `Orchestrator`: may create intents and compose portfolios.
/// - `Worker`: works on intents (state patches, leases, failures, costs).
/// - `Observer`: read-only; every mutating call is rejected.
/// - `Governor`: may record decisions, arbitrate, and administer
///   credentials and tool grants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    Worker,
    Observer,
    Governor,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::Worker => "worker",
            AgentRole::Observer => "observer",
            AgentRole::Governor => "governor",
        }
    }

    /// Whether this role may perform mutating calls at all.
    pub fn can_write(&self) -> bool {
        !matches!(self, AgentRole::Observer)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orchestrator" => Ok(AgentRole::Orchestrator),
            "worker" => Ok(AgentRole::Worker),
            "observer" => Ok(AgentRole::Observer),
            "governor" => Ok(AgentRole::Governor),
            other => Err(format!("unknown agent role: {other}")),
        }
    }
}

/// Resolved identity of an authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub role: AgentRole,
}

impl AgentIdentity {
    pub fn new(agent_id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [
            AgentRole::Orchestrator,
            AgentRole::Worker,
            AgentRole::Observer,
            AgentRole::Governor,
        ] {
            assert_eq!(role.as_str().parse::<AgentRole>().unwrap(), role);
        }
        assert!("admin".parse::<AgentRole>().is_err());
    }

    #[test]
    fn test_observer_is_read_only() {
        assert!(!AgentRole::Observer.can_write());
        assert!(AgentRole::Worker.can_write());
    }
}
