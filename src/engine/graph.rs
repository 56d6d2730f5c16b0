//! Hierarchy queries: transitive descendants, dependency-ordered
//! readiness, and the rolled-up aggregate.
//!
//! Readiness partitions the PENDING descendants: an intent is ready iff
//! every `depends_on` target is COMPLETED; a pending intent with any
//! non-completed dependency is blocked. A FAILED or CANCELLED dependency
//! renders its dependents permanently blocked, which the aggregate
//! surfaces as `reachable_completion`.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use uuid::Uuid;

use crate::engine::Engine;
use crate::errors::CoreError;
use crate::model::{AggregateStatus, Intent, IntentStatus};

/// A root with all transitive descendants and the rolled-up summary.
#[derive(Debug, Clone, Serialize)]
pub struct IntentGraph {
    pub root: Intent,
    pub descendants: Vec<Intent>,
    pub aggregate_status: AggregateStatus,
}

impl Engine {
    /// All transitive descendants of `root_id`, breadth-first.
    pub async fn descendants(&self, root_id: Uuid) -> Result<Vec<Intent>, CoreError> {
        let mut collected = Vec::new();
        let mut queue = VecDeque::from([root_id]);
        let mut seen: HashSet<Uuid> = HashSet::from([root_id]);
        while let Some(id) = queue.pop_front() {
            for child in self.store().children_of(id).await? {
                if seen.insert(child.id) {
                    queue.push_back(child.id);
                    collected.push(child);
                }
            }
        }
        Ok(collected)
    }

    pub async fn get_graph(&self, root_id: Uuid) -> Result<IntentGraph, CoreError> {
        let root = self.store().get_intent(root_id).await?;
        let descendants = self.descendants(root_id).await?;
        let aggregate_status = self.aggregate_over(&descendants).await?;
        Ok(IntentGraph {
            root,
            descendants,
            aggregate_status,
        })
    }

    /// Pending descendants whose every dependency is completed.
    pub async fn ready_children(&self, root_id: Uuid) -> Result<Vec<Intent>, CoreError> {
        let _ = self.store().get_intent(root_id).await?;
        let descendants = self.descendants(root_id).await?;
        let statuses = self.dependency_statuses(&descendants).await?;
        Ok(descendants
            .into_iter()
            .filter(|intent| {
                intent.status == IntentStatus::Pending && deps_satisfied(intent, &statuses)
            })
            .collect())
    }

    /// Pending descendants with at least one non-completed dependency.
    pub async fn blocked_children(&self, root_id: Uuid) -> Result<Vec<Intent>, CoreError> {
        let _ = self.store().get_intent(root_id).await?;
        let descendants = self.descendants(root_id).await?;
        let statuses = self.dependency_statuses(&descendants).await?;
        Ok(descendants
            .into_iter()
            .filter(|intent| {
                intent.status == IntentStatus::Pending && !deps_satisfied(intent, &statuses)
            })
            .collect())
    }

    /// Aggregate over a set of intents, with unreachability propagated
    /// along dependency edges.
    pub(crate) async fn aggregate_over(
        &self,
        intents: &[Intent],
    ) -> Result<AggregateStatus, CoreError> {
        let statuses: Vec<IntentStatus> = intents.iter().map(|i| i.status).collect();
        let dependency_statuses = self.dependency_statuses(intents).await?;
        let unreachable = unreachable_set(intents, &dependency_statuses);
        Ok(AggregateStatus::compute(&statuses, unreachable.len() as u64))
    }

    /// Statuses for every intent in the set plus every out-of-set
    /// dependency target.
    async fn dependency_statuses(
        &self,
        intents: &[Intent],
    ) -> Result<HashMap<Uuid, IntentStatus>, CoreError> {
        let mut statuses: HashMap<Uuid, IntentStatus> =
            intents.iter().map(|i| (i.id, i.status)).collect();
        for intent in intents {
            for dependency in &intent.depends_on {
                if !statuses.contains_key(dependency) {
                    let status = self
                        .store()
                        .try_get_intent(*dependency)
                        .await?
                        .map(|i| i.status)
                        // A vanished dependency can never complete.
                        .unwrap_or(IntentStatus::Cancelled);
                    statuses.insert(*dependency, status);
                }
            }
        }
        Ok(statuses)
    }
}

fn deps_satisfied(intent: &Intent, statuses: &HashMap<Uuid, IntentStatus>) -> bool {
    intent
        .depends_on
        .iter()
        .all(|dep| statuses.get(dep) == Some(&IntentStatus::Completed))
}

/// Members that can no longer reach COMPLETED: terminal non-success, or
/// transitively dependent on one.
fn unreachable_set(
    intents: &[Intent],
    statuses: &HashMap<Uuid, IntentStatus>,
) -> HashSet<Uuid> {
    let mut unreachable: HashSet<Uuid> = statuses
        .iter()
        .filter(|(_, status)| {
            matches!(status, IntentStatus::Failed | IntentStatus::Cancelled)
        })
        .map(|(id, _)| *id)
        .collect();
    // Propagate along dependency edges until stable.
    loop {
        let mut changed = false;
        for intent in intents {
            if unreachable.contains(&intent.id) {
                continue;
            }
            if intent.status == IntentStatus::Completed {
                continue;
            }
            if intent.depends_on.iter().any(|dep| unreachable.contains(dep)) {
                unreachable.insert(intent.id);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    intents
        .iter()
        .map(|i| i.id)
        .filter(|id| unreachable.contains(id))
        .collect()
}
