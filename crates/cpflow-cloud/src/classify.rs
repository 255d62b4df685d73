//! Terminal-state classification
//!
//! Maps one [`StatusSnapshot`] to an [`OperationState`]. Pure and
//! deterministic: the same snapshot and desired spec always give the same
//! verdict. Rules, in order:
//!
//! 1. overall `Failed` → `Failed`
//! 2. overall `Cancelled` / `Skipped` → passed through
//! 3. overall `Complete` and every declared sub-entity present and not failing → `Complete`
//! 4. overall `Complete` with a declared sub-entity failing or missing → `Failed`
//! 5. anything else → `InProgress`
//!
//! `TimedOut` and `Fatal` are never produced here; only the poll loop and the
//! orchestrator assign them.

use crate::desired::DesiredSpec;
use crate::status::{Condition, StatusSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of an orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Not terminal; polling continues
    InProgress,
    Complete,
    Failed,
    Skipped,
    Cancelled,
    /// Deadline or cancellation fired before a terminal snapshot was seen
    TimedOut,
    /// Submission failed or the status endpoint kept failing
    Fatal,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::InProgress)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationState::Complete)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::InProgress => write!(f, "in progress"),
            OperationState::Complete => write!(f, "complete"),
            OperationState::Failed => write!(f, "failed"),
            OperationState::Skipped => write!(f, "skipped"),
            OperationState::Cancelled => write!(f, "cancelled"),
            OperationState::TimedOut => write!(f, "timed out"),
            OperationState::Fatal => write!(f, "fatal"),
        }
    }
}

/// Classify a snapshot against the caller's declared sub-entities.
pub fn classify(snapshot: &StatusSnapshot, desired: &DesiredSpec) -> OperationState {
    match snapshot.condition {
        Condition::Failed => OperationState::Failed,
        Condition::Cancelled => OperationState::Cancelled,
        Condition::Skipped => OperationState::Skipped,
        Condition::Complete => {
            if declared_entities_healthy(snapshot, desired) {
                OperationState::Complete
            } else {
                // Overall success never masks a failing or missing sub-entity.
                OperationState::Failed
            }
        }
        Condition::Submitted | Condition::InProgress | Condition::Pending => {
            OperationState::InProgress
        }
    }
}

/// Whether the snapshot reports overall success while a declared sub-entity
/// is failing or missing.
pub fn is_partial_failure(snapshot: &StatusSnapshot, desired: &DesiredSpec) -> bool {
    snapshot.condition == Condition::Complete && !declared_entities_healthy(snapshot, desired)
}

fn declared_entities_healthy(snapshot: &StatusSnapshot, desired: &DesiredSpec) -> bool {
    desired.sub_entities().iter().all(|key| {
        let nodes = snapshot.find_all(key);
        !nodes.is_empty() && nodes.iter().all(|n| !n.condition.is_failure())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{SubEntityStatus, TaskStatus};

    fn desired() -> DesiredSpec {
        DesiredSpec::new()
            .with_sub_entity("rbac-1", "roleAssignment")
            .with_sub_entity("sa-1", "serviceAccount")
    }

    fn complete_with(rbac: Condition) -> StatusSnapshot {
        StatusSnapshot::new(Condition::Complete)
            .with_sub_entity(SubEntityStatus::new("rbac-1", "roleAssignment", rbac))
            .with_sub_entity(SubEntityStatus::new("sa-1", "serviceAccount", Condition::Complete))
    }

    #[test]
    fn test_overall_failed_wins() {
        let snapshot = complete_with(Condition::Complete);
        let failed = StatusSnapshot {
            condition: Condition::Failed,
            ..snapshot
        };
        assert_eq!(classify(&failed, &desired()), OperationState::Failed);
    }

    #[test]
    fn test_cancelled_and_skipped_pass_through() {
        let d = desired();
        assert_eq!(
            classify(&StatusSnapshot::new(Condition::Cancelled), &d),
            OperationState::Cancelled
        );
        assert_eq!(
            classify(&StatusSnapshot::new(Condition::Skipped), &d),
            OperationState::Skipped
        );
    }

    #[test]
    fn test_complete_requires_healthy_declared_entities() {
        assert_eq!(
            classify(&complete_with(Condition::Complete), &desired()),
            OperationState::Complete
        );
        // still converging counts as non-failing
        assert_eq!(
            classify(&complete_with(Condition::InProgress), &desired()),
            OperationState::Complete
        );
    }

    #[test]
    fn test_complete_with_failing_entity_is_failed() {
        let snapshot = complete_with(Condition::Failed);
        assert_eq!(classify(&snapshot, &desired()), OperationState::Failed);
        assert!(is_partial_failure(&snapshot, &desired()));
    }

    #[test]
    fn test_complete_with_missing_entity_is_failed() {
        let snapshot = StatusSnapshot::new(Condition::Complete).with_sub_entity(
            SubEntityStatus::new("rbac-1", "roleAssignment", Condition::Complete),
        );
        assert_eq!(classify(&snapshot, &desired()), OperationState::Failed);
    }

    #[test]
    fn test_undeclared_failures_are_ignored() {
        let snapshot = complete_with(Condition::Complete).with_sub_entity(
            SubEntityStatus::new("someone-else", "roleAssignment", Condition::Failed),
        );
        assert_eq!(classify(&snapshot, &desired()), OperationState::Complete);
    }

    #[test]
    fn test_entity_found_under_task() {
        let desired = DesiredSpec::new().with_sub_entity("node-a", "node");
        let snapshot = StatusSnapshot::new(Condition::Complete).with_task(
            TaskStatus::new("approve", Condition::Complete)
                .with_child(SubEntityStatus::new("node-a", "node", Condition::Failed)),
        );
        assert_eq!(classify(&snapshot, &desired), OperationState::Failed);
    }

    #[test]
    fn test_non_terminal_conditions_keep_polling() {
        let d = desired();
        for condition in [Condition::Submitted, Condition::InProgress, Condition::Pending] {
            let state = classify(&StatusSnapshot::new(condition), &d);
            assert_eq!(state, OperationState::InProgress);
            assert!(!state.is_terminal());
        }
    }
}
