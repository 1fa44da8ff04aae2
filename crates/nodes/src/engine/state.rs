//! Run bookkeeping: operator and step states, and the run outcome.

use std::collections::{BTreeMap, BTreeSet};

use pipeline::{OpId, PortMap, RunId, StepKey};
use serde::Serialize;

/// Options controlling engine behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Store completed outputs in the event log and reload them for
    /// smart-skipped operators, so a resumed run can feed downstream
    /// operators. When off, skipped operators yield empty outputs.
    pub replay_outputs: bool,
}

/// Why an operator did not execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// An upstream operator failed or was itself skipped due to failure.
    UpstreamFailed {
        /// The failed direct upstream ops.
        upstream: Vec<OpId>,
    },
    /// The enclosing step completed in a previous invocation of the run.
    StepCompleted,
    /// The operator itself completed in a previous invocation of the run.
    AlreadyCompleted,
}

/// Terminal state of one operator in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OperatorState {
    /// Not reached (only observable if the run aborted early).
    Pending,
    /// Executed successfully.
    Completed {
        /// Wall-clock execution time.
        duration_ms: u64,
    },
    /// Executed and failed.
    Failed {
        /// Error message.
        message: String,
        /// Whether re-running may succeed.
        retryable: bool,
        /// Wall-clock time until the failure; 0 when the task panicked.
        duration_ms: u64,
    },
    /// Not executed.
    Skipped(SkipReason),
}

impl OperatorState {
    /// Whether the operator counts as done for its step: it ran successfully
    /// or its work was already recorded.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            OperatorState::Completed { .. }
                | OperatorState::Skipped(SkipReason::StepCompleted | SkipReason::AlreadyCompleted)
        )
    }

    /// Whether the operator is in the failed set.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            OperatorState::Failed { .. } | OperatorState::Skipped(SkipReason::UpstreamFailed { .. })
        )
    }
}

/// Lifecycle status of a step, for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// No op of the step was reached.
    NotStarted,
    /// Started but its last op never completed.
    Running,
    /// Last op completed and nothing in the step failed.
    Completed,
    /// Completed in a previous invocation; nothing ran.
    Skipped,
    /// An op failed or was skipped due to an upstream failure.
    Failed,
}

/// Overall status derived from the failed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No op failed.
    Completed,
    /// Some ops failed, others finished.
    PartiallyCompleted,
    /// Ops failed and none finished.
    Failed,
}

/// Result of [`crate::PipelineEngine::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Run correlation id.
    pub run_id: RunId,
    /// Outputs of every op. Failed and skipped ops map to an empty map
    /// unless outputs were replayed.
    pub outputs: BTreeMap<OpId, PortMap>,
    /// Ops that failed or were skipped because of an upstream failure.
    pub failed: BTreeSet<OpId>,
    /// Terminal state per op.
    pub operators: BTreeMap<OpId, OperatorState>,
    /// Status per step.
    pub steps: BTreeMap<StepKey, StepStatus>,
}

impl RunOutcome {
    /// Status derived from the failed set.
    pub fn status(&self) -> RunStatus {
        if self.failed.is_empty() {
            RunStatus::Completed
        } else if self.operators.values().any(OperatorState::is_done) {
            RunStatus::PartiallyCompleted
        } else {
            RunStatus::Failed
        }
    }

    /// Outputs of `op_id`, if it has an entry.
    pub fn outputs_of(&self, op_id: &str) -> Option<&PortMap> {
        self.outputs.get(op_id)
    }
}

/// Mutable state of one engine invocation.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    pub outputs: BTreeMap<OpId, PortMap>,
    pub failed: BTreeSet<OpId>,
    pub operators: BTreeMap<OpId, OperatorState>,
    pub step_started: BTreeSet<StepKey>,
    pub step_completed: BTreeSet<StepKey>,
    pub step_failed: BTreeSet<StepKey>,
    /// Steps found completed by a previous invocation.
    pub step_resumed: BTreeSet<StepKey>,
}

impl RunState {
    pub fn new<'a>(op_ids: impl IntoIterator<Item = &'a OpId>) -> Self {
        Self {
            operators: op_ids
                .into_iter()
                .map(|id| (id.clone(), OperatorState::Pending))
                .collect(),
            ..Self::default()
        }
    }

    pub fn step_status(&self, step: &StepKey) -> StepStatus {
        if self.step_failed.contains(step) {
            StepStatus::Failed
        } else if self.step_resumed.contains(step) {
            StepStatus::Skipped
        } else if self.step_completed.contains(step) {
            StepStatus::Completed
        } else if self.step_started.contains(step) {
            StepStatus::Running
        } else {
            StepStatus::NotStarted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(states: &[(&'static str, OperatorState)]) -> RunOutcome {
        let operators: BTreeMap<OpId, OperatorState> = states
            .iter()
            .map(|(id, state)| (OpId::from_static(id), state.clone()))
            .collect();
        RunOutcome {
            run_id: RunId::new_random(),
            outputs: BTreeMap::new(),
            failed: operators
                .iter()
                .filter(|(_, state)| state.is_failed())
                .map(|(id, _)| id.clone())
                .collect(),
            operators,
            steps: BTreeMap::new(),
        }
    }

    #[test]
    fn status_follows_the_failed_set() {
        let done = OperatorState::Completed { duration_ms: 5 };
        let failed = OperatorState::Failed {
            message: "boom".into(),
            retryable: false,
            duration_ms: 3,
        };
        let upstream = OperatorState::Skipped(SkipReason::UpstreamFailed {
            upstream: vec![OpId::from_static("a")],
        });

        assert_eq!(outcome(&[("a", done.clone())]).status(), RunStatus::Completed);
        assert_eq!(
            outcome(&[("a", done), ("b", failed.clone())]).status(),
            RunStatus::PartiallyCompleted
        );
        assert_eq!(outcome(&[("a", failed), ("b", upstream)]).status(), RunStatus::Failed);
    }

    #[test]
    fn resumed_steps_count_as_done() {
        let resumed = outcome(&[
            ("a", OperatorState::Skipped(SkipReason::StepCompleted)),
            (
                "b",
                OperatorState::Failed {
                    message: "x".into(),
                    retryable: true,
                    duration_ms: 0,
                },
            ),
        ]);
        assert_eq!(resumed.status(), RunStatus::PartiallyCompleted);
    }

    #[test]
    fn failure_outranks_completion_in_step_status() {
        let mut state = RunState::default();
        let step = StepKey::from_static("figures");
        assert_eq!(state.step_status(&step), StepStatus::NotStarted);
        state.step_started.insert(step.clone());
        assert_eq!(state.step_status(&step), StepStatus::Running);
        state.step_completed.insert(step.clone());
        assert_eq!(state.step_status(&step), StepStatus::Completed);
        state.step_failed.insert(step.clone());
        assert_eq!(state.step_status(&step), StepStatus::Failed);
    }
}
