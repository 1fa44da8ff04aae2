//! Run lifecycle events and the append-only event log port.
//!
//! | Event | Status | Keyed by |
//! |-------|--------|----------|
//! | `step_started` | running | step |
//! | `step_completed` | completed | step |
//! | `step_failed` | failed | step |
//! | `operator_started` | running | step + op |
//! | `operator_completed` | completed | step + op |
//! | `operator_failed` | failed | step + op |
//! | `run_completed` / `run_failed` | completed / failed | run |
//!
//! Smart-skip queries only ever look at `completed` events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{EventLogError, OpId, PortMap, RunId, StepKey, Timestamp};

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// First op of a step launched.
    StepStarted,
    /// Last op of a step succeeded with no failure in the step.
    StepCompleted,
    /// An op of the step failed or was skipped due to an upstream failure.
    StepFailed,
    /// An operator invocation began.
    OperatorStarted,
    /// An operator invocation succeeded.
    OperatorCompleted,
    /// An operator invocation failed.
    OperatorFailed,
    /// The whole run finished without failures.
    RunCompleted,
    /// The run finished with at least one failed op.
    RunFailed,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::StepStarted => "step_started",
            EventType::StepCompleted => "step_completed",
            EventType::StepFailed => "step_failed",
            EventType::OperatorStarted => "operator_started",
            EventType::OperatorCompleted => "operator_completed",
            EventType::OperatorFailed => "operator_failed",
            EventType::RunCompleted => "run_completed",
            EventType::RunFailed => "run_failed",
        };
        f.write_str(name)
    }
}

/// Status carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Work in progress.
    Running,
    /// Work finished successfully.
    Completed,
    /// Work failed.
    Failed,
}

/// One record of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Step the event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_key: Option<StepKey>,
    /// Op the event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<OpId>,
    /// Kind of event.
    pub event_type: EventType,
    /// Status.
    pub status: EventStatus,
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Wall-clock duration of the work, for terminal operator events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Free-form structured details (`input_keys`, `output_keys`, `retryable`).
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// Outputs of a completed operator, when output replay is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<PortMap>,
    /// When the event was created.
    pub recorded_at: Timestamp,
}

impl RunEvent {
    /// Creates a run-level event.
    pub fn new(run_id: RunId, event_type: EventType, status: EventStatus) -> Self {
        Self {
            run_id,
            step_key: None,
            op_id: None,
            event_type,
            status,
            message: None,
            duration_ms: None,
            extra: serde_json::Map::new(),
            outputs: None,
            recorded_at: Timestamp::now(),
        }
    }

    /// Attaches the event to a step.
    #[must_use]
    pub fn for_step(mut self, step_key: StepKey) -> Self {
        self.step_key = Some(step_key);
        self
    }

    /// Attaches the event to an op.
    #[must_use]
    pub fn for_op(mut self, op_id: OpId) -> Self {
        self.op_id = Some(op_id);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Adds an entry to `extra`.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Stores operator outputs for replay.
    #[must_use]
    pub fn with_outputs(mut self, outputs: PortMap) -> Self {
        self.outputs = Some(outputs);
        self
    }

    /// `true` for a completed `step_completed` event of `step_key`.
    pub fn completes_step(&self, step_key: &StepKey) -> bool {
        self.event_type == EventType::StepCompleted
            && self.status == EventStatus::Completed
            && self.step_key.as_ref() == Some(step_key)
    }

    /// `true` for any completed event of `op_id`.
    pub fn completes_op(&self, op_id: &OpId) -> bool {
        self.status == EventStatus::Completed && self.op_id.as_ref() == Some(op_id)
    }
}

/// Append-only store of [`RunEvent`]s.
///
/// Implementations must make each written event durable (or at least visible
/// to subsequent queries) before `write_event` returns, so that a crash after
/// an operator completes never causes it to be re-executed.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends an event.
    async fn write_event(&self, event: RunEvent) -> Result<(), EventLogError>;

    /// Whether `step_key` has a completed `step_completed` event in `run_id`.
    async fn has_completed_event(
        &self,
        run_id: RunId,
        step_key: &StepKey,
    ) -> Result<bool, EventLogError>;

    /// Whether `op_id` has any completed event in `run_id`.
    async fn has_completed_event_for_op(
        &self,
        run_id: RunId,
        op_id: &OpId,
    ) -> Result<bool, EventLogError>;

    /// Outputs recorded by the latest `operator_completed` event of `op_id`.
    ///
    /// Logs that do not store outputs return `None`.
    async fn completed_outputs(
        &self,
        run_id: RunId,
        op_id: &OpId,
    ) -> Result<Option<PortMap>, EventLogError> {
        let _ = (run_id, op_id);
        Ok(None)
    }

    /// All events of `run_id` in write order.
    async fn events_for_run(&self, run_id: RunId) -> Result<Vec<RunEvent>, EventLogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_completion_requires_type_status_and_key() {
        let run = RunId::new_random();
        let step = StepKey::from_static("summarize");
        let done = RunEvent::new(run, EventType::StepCompleted, EventStatus::Completed)
            .for_step(step.clone());
        assert!(done.completes_step(&step));
        assert!(!done.completes_step(&StepKey::from_static("fetch")));

        let started = RunEvent::new(run, EventType::StepStarted, EventStatus::Running)
            .for_step(step.clone());
        assert!(!started.completes_step(&step));
    }

    #[test]
    fn op_completion_ignores_running_and_failed_events() {
        let run = RunId::new_random();
        let op = OpId::from_static("summary");
        let failed = RunEvent::new(run, EventType::OperatorFailed, EventStatus::Failed)
            .for_op(op.clone());
        assert!(!failed.completes_op(&op));
        let done = RunEvent::new(run, EventType::OperatorCompleted, EventStatus::Completed)
            .for_op(op.clone());
        assert!(done.completes_op(&op));
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let event = RunEvent::new(
            RunId::new_random(),
            EventType::RunCompleted,
            EventStatus::Completed,
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "run_completed");
        assert!(value.get("op_id").is_none());
        assert!(value.get("outputs").is_none());
    }
}
