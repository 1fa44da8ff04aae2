//! Execution of a single operator inside its own task.

use std::sync::Arc;
use std::time::Instant;

use pipeline::{
    EventLog, EventStatus, EventType, OpId, Operator, OperatorContext, OperatorError, OperatorKey,
    PortMap, RunContext, RunEvent, StepKey,
};
use tracing::{debug, error, info, warn};

/// What happened to one spawned operator.
#[derive(Debug)]
pub(crate) enum TaskOutcome {
    /// `execute` succeeded and the session committed.
    Completed { outputs: PortMap, duration_ms: u64 },
    /// A completed event already exists for this op.
    AlreadyCompleted { outputs: PortMap },
    /// Validation, `execute` or commit failed.
    Failed {
        error: OperatorError,
        duration_ms: u64,
    },
}

/// Everything a spawned operator invocation needs; moved into the task.
pub(crate) struct OpTask {
    pub operator: Box<dyn Operator>,
    pub events: Arc<dyn EventLog>,
    pub run: RunContext,
    pub op_id: OpId,
    pub step_key: StepKey,
    pub inputs: PortMap,
    pub replay_outputs: bool,
}

impl OpTask {
    pub(crate) async fn run(self) -> TaskOutcome {
        let key = self.operator.key().clone();
        let run_id = self.run.run_id;

        if self.already_completed().await {
            info!(op_id = %self.op_id, operator = %key, "Operator already completed, skipping");
            let outputs = if self.replay_outputs {
                self.replayed_outputs().await
            } else {
                PortMap::new()
            };
            return TaskOutcome::AlreadyCompleted { outputs };
        }

        self.record(
            RunEvent::new(run_id, EventType::OperatorStarted, EventStatus::Running)
                .with_message(format!("Starting operator {key}")),
        )
        .await;

        info!(op_id = %self.op_id, operator = %key, "Operator starting");
        let started = Instant::now();
        let result = self.execute().await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(outputs) => {
                self.check_declared_outputs(&key, &outputs);
                info!(op_id = %self.op_id, operator = %key, duration_ms, "Operator completed");

                let output_keys: Vec<&str> = outputs.keys().map(|k| k.as_str()).collect();
                let mut event =
                    RunEvent::new(run_id, EventType::OperatorCompleted, EventStatus::Completed)
                        .with_message(format!("Operator {key} completed"))
                        .with_duration_ms(duration_ms)
                        .with_extra("output_keys", serde_json::json!(output_keys));
                if self.replay_outputs {
                    event = event.with_outputs(outputs.clone());
                }
                self.record(event).await;
                TaskOutcome::Completed {
                    outputs,
                    duration_ms,
                }
            }
            Err(error) => {
                error!(
                    op_id = %self.op_id,
                    operator = %key,
                    duration_ms,
                    error = %error,
                    "Operator failed"
                );
                self.record(
                    RunEvent::new(run_id, EventType::OperatorFailed, EventStatus::Failed)
                        .with_message(error.to_string())
                        .with_duration_ms(duration_ms)
                        .with_extra(
                            "retryable",
                            serde_json::Value::Bool(error.retry_policy().is_retryable()),
                        ),
                )
                .await;
                TaskOutcome::Failed { error, duration_ms }
            }
        }
    }

    /// Validate, open a session, execute and commit.
    async fn execute(&self) -> Result<PortMap, OperatorError> {
        let inputs = self.declared_inputs();
        self.operator.validate_inputs(&inputs)?;

        let session = self.run.store.begin().await?;
        let mut ctx = OperatorContext {
            run: self.run.clone(),
            session,
            op_id: self.op_id.clone(),
            step_key: self.step_key.clone(),
        };
        let outputs = self.operator.execute(inputs, &mut ctx).await?;
        ctx.session.commit().await?;
        Ok(outputs)
    }

    /// Inputs restricted to the operator's declared input ports.
    fn declared_inputs(&self) -> PortMap {
        let descriptor = self.operator.descriptor();
        let mut inputs = self.inputs.clone();
        inputs.retain(|port, _| {
            let declared = descriptor.input_port(port.as_str()).is_some();
            if !declared {
                debug!(op_id = %self.op_id, port = %port, "Dropping undeclared input");
            }
            declared
        });
        inputs
    }

    fn check_declared_outputs(&self, key: &OperatorKey, outputs: &PortMap) {
        for port in &self.operator.descriptor().output_ports {
            if !outputs.contains_key(&port.key) {
                warn!(
                    op_id = %self.op_id,
                    operator = %key,
                    port = %port.key,
                    "Operator did not produce a declared output"
                );
            }
        }
    }

    async fn already_completed(&self) -> bool {
        match self
            .events
            .has_completed_event_for_op(self.run.run_id, &self.op_id)
            .await
        {
            Ok(done) => done,
            Err(err) => {
                warn!(op_id = %self.op_id, error = %err, "Completion lookup failed, executing");
                false
            }
        }
    }

    async fn replayed_outputs(&self) -> PortMap {
        match self
            .events
            .completed_outputs(self.run.run_id, &self.op_id)
            .await
        {
            Ok(outputs) => outputs.unwrap_or_default(),
            Err(err) => {
                warn!(op_id = %self.op_id, error = %err, "Output replay failed");
                PortMap::new()
            }
        }
    }

    async fn record(&self, event: RunEvent) {
        let event = event
            .for_step(self.step_key.clone())
            .for_op(self.op_id.clone());
        if let Err(err) = self.events.write_event(event).await {
            warn!(op_id = %self.op_id, error = %err, "Failed to record operator event");
        }
    }
}
