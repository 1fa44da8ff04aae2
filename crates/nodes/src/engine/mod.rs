//! `PipelineEngine`: level-parallel execution of a pipeline DAG.
//!
//! ## Algorithm
//!
//! 1. Flatten the pipeline into an [`OperatorGraph`], compute its levels and
//!    check every operator key against the registry. Any configuration error
//!    aborts the run before an operator executes.
//! 2. For each level, decide per op whether it is skipped (upstream failure,
//!    step completed by a previous invocation) or launched. Launched ops run
//!    concurrently, each in its own tokio task with its own store session.
//! 3. Wait for every task of the level. A failure never cancels siblings; it
//!    marks the op failed and its step failed. Only then does the next level
//!    start.
//! 4. Return every op's outputs together with the failed set.
//!
//! ## Smart-skip
//!
//! The step-level check runs once per step, when the first op of the step is
//! reached, and its answer is cached for the rest of the invocation. The
//! op-level check runs inside each task so a partially completed step resumes
//! at its first incomplete operator.

mod state;
mod task;

use std::sync::Arc;

use pipeline::{
    EventLog, EventStatus, EventType, OpId, OpRef, OperatorError, OperatorGraph, OperatorKey,
    OperatorRegistry, Pipeline, PipelineError, PortMap, RegistryError, RunContext, RunEvent, Step,
    StepKey,
};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

pub use state::{EngineOptions, OperatorState, RunOutcome, RunStatus, SkipReason, StepStatus};

use state::RunState;
use task::{OpTask, TaskOutcome};

/// A spawned operator task awaiting collection.
struct Launched {
    op_id: OpId,
    operator_key: OperatorKey,
    step_key: StepKey,
    handle: JoinHandle<TaskOutcome>,
}

/// Executes pipelines against an operator registry and an event log.
#[derive(Clone)]
pub struct PipelineEngine {
    registry: Arc<OperatorRegistry>,
    events: Arc<dyn EventLog>,
    options: EngineOptions,
}

impl PipelineEngine {
    /// Creates an engine with default options.
    pub fn new(registry: Arc<OperatorRegistry>, events: Arc<dyn EventLog>) -> Self {
        Self {
            registry,
            events,
            options: EngineOptions::default(),
        }
    }

    /// Replaces the engine options.
    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// The registry operators are instantiated from.
    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// Runs `pipeline` with `initial_inputs` bound to the `__input__` source.
    ///
    /// # Errors
    ///
    /// [`PipelineError`] for configuration problems (cycle, duplicate op id,
    /// dangling edge, unknown operator key), always before any operator runs.
    /// Operator failures are reported in the returned [`RunOutcome`].
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        initial_inputs: PortMap,
        ctx: RunContext,
    ) -> Result<RunOutcome, PipelineError> {
        let span = info_span!(
            "pipeline_run",
            run_id = %ctx.run_id,
            pipeline = %pipeline.name,
        );
        self.run_levels(pipeline, initial_inputs, ctx)
            .instrument(span)
            .await
    }

    async fn run_levels(
        &self,
        pipeline: &Pipeline,
        initial_inputs: PortMap,
        ctx: RunContext,
    ) -> Result<RunOutcome, PipelineError> {
        let graph = OperatorGraph::build(pipeline)?;
        let levels = graph.levels()?;
        self.check_operator_keys(&graph)?;

        let mut state = RunState::new(graph.op_ids());

        for (level_index, level) in levels.iter().enumerate() {
            info!(
                level = level_index,
                ops = ?level.iter().map(OpId::as_str).collect::<Vec<_>>(),
                "Executing level"
            );

            let mut launched: Vec<Launched> = Vec::new();
            for op_id in level {
                let (Some(op_ref), Some(step)) = (graph.op_ref(op_id), graph.step_of(op_id)) else {
                    continue;
                };
                if let Some(handle) = self
                    .schedule(&graph, op_ref, step, &initial_inputs, &ctx, &mut state)
                    .await?
                {
                    launched.push(Launched {
                        op_id: op_id.clone(),
                        operator_key: op_ref.operator_key.clone(),
                        step_key: step.key.clone(),
                        handle,
                    });
                }
            }

            for task in launched {
                let outcome = match task.handle.await {
                    Ok(outcome) => outcome,
                    Err(join_error) => {
                        let error = OperatorError::Panicked {
                            operator: task.operator_key,
                            message: join_error.to_string(),
                        };
                        self.record(
                            RunEvent::new(ctx.run_id, EventType::OperatorFailed, EventStatus::Failed)
                                .for_step(task.step_key)
                                .for_op(task.op_id.clone())
                                .with_message(error.to_string())
                                .with_extra(
                                    "retryable",
                                    serde_json::Value::Bool(error.retry_policy().is_retryable()),
                                ),
                        )
                        .await;
                        TaskOutcome::Failed {
                            error,
                            duration_ms: 0,
                        }
                    }
                };
                self.settle(&graph, task.op_id, outcome, &ctx, &mut state).await;
            }
        }

        if !state.failed.is_empty() {
            warn!(
                pipeline = %pipeline.name,
                failed = ?state.failed.iter().map(OpId::as_str).collect::<Vec<_>>(),
                "Pipeline finished with failed operators"
            );
        }

        let steps = pipeline
            .steps
            .iter()
            .map(|step| (step.key.clone(), state.step_status(&step.key)))
            .collect();
        Ok(RunOutcome {
            run_id: ctx.run_id,
            outputs: state.outputs,
            failed: state.failed,
            operators: state.operators,
            steps,
        })
    }

    fn check_operator_keys(&self, graph: &OperatorGraph<'_>) -> Result<(), PipelineError> {
        for op_id in graph.op_ids() {
            if let Some(op_ref) = graph.op_ref(op_id) {
                if !self.registry.contains(op_ref.operator_key.as_str()) {
                    return Err(RegistryError::UnknownOperator {
                        key: op_ref.operator_key.to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Skips `op_ref` or spawns its task.
    async fn schedule(
        &self,
        graph: &OperatorGraph<'_>,
        op_ref: &OpRef,
        step: &Step,
        initial_inputs: &PortMap,
        ctx: &RunContext,
        state: &mut RunState,
    ) -> Result<Option<JoinHandle<TaskOutcome>>, PipelineError> {
        let op_id = &op_ref.id;

        let failed_upstream: Vec<OpId> = graph
            .upstream(op_id)
            .filter(|upstream| state.failed.contains(*upstream))
            .cloned()
            .collect();
        if !failed_upstream.is_empty() {
            warn!(
                op_id = %op_id,
                upstream = ?failed_upstream.iter().map(OpId::as_str).collect::<Vec<_>>(),
                "Operator skipped, upstream operator failed"
            );
            state.failed.insert(op_id.clone());
            state.outputs.insert(op_id.clone(), PortMap::new());
            state.operators.insert(
                op_id.clone(),
                OperatorState::Skipped(SkipReason::UpstreamFailed {
                    upstream: failed_upstream,
                }),
            );
            self.fail_step(ctx, &step.key, "Step failed: upstream operator(s) failed", state)
                .await;
            return Ok(None);
        }

        if !state.step_started.contains(&step.key) && self.step_done_before(ctx, &step.key).await {
            info!(step = %step.key, "Step already completed, skipping its operators");
            state.step_started.insert(step.key.clone());
            state.step_completed.insert(step.key.clone());
            state.step_resumed.insert(step.key.clone());
            for op in &step.operators {
                let outputs = self.skipped_outputs(ctx, &op.id).await;
                state.outputs.insert(op.id.clone(), outputs);
            }
        }

        if state.step_resumed.contains(&step.key) {
            state
                .outputs
                .entry(op_id.clone())
                .or_insert_with(PortMap::new);
            state
                .operators
                .insert(op_id.clone(), OperatorState::Skipped(SkipReason::StepCompleted));
            return Ok(None);
        }

        let inputs = gather_inputs(graph, op_ref, initial_inputs, state);

        if state.step_started.insert(step.key.clone()) {
            let input_keys: Vec<&str> = inputs.keys().map(|k| k.as_str()).collect();
            self.record(
                RunEvent::new(ctx.run_id, EventType::StepStarted, EventStatus::Running)
                    .for_step(step.key.clone())
                    .with_message(format!("Starting step: {}", step.label))
                    .with_extra("input_keys", serde_json::json!(input_keys)),
            )
            .await;
        }

        let operator = self.registry.get_operator(op_ref.operator_key.as_str())?;
        let task = OpTask {
            operator,
            events: Arc::clone(&self.events),
            run: ctx.clone(),
            op_id: op_id.clone(),
            step_key: step.key.clone(),
            inputs,
            replay_outputs: self.options.replay_outputs,
        };
        let span = info_span!(
            "operator",
            op_id = %op_id,
            operator = %op_ref.operator_key,
            step = %step.key,
        );
        Ok(Some(tokio::spawn(task.run().instrument(span))))
    }

    /// Records the result of a launched task.
    async fn settle(
        &self,
        graph: &OperatorGraph<'_>,
        op_id: OpId,
        outcome: TaskOutcome,
        ctx: &RunContext,
        state: &mut RunState,
    ) {
        let Some(step) = graph.step_of(&op_id) else {
            return;
        };

        let (outputs, op_state) = match outcome {
            TaskOutcome::Completed {
                outputs,
                duration_ms,
            } => (outputs, OperatorState::Completed { duration_ms }),
            TaskOutcome::AlreadyCompleted { outputs } => {
                (outputs, OperatorState::Skipped(SkipReason::AlreadyCompleted))
            }
            TaskOutcome::Failed { error, duration_ms } => {
                state.failed.insert(op_id.clone());
                state.outputs.insert(op_id.clone(), PortMap::new());
                state.operators.insert(
                    op_id.clone(),
                    OperatorState::Failed {
                        message: error.to_string(),
                        retryable: error.retry_policy().is_retryable(),
                        duration_ms,
                    },
                );
                let message = format!("Step failed at operator '{op_id}': {error}");
                self.fail_step(ctx, &step.key, &message, state).await;
                return;
            }
        };

        let output_keys: Vec<String> = outputs.keys().map(ToString::to_string).collect();
        state.outputs.insert(op_id.clone(), outputs);
        state.operators.insert(op_id.clone(), op_state);

        if step.last_op() == Some(&op_id) && !state.step_failed.contains(&step.key) {
            state.step_completed.insert(step.key.clone());
            info!(step = %step.key, "Step completed");
            self.record(
                RunEvent::new(ctx.run_id, EventType::StepCompleted, EventStatus::Completed)
                    .for_step(step.key.clone())
                    .with_message(format!("Step completed: {}", step.label))
                    .with_extra("output_keys", serde_json::json!(output_keys)),
            )
            .await;
        }
    }

    /// Marks a step failed once, writing `step_failed`.
    async fn fail_step(
        &self,
        ctx: &RunContext,
        step_key: &StepKey,
        message: &str,
        state: &mut RunState,
    ) {
        if state.step_failed.insert(step_key.clone()) {
            self.record(
                RunEvent::new(ctx.run_id, EventType::StepFailed, EventStatus::Failed)
                    .for_step(step_key.clone())
                    .with_message(message),
            )
            .await;
        }
    }

    async fn step_done_before(&self, ctx: &RunContext, step_key: &StepKey) -> bool {
        match self.events.has_completed_event(ctx.run_id, step_key).await {
            Ok(done) => done,
            Err(err) => {
                warn!(step = %step_key, error = %err, "Step completion lookup failed, executing");
                false
            }
        }
    }

    async fn skipped_outputs(&self, ctx: &RunContext, op_id: &OpId) -> PortMap {
        if !self.options.replay_outputs {
            return PortMap::new();
        }
        match self.events.completed_outputs(ctx.run_id, op_id).await {
            Ok(outputs) => outputs.unwrap_or_default(),
            Err(err) => {
                warn!(op_id = %op_id, error = %err, "Output replay failed");
                PortMap::new()
            }
        }
    }

    async fn record(&self, event: RunEvent) {
        if let Err(err) = self.events.write_event(event).await {
            warn!(error = %err, "Failed to record run event");
        }
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Binds inputs for `op_ref`: config overrides first, then edge data.
///
/// An edge binds nothing when its source produced no value on the port.
fn gather_inputs(
    graph: &OperatorGraph<'_>,
    op_ref: &OpRef,
    initial_inputs: &PortMap,
    state: &RunState,
) -> PortMap {
    let mut inputs = op_ref.override_inputs();
    for edge in graph.incoming_edges(&op_ref.id) {
        let source = if edge.is_from_initial_input() {
            Some(initial_inputs)
        } else {
            state.outputs.get(&edge.source_op)
        };
        if let Some(value) = source.and_then(|outputs| outputs.get(&edge.source_port)) {
            inputs.insert(edge.target_port.clone(), value.clone());
        }
    }
    inputs
}
