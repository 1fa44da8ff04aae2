//! Engine behaviour against counting, failing and panicking operators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nodes::{EngineOptions, OperatorState, PipelineEngine, RunStatus, SkipReason, StepStatus};
use pipeline::{
    Edge, EdgeId, EventLog, EventType, OpId, OpRef, Operator, OperatorContext, OperatorDescriptor,
    OperatorError, OperatorKey, OperatorKind, OperatorRegistry, Pipeline, PipelineError, Port,
    PortKey, PortMap, PortType, PortValue, RegistryError, RunContext, RunEvent, RunId, Step,
    StepKey, UserId,
};
use storage::{InMemoryEventLog, InMemoryStudyStore};
use tokio::sync::Barrier;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Behaviour {
    /// Emit `"<key>-out"` on each declared output.
    Succeed,
    Fail,
    /// Fail on the first call only.
    FailOnce(Arc<AtomicBool>),
    Panic,
    /// Sleep, then fail.
    FailAfter(Duration),
    /// Wait at the barrier before succeeding.
    Rendezvous(Arc<Barrier>),
}

#[derive(Clone)]
struct Scripted {
    descriptor: OperatorDescriptor,
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
    seen: Arc<std::sync::Mutex<Vec<PortMap>>>,
}

#[async_trait]
impl Operator for Scripted {
    fn descriptor(&self) -> &OperatorDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        inputs: PortMap,
        _ctx: &mut OperatorContext,
    ) -> Result<PortMap, OperatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(inputs.clone());
        let key = self.descriptor.key.clone();
        match &self.behaviour {
            Behaviour::Fail => {
                return Err(OperatorError::InvalidData {
                    operator: key,
                    message: "boom".into(),
                })
            }
            Behaviour::FailOnce(failed) => {
                if !failed.swap(true, Ordering::SeqCst) {
                    return Err(OperatorError::InvalidData {
                        operator: key,
                        message: "transient".into(),
                    });
                }
            }
            Behaviour::FailAfter(delay) => {
                tokio::time::sleep(*delay).await;
                return Err(OperatorError::InvalidData {
                    operator: key,
                    message: "slow failure".into(),
                });
            }
            Behaviour::Panic => panic!("operator exploded"),
            Behaviour::Rendezvous(barrier) => {
                barrier.wait().await;
            }
            Behaviour::Succeed => {}
        }
        Ok(self
            .descriptor
            .output_ports
            .iter()
            .map(|port| (port.key.clone(), PortValue::Text(format!("{key}-out"))))
            .collect())
    }
}

struct Harness {
    registry: OperatorRegistry,
    calls: std::collections::BTreeMap<&'static str, Arc<AtomicUsize>>,
    seen: std::collections::BTreeMap<&'static str, Arc<std::sync::Mutex<Vec<PortMap>>>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            registry: OperatorRegistry::new(),
            calls: Default::default(),
            seen: Default::default(),
        }
    }

    /// Registers operator `key` with text ports. Inputs ending in `?` are
    /// optional.
    fn operator(
        &mut self,
        key: &'static str,
        inputs: &[&'static str],
        outputs: &[&'static str],
        behaviour: Behaviour,
    ) -> &mut Self {
        let port = |name: &'static str| {
            let (name, optional) = match name.strip_suffix('?') {
                Some(name) => (name, true),
                None => (name, false),
            };
            let port = Port::new(PortKey::new(name).unwrap(), PortType::Text, "");
            if optional {
                port.optional()
            } else {
                port
            }
        };
        let operator = Scripted {
            descriptor: OperatorDescriptor {
                key: OperatorKey::from_static(key),
                name: key.to_string(),
                kind: OperatorKind::Tool,
                description: String::new(),
                input_ports: inputs.iter().copied().map(&port).collect(),
                output_ports: outputs.iter().copied().map(&port).collect(),
            },
            behaviour,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        self.calls.insert(key, Arc::clone(&operator.calls));
        self.seen.insert(key, Arc::clone(&operator.seen));
        self.registry.register(move || operator.clone());
        self
    }

    fn engine(self, events: Arc<InMemoryEventLog>) -> (PipelineEngine, Counters) {
        let counters = Counters {
            calls: self.calls,
            seen: self.seen,
        };
        (
            PipelineEngine::new(Arc::new(self.registry), events),
            counters,
        )
    }
}

struct Counters {
    calls: std::collections::BTreeMap<&'static str, Arc<AtomicUsize>>,
    seen: std::collections::BTreeMap<&'static str, Arc<std::sync::Mutex<Vec<PortMap>>>>,
}

impl Counters {
    fn calls(&self, key: &str) -> usize {
        self.calls[key].load(Ordering::SeqCst)
    }

    fn inputs_seen(&self, key: &str) -> Vec<PortMap> {
        self.seen[key].lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Pipeline builders
// ---------------------------------------------------------------------------

fn op(id: &'static str) -> OpRef {
    OpRef::new(OpId::from_static(id), OperatorKey::from_static(id))
}

fn step(key: &'static str, ops: Vec<OpRef>) -> Step {
    Step::new(StepKey::from_static(key), key, ops)
}

fn edge(id: &'static str, from: (&'static str, &'static str), to: (&'static str, &'static str)) -> Edge {
    Edge::new(
        EdgeId::from_static(id),
        OpId::from_static(from.0),
        PortKey::from_static(from.1),
        OpId::from_static(to.0),
        PortKey::from_static(to.1),
    )
}

fn pipeline(steps: Vec<Step>, edges: Vec<Edge>) -> Pipeline {
    Pipeline {
        id: None,
        name: "test".into(),
        description: String::new(),
        steps,
        edges,
    }
}

/// `fetch → {summary, notes}` with one step per op.
fn fan_out() -> Pipeline {
    pipeline(
        vec![
            step("fetch", vec![op("fetch")]),
            step("summarize", vec![op("summary")]),
            step("notes", vec![op("notes")]),
        ],
        vec![
            edge("e0", ("__input__", "url"), ("fetch", "url")),
            edge("e1", ("fetch", "text"), ("summary", "text")),
            edge("e2", ("fetch", "text"), ("notes", "text")),
        ],
    )
}

fn fan_out_harness(fetch: Behaviour) -> Harness {
    let mut harness = Harness::new();
    harness
        .operator("fetch", &["url"], &["text"], fetch)
        .operator("summary", &["text"], &["summary"], Behaviour::Succeed)
        .operator("notes", &["text"], &["notes"], Behaviour::Succeed);
    harness
}

fn context(run_id: RunId) -> RunContext {
    RunContext::new(
        run_id,
        UserId::from_static("user-1"),
        Arc::new(InMemoryStudyStore::new()),
    )
}

fn url_input() -> PortMap {
    PortMap::from([(PortKey::from_static("url"), PortValue::from("https://example.org/p.pdf"))])
}

fn event_types(events: &[RunEvent], op: &str) -> Vec<EventType> {
    events
        .iter()
        .filter(|event| event.op_id.as_ref().is_some_and(|id| id.as_str() == op))
        .map(|event| event.event_type)
        .collect()
}

fn ids(values: impl IntoIterator<Item = &'static str>) -> std::collections::BTreeSet<OpId> {
    values.into_iter().map(OpId::from_static).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fan_out_runs_every_operator_and_routes_data() {
    let events = Arc::new(InMemoryEventLog::new());
    let (engine, counters) = fan_out_harness(Behaviour::Succeed).engine(Arc::clone(&events));
    let run_id = RunId::new_random();

    let outcome = engine.run(&fan_out(), url_input(), context(run_id)).await.unwrap();

    assert_eq!(outcome.status(), RunStatus::Completed);
    assert!(outcome.failed.is_empty());
    assert_eq!(outcome.outputs.len(), 3);
    assert_eq!(
        outcome.outputs_of("summary").unwrap()["summary"],
        PortValue::Text("summary-out".into())
    );
    for key in ["fetch", "summary", "notes"] {
        assert_eq!(counters.calls(key), 1, "{key}");
    }
    assert_eq!(
        counters.inputs_seen("fetch")[0]["url"],
        PortValue::from("https://example.org/p.pdf")
    );
    assert_eq!(
        counters.inputs_seen("notes")[0]["text"],
        PortValue::Text("fetch-out".into())
    );
    assert!(outcome.steps.values().all(|status| *status == StepStatus::Completed));

    let recorded = events.events_for_run(run_id).await.unwrap();
    assert_eq!(
        event_types(&recorded, "fetch"),
        vec![EventType::OperatorStarted, EventType::OperatorCompleted]
    );
    let step_events: Vec<EventType> = recorded
        .iter()
        .filter(|event| event.op_id.is_none())
        .map(|event| event.event_type)
        .collect();
    assert_eq!(
        step_events.iter().filter(|t| **t == EventType::StepCompleted).count(),
        3
    );
    assert_eq!(step_events[0], EventType::StepStarted);
}

#[tokio::test]
async fn failing_source_skips_all_dependents() {
    let events = Arc::new(InMemoryEventLog::new());
    let (engine, counters) = fan_out_harness(Behaviour::Fail).engine(Arc::clone(&events));
    let run_id = RunId::new_random();

    let outcome = engine.run(&fan_out(), url_input(), context(run_id)).await.unwrap();

    assert_eq!(outcome.failed, ids(["fetch", "summary", "notes"]));
    assert_eq!(outcome.status(), RunStatus::Failed);
    assert!(outcome.outputs_of("summary").unwrap().is_empty());
    assert!(outcome.outputs_of("notes").unwrap().is_empty());
    assert_eq!(counters.calls("summary"), 0);
    assert_eq!(counters.calls("notes"), 0);
    assert!(matches!(
        &outcome.operators[&OpId::from_static("summary")],
        OperatorState::Skipped(SkipReason::UpstreamFailed { upstream }) if upstream == &[OpId::from_static("fetch")]
    ));
    assert!(outcome.steps.values().all(|status| *status == StepStatus::Failed));

    let recorded = events.events_for_run(run_id).await.unwrap();
    let failed = recorded
        .iter()
        .find(|event| event.event_type == EventType::OperatorFailed)
        .unwrap();
    assert_eq!(failed.op_id, Some(OpId::from_static("fetch")));
    assert_eq!(failed.extra["retryable"], serde_json::Value::Bool(true));
    assert!(failed.duration_ms.is_some());
    assert_eq!(
        recorded
            .iter()
            .filter(|event| event.event_type == EventType::StepFailed)
            .count(),
        3
    );
}

#[tokio::test]
async fn failure_propagates_only_to_its_dependents() {
    // fetch → summary → save_summary ; fetch → notes
    let mut harness = Harness::new();
    harness
        .operator("fetch", &["url"], &["text"], Behaviour::Succeed)
        .operator("summary", &["text"], &["summary"], Behaviour::Fail)
        .operator("notes", &["text"], &["notes"], Behaviour::Succeed)
        .operator("save_summary", &["summary"], &["done"], Behaviour::Succeed);

    let mut definition = fan_out();
    definition.steps[1] = step("summarize", vec![op("summary"), op("save_summary")]);
    definition
        .edges
        .push(edge("e3", ("summary", "summary"), ("save_summary", "summary")));

    let events = Arc::new(InMemoryEventLog::new());
    let (engine, counters) = harness.engine(events);
    let outcome = engine
        .run(&definition, url_input(), context(RunId::new_random()))
        .await
        .unwrap();

    assert_eq!(outcome.failed, ids(["summary", "save_summary"]));
    assert_eq!(outcome.status(), RunStatus::PartiallyCompleted);
    assert_eq!(counters.calls("save_summary"), 0);
    assert_eq!(counters.calls("notes"), 1);
    assert_eq!(
        outcome.outputs_of("notes").unwrap()["notes"],
        PortValue::Text("notes-out".into())
    );
    assert_eq!(outcome.steps[&StepKey::from_static("summarize")], StepStatus::Failed);
    assert_eq!(outcome.steps[&StepKey::from_static("notes")], StepStatus::Completed);
}

#[tokio::test]
async fn rerunning_a_completed_run_invokes_nothing() {
    let events = Arc::new(InMemoryEventLog::new());
    let (engine, counters) = fan_out_harness(Behaviour::Succeed).engine(Arc::clone(&events));
    let run_id = RunId::new_random();

    engine.run(&fan_out(), url_input(), context(run_id)).await.unwrap();
    let written = events.events().unwrap().len();
    let second = engine.run(&fan_out(), url_input(), context(run_id)).await.unwrap();

    for key in ["fetch", "summary", "notes"] {
        assert_eq!(counters.calls(key), 1, "{key}");
    }
    assert_eq!(second.status(), RunStatus::Completed);
    assert!(second.outputs.values().all(PortMap::is_empty));
    assert!(second
        .operators
        .values()
        .all(|state| *state == OperatorState::Skipped(SkipReason::StepCompleted)));
    assert!(second.steps.values().all(|status| *status == StepStatus::Skipped));
    assert_eq!(events.events().unwrap().len(), written);
}

#[tokio::test]
async fn a_fresh_run_id_executes_again() {
    let events = Arc::new(InMemoryEventLog::new());
    let (engine, counters) = fan_out_harness(Behaviour::Succeed).engine(events);

    engine.run(&fan_out(), url_input(), context(RunId::new_random())).await.unwrap();
    engine.run(&fan_out(), url_input(), context(RunId::new_random())).await.unwrap();

    assert_eq!(counters.calls("fetch"), 2);
}

#[tokio::test]
async fn rerun_resumes_at_the_first_incomplete_step() {
    let mut harness = Harness::new();
    harness
        .operator("a", &[], &["value"], Behaviour::Succeed)
        .operator(
            "b",
            &["value"],
            &["result"],
            Behaviour::FailOnce(Arc::new(AtomicBool::new(false))),
        );
    let definition = pipeline(
        vec![step("first", vec![op("a")]), step("second", vec![op("b")])],
        vec![edge("e1", ("a", "value"), ("b", "value"))],
    );
    let events = Arc::new(InMemoryEventLog::new());
    let (engine, counters) = harness.engine(events);
    let engine = engine.with_options(EngineOptions {
        replay_outputs: true,
    });
    let run_id = RunId::new_random();

    let first = engine.run(&definition, PortMap::new(), context(run_id)).await.unwrap();
    assert_eq!(first.failed, ids(["b"]));
    assert_eq!(first.status(), RunStatus::PartiallyCompleted);

    let second = engine.run(&definition, PortMap::new(), context(run_id)).await.unwrap();
    assert!(second.failed.is_empty());
    assert_eq!(counters.calls("a"), 1);
    assert_eq!(counters.calls("b"), 2);
    // The replayed output of the skipped step feeds the resumed one.
    assert_eq!(
        counters.inputs_seen("b")[1]["value"],
        PortValue::Text("a-out".into())
    );
    assert_eq!(
        second.outputs_of("a").unwrap()["value"],
        PortValue::Text("a-out".into())
    );
    assert_eq!(second.steps[&StepKey::from_static("first")], StepStatus::Skipped);
    assert_eq!(second.steps[&StepKey::from_static("second")], StepStatus::Completed);
}

#[tokio::test]
async fn partially_completed_step_resumes_at_its_failed_operator() {
    let mut harness = Harness::new();
    harness
        .operator("generate", &[], &["items"], Behaviour::Succeed)
        .operator(
            "save",
            &["items?"],
            &["count"],
            Behaviour::FailOnce(Arc::new(AtomicBool::new(false))),
        );
    let definition = pipeline(
        vec![step("cards", vec![op("generate"), op("save")])],
        vec![edge("e1", ("generate", "items"), ("save", "items"))],
    );
    let events = Arc::new(InMemoryEventLog::new());
    let (engine, counters) = harness.engine(Arc::clone(&events));
    let run_id = RunId::new_random();

    engine.run(&definition, PortMap::new(), context(run_id)).await.unwrap();
    let second = engine.run(&definition, PortMap::new(), context(run_id)).await.unwrap();

    assert_eq!(counters.calls("generate"), 1);
    assert_eq!(counters.calls("save"), 2);
    assert_eq!(
        second.operators[&OpId::from_static("generate")],
        OperatorState::Skipped(SkipReason::AlreadyCompleted)
    );
    assert!(second.failed.is_empty());
    assert_eq!(second.steps[&StepKey::from_static("cards")], StepStatus::Completed);
    assert!(events
        .has_completed_event(run_id, &StepKey::from_static("cards"))
        .await
        .unwrap());
}

#[tokio::test]
async fn cycles_are_rejected_before_anything_runs() {
    let mut harness = Harness::new();
    harness
        .operator("a", &["x?"], &["y"], Behaviour::Succeed)
        .operator("b", &["y?"], &["x"], Behaviour::Succeed);
    let definition = pipeline(
        vec![step("loop", vec![op("a"), op("b")])],
        vec![
            edge("e1", ("a", "y"), ("b", "y")),
            edge("e2", ("b", "x"), ("a", "x")),
        ],
    );
    let events = Arc::new(InMemoryEventLog::new());
    let (engine, counters) = harness.engine(Arc::clone(&events));

    let err = engine
        .run(&definition, PortMap::new(), context(RunId::new_random()))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::CycleDetected { placed: 0, total: 2 }));
    assert_eq!(counters.calls("a") + counters.calls("b"), 0);
    assert!(events.events().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_operator_keys_are_configuration_errors() {
    let mut harness = Harness::new();
    harness.operator("fetch", &["url"], &["text"], Behaviour::Succeed);
    let definition = pipeline(
        vec![
            step("fetch", vec![op("fetch")]),
            step("summarize", vec![op("summary")]),
        ],
        vec![edge("e1", ("fetch", "text"), ("summary", "text"))],
    );
    let (engine, counters) = harness.engine(Arc::new(InMemoryEventLog::new()));

    let err = engine
        .run(&definition, url_input(), context(RunId::new_random()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Registry(RegistryError::UnknownOperator { ref key }) if key == "summary"
    ));
    assert_eq!(counters.calls("fetch"), 0);
}

#[tokio::test]
async fn missing_required_input_fails_only_that_operator() {
    let mut harness = Harness::new();
    harness
        .operator("fetch", &["url"], &["text"], Behaviour::Succeed)
        .operator("summary", &["text", "language"], &["summary"], Behaviour::Succeed)
        .operator("notes", &["text"], &["notes"], Behaviour::Succeed);
    let (engine, counters) = harness.engine(Arc::new(InMemoryEventLog::new()));

    let outcome = engine
        .run(&fan_out(), url_input(), context(RunId::new_random()))
        .await
        .unwrap();

    assert_eq!(outcome.failed, ids(["summary"]));
    assert_eq!(counters.calls("summary"), 0);
    assert_eq!(counters.calls("notes"), 1);
    match &outcome.operators[&OpId::from_static("summary")] {
        OperatorState::Failed {
            message, retryable, ..
        } => {
            assert!(message.contains("missing required input port 'language'"));
            assert!(!retryable);
        }
        other => panic!("unexpected state {other:?}"),
    }
}

#[tokio::test]
async fn failed_operators_report_how_long_they_ran() {
    let mut harness = Harness::new();
    harness
        .operator("fetch", &["url"], &["text"], Behaviour::Succeed)
        .operator(
            "summary",
            &["text"],
            &["summary"],
            Behaviour::FailAfter(Duration::from_millis(30)),
        )
        .operator("notes", &["text"], &["notes"], Behaviour::Succeed);
    let (engine, _) = harness.engine(Arc::new(InMemoryEventLog::new()));

    let outcome = engine
        .run(&fan_out(), url_input(), context(RunId::new_random()))
        .await
        .unwrap();

    match &outcome.operators[&OpId::from_static("summary")] {
        OperatorState::Failed { duration_ms, .. } => assert!(*duration_ms >= 30, "{duration_ms}"),
        other => panic!("unexpected state {other:?}"),
    }
}

#[tokio::test]
async fn a_panicking_operator_is_reported_as_failed() {
    let mut harness = Harness::new();
    harness
        .operator("fetch", &["url"], &["text"], Behaviour::Succeed)
        .operator("summary", &["text"], &["summary"], Behaviour::Panic)
        .operator("notes", &["text"], &["notes"], Behaviour::Succeed);
    let events = Arc::new(InMemoryEventLog::new());
    let (engine, counters) = harness.engine(Arc::clone(&events));
    let run_id = RunId::new_random();

    let outcome = engine.run(&fan_out(), url_input(), context(run_id)).await.unwrap();

    assert_eq!(outcome.failed, ids(["summary"]));
    assert_eq!(counters.calls("notes"), 1);
    match &outcome.operators[&OpId::from_static("summary")] {
        OperatorState::Failed { message, .. } => assert!(message.contains("panicked")),
        other => panic!("unexpected state {other:?}"),
    }
    let recorded = events.events_for_run(run_id).await.unwrap();
    assert_eq!(
        event_types(&recorded, "summary"),
        vec![EventType::OperatorStarted, EventType::OperatorFailed]
    );
}

#[tokio::test]
async fn edge_data_overrides_config_overrides() {
    let mut harness = Harness::new();
    harness
        .operator("source", &[], &["card_type"], Behaviour::Succeed)
        .operator("save", &["card_type", "items"], &["count"], Behaviour::Succeed);
    let save = op("save")
        .with_override("card_type", serde_json::json!("flashcard"))
        .with_override("items", serde_json::json!("three items"));
    let definition = pipeline(
        vec![step("s", vec![op("source"), save])],
        vec![edge("e1", ("source", "card_type"), ("save", "card_type"))],
    );
    let (engine, counters) = harness.engine(Arc::new(InMemoryEventLog::new()));

    engine
        .run(&definition, PortMap::new(), context(RunId::new_random()))
        .await
        .unwrap();

    let seen = &counters.inputs_seen("save")[0];
    assert_eq!(seen["card_type"], PortValue::Text("source-out".into()));
    assert_eq!(seen["items"], PortValue::Text("three items".into()));
}

#[tokio::test]
async fn operators_of_one_level_run_concurrently() {
    let barrier = Arc::new(Barrier::new(2));
    let mut harness = Harness::new();
    harness
        .operator("left", &[], &["out"], Behaviour::Rendezvous(Arc::clone(&barrier)))
        .operator("right", &[], &["out"], Behaviour::Rendezvous(barrier));
    let definition = pipeline(
        vec![step("left", vec![op("left")]), step("right", vec![op("right")])],
        Vec::new(),
    );
    let (engine, _counters) = harness.engine(Arc::new(InMemoryEventLog::new()));

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        engine.run(&definition, PortMap::new(), context(RunId::new_random())),
    )
    .await
    .expect("level operators must not run sequentially")
    .unwrap();
    assert!(outcome.failed.is_empty());
}

#[tokio::test]
async fn undeclared_inputs_are_not_passed_to_operators() {
    let mut harness = Harness::new();
    harness.operator("only_text", &["text"], &[], Behaviour::Succeed);
    let definition = pipeline(
        vec![step("s", vec![op("only_text")])],
        vec![
            edge("e1", ("__input__", "text"), ("only_text", "text")),
            edge("e2", ("__input__", "extra"), ("only_text", "extra")),
        ],
    );
    let (engine, counters) = harness.engine(Arc::new(InMemoryEventLog::new()));
    let inputs = PortMap::from([
        (PortKey::from_static("text"), PortValue::from("t")),
        (PortKey::from_static("extra"), PortValue::from("x")),
    ]);

    engine
        .run(&definition, inputs, context(RunId::new_random()))
        .await
        .unwrap();

    let seen = &counters.inputs_seen("only_text")[0];
    assert_eq!(seen.len(), 1);
    assert!(seen.contains_key("text"));
}
