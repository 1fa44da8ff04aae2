//! Smart-skip queries shared by the event log implementations.

use std::collections::{HashMap, HashSet};

use pipeline::{EventStatus, EventType, OpId, PortMap, RunEvent, RunId, StepKey};

pub(crate) fn step_completed<'a>(
    events: impl IntoIterator<Item = &'a RunEvent>,
    run_id: RunId,
    step_key: &StepKey,
) -> bool {
    events
        .into_iter()
        .any(|event| event.run_id == run_id && event.completes_step(step_key))
}

pub(crate) fn op_completed<'a>(
    events: impl IntoIterator<Item = &'a RunEvent>,
    run_id: RunId,
    op_id: &OpId,
) -> bool {
    events
        .into_iter()
        .any(|event| event.run_id == run_id && event.completes_op(op_id))
}

/// Outputs of the latest `operator_completed` event that stored any.
pub(crate) fn latest_outputs<'a, I>(events: I, run_id: RunId, op_id: &OpId) -> Option<PortMap>
where
    I: IntoIterator<Item = &'a RunEvent>,
    I::IntoIter: DoubleEndedIterator,
{
    events
        .into_iter()
        .rev()
        .filter(|event| {
            event.run_id == run_id
                && event.event_type == EventType::OperatorCompleted
                && event.completes_op(op_id)
        })
        .find_map(|event| event.outputs.clone())
}

/// What the smart-skip queries need from one run.
#[derive(Debug, Default)]
struct RunCompletions {
    steps: HashSet<StepKey>,
    ops: HashSet<OpId>,
    outputs: HashMap<OpId, PortMap>,
}

/// Completion facts per run, folded from events in log order so lookups do
/// not rescan the log.
#[derive(Debug, Default)]
pub(crate) struct CompletionIndex {
    runs: HashMap<RunId, RunCompletions>,
}

impl CompletionIndex {
    pub(crate) fn record(&mut self, event: &RunEvent) {
        if event.status != EventStatus::Completed {
            return;
        }
        let run = self.runs.entry(event.run_id).or_default();
        if event.event_type == EventType::StepCompleted {
            if let Some(step_key) = &event.step_key {
                run.steps.insert(step_key.clone());
            }
        }
        if let Some(op_id) = &event.op_id {
            run.ops.insert(op_id.clone());
            if event.event_type == EventType::OperatorCompleted {
                if let Some(outputs) = &event.outputs {
                    run.outputs.insert(op_id.clone(), outputs.clone());
                }
            }
        }
    }

    pub(crate) fn step_completed(&self, run_id: RunId, step_key: &StepKey) -> bool {
        self.runs
            .get(&run_id)
            .is_some_and(|run| run.steps.contains(step_key))
    }

    pub(crate) fn op_completed(&self, run_id: RunId, op_id: &OpId) -> bool {
        self.runs
            .get(&run_id)
            .is_some_and(|run| run.ops.contains(op_id))
    }

    pub(crate) fn latest_outputs(&self, run_id: RunId, op_id: &OpId) -> Option<PortMap> {
        self.runs
            .get(&run_id)
            .and_then(|run| run.outputs.get(op_id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{PortKey, PortValue};

    fn completed(run: RunId, op: &str, text: Option<&str>) -> RunEvent {
        let mut event = RunEvent::new(run, EventType::OperatorCompleted, EventStatus::Completed)
            .for_op(OpId::new(op).unwrap());
        if let Some(text) = text {
            event = event.with_outputs(PortMap::from([(
                PortKey::from_static("text"),
                PortValue::from(text),
            )]));
        }
        event
    }

    #[test]
    fn index_answers_like_a_scan_of_the_events() {
        let run = RunId::new_random();
        let other = RunId::new_random();
        let fetch = OpId::from_static("fetch");
        let step = StepKey::from_static("fetch");
        let events = vec![
            RunEvent::new(run, EventType::OperatorFailed, EventStatus::Failed).for_op(fetch.clone()),
            completed(run, "fetch", Some("first")),
            completed(run, "fetch", Some("second")),
            completed(run, "fetch", None),
            RunEvent::new(run, EventType::StepCompleted, EventStatus::Completed)
                .for_step(step.clone()),
            completed(other, "summary", None),
        ];

        let mut index = CompletionIndex::default();
        events.iter().for_each(|event| index.record(event));

        for (run_id, op) in [(run, "fetch"), (run, "summary"), (other, "summary"), (other, "fetch")] {
            let op = OpId::new(op).unwrap();
            assert_eq!(
                index.op_completed(run_id, &op),
                op_completed(&events, run_id, &op),
                "{op}"
            );
            assert_eq!(
                index.latest_outputs(run_id, &op),
                latest_outputs(&events, run_id, &op),
                "{op}"
            );
        }
        assert!(index.step_completed(run, &step));
        assert!(!index.step_completed(other, &step));
        assert_eq!(
            index
                .latest_outputs(run, &fetch)
                .and_then(|outputs| outputs.get("text").cloned()),
            Some(PortValue::from("second"))
        );
    }
}
