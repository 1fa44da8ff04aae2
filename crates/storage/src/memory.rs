//! In-process event log.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use pipeline::{EventLog, EventLogError, OpId, PortMap, RunEvent, RunId, StepKey};

use crate::query;

/// [`EventLog`] kept in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<RunEvent>>,
}

impl InMemoryEventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event written so far.
    ///
    /// # Errors
    ///
    /// [`EventLogError::Backend`] if the lock is poisoned.
    pub fn events(&self) -> Result<Vec<RunEvent>, EventLogError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<RunEvent>>, EventLogError> {
        self.events
            .lock()
            .map_err(|_| EventLogError::Backend("event log lock poisoned".to_string()))
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn write_event(&self, event: RunEvent) -> Result<(), EventLogError> {
        self.lock()?.push(event);
        Ok(())
    }

    async fn has_completed_event(
        &self,
        run_id: RunId,
        step_key: &StepKey,
    ) -> Result<bool, EventLogError> {
        Ok(query::step_completed(self.lock()?.iter(), run_id, step_key))
    }

    async fn has_completed_event_for_op(
        &self,
        run_id: RunId,
        op_id: &OpId,
    ) -> Result<bool, EventLogError> {
        Ok(query::op_completed(self.lock()?.iter(), run_id, op_id))
    }

    async fn completed_outputs(
        &self,
        run_id: RunId,
        op_id: &OpId,
    ) -> Result<Option<PortMap>, EventLogError> {
        Ok(query::latest_outputs(self.lock()?.iter(), run_id, op_id))
    }

    async fn events_for_run(&self, run_id: RunId) -> Result<Vec<RunEvent>, EventLogError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|event| event.run_id == run_id)
            .cloned()
            .collect())
    }
}
