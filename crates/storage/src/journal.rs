//! Append-only JSON-lines event log.
//!
//! Each [`RunEvent`] is one line. A write is flushed and synced before it
//! returns, so a completed operator is never forgotten by a crash. A torn
//! final line left by a crash mid-write is terminated on open and ignored on
//! read with a warning.
//!
//! Completion lookups are answered from an index built once at open and
//! kept current by [`EventLog::write_event`], so smart-skip checks do not
//! re-read the file. Writes by other processes after open are not seen.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pipeline::{EventLog, EventLogError, OpId, PortMap, RunEvent, RunId, StepKey};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::query::CompletionIndex;

/// [`EventLog`] backed by a `.jsonl` file.
#[derive(Debug)]
pub struct JsonlEventLog {
    path: PathBuf,
    journal: Mutex<Journal>,
}

#[derive(Debug)]
struct Journal {
    file: File,
    index: CompletionIndex,
}

impl JsonlEventLog {
    /// Opens (creating if needed) the journal at `path`.
    ///
    /// # Errors
    ///
    /// [`EventLogError::Io`] if the directory or file cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EventLogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        // Terminate a torn final line so the next event starts on its own line.
        let existing = fs::read(&path).await?;
        if existing.last().is_some_and(|byte| *byte != b'\n') {
            warn!(path = %path.display(), "Event journal ends with a partial line");
            file.write_all(b"\n").await?;
            file.sync_data().await?;
        }

        let mut index = CompletionIndex::default();
        let events = parse_lines(&path, &String::from_utf8_lossy(&existing));
        events.iter().for_each(|event| index.record(event));
        debug!(path = %path.display(), events = events.len(), "Opened event journal");
        Ok(Self {
            path,
            journal: Mutex::new(Journal { file, index }),
        })
    }

    /// Location of the journal.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every parseable event. Holds the write lock so no half-written
    /// line from this process is observed.
    async fn load(&self) -> Result<Vec<RunEvent>, EventLogError> {
        let _guard = self.journal.lock().await;
        let contents = fs::read_to_string(&self.path).await?;
        Ok(parse_lines(&self.path, &contents))
    }
}

fn parse_lines(path: &Path, contents: &str) -> Vec<RunEvent> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str::<RunEvent>(line) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %err,
                    "Skipping unreadable event journal line"
                );
                None
            }
        })
        .collect()
}

#[async_trait]
impl EventLog for JsonlEventLog {
    async fn write_event(&self, event: RunEvent) -> Result<(), EventLogError> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut journal = self.journal.lock().await;
        journal.file.write_all(&line).await?;
        journal.file.flush().await?;
        journal.file.sync_data().await?;
        journal.index.record(&event);
        Ok(())
    }

    async fn has_completed_event(
        &self,
        run_id: RunId,
        step_key: &StepKey,
    ) -> Result<bool, EventLogError> {
        let journal = self.journal.lock().await;
        Ok(journal.index.step_completed(run_id, step_key))
    }

    async fn has_completed_event_for_op(
        &self,
        run_id: RunId,
        op_id: &OpId,
    ) -> Result<bool, EventLogError> {
        let journal = self.journal.lock().await;
        Ok(journal.index.op_completed(run_id, op_id))
    }

    async fn completed_outputs(
        &self,
        run_id: RunId,
        op_id: &OpId,
    ) -> Result<Option<PortMap>, EventLogError> {
        let journal = self.journal.lock().await;
        Ok(journal.index.latest_outputs(run_id, op_id))
    }

    async fn events_for_run(&self, run_id: RunId) -> Result<Vec<RunEvent>, EventLogError> {
        let mut events = self.load().await?;
        events.retain(|event| event.run_id == run_id);
        Ok(events)
    }
}
