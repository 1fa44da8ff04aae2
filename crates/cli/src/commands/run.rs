//! `studyflow run`: executes a pipeline on one source and reports the result.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use nodes::{builtin_registry, EngineOptions, OperatorState, PipelineEngine, RunStatus, StepStatus};
use pipeline::{
    CardRecord, EventLog, EventStatus, EventType, MaterialId, OpId, PortKey, PortMap, PortValue,
    RunContext, RunEvent, RunId, StepKey, UserId,
};
use serde::Serialize;
use serde_json::{json, Value};
use storage::{InMemoryStudyStore, JsonlEventLog};
use tracing::info;

use super::{collaborators, PipelineSource};
use crate::config::Config;

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Source to process (http(s) URL, file:// URL or local path)
    #[arg(long)]
    pub url: String,

    /// Resume an earlier run; completed steps are skipped
    #[arg(long)]
    pub run_id: Option<String>,

    /// User the run executes for
    #[arg(long, default_value = "local")]
    pub user: String,

    /// Material id the results are attached to (default: derived from the run id)
    #[arg(long)]
    pub material: Option<String>,

    /// Do not record operator outputs; a resumed run then cannot feed the
    /// dependents of skipped operators
    #[arg(long)]
    pub no_replay: bool,

    #[command(flatten)]
    pub source: PipelineSource,
}

/// JSON report printed after a run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub pipeline: String,
    pub status: RunStatus,
    pub failed: BTreeSet<OpId>,
    pub steps: BTreeMap<StepKey, StepStatus>,
    pub operators: BTreeMap<OpId, OperatorState>,
    pub material: Value,
    pub cards: Vec<CardRecord>,
    pub journal: PathBuf,
}

pub async fn execute(config: &Config, args: &RunArgs) -> Result<RunReport> {
    let pipeline = args.source.load()?;
    let registry = Arc::new(builtin_registry(&collaborators(config)?)?);

    let journal_path = config.storage.journal_path.clone();
    let journal = Arc::new(JsonlEventLog::open(&journal_path).await.with_context(|| {
        format!("Failed to open event journal: {}", journal_path.display())
    })?);

    let run_id = match &args.run_id {
        Some(id) => id
            .parse::<RunId>()
            .with_context(|| format!("Invalid run id '{id}'"))?,
        None => RunId::new_random(),
    };
    let user = UserId::new(args.user.clone()).context("--user must not be empty")?;
    let material = match &args.material {
        Some(id) => MaterialId::new(id.clone()).context("--material must not be empty")?,
        None => MaterialId::new(format!("material-{run_id}")).context("material id")?,
    };

    let store = InMemoryStudyStore::new();
    store.add_material(material.clone(), user.clone(), args.url.clone())?;

    let ctx = RunContext::new(run_id, user, Arc::new(store.clone())).with_material(material.clone());
    let inputs = PortMap::from([(
        PortKey::from_static("url"),
        PortValue::from(args.url.as_str()),
    )]);

    info!(%run_id, pipeline = %pipeline.name, url = %args.url, "Starting run");
    let engine = PipelineEngine::new(registry, journal.clone()).with_options(EngineOptions {
        replay_outputs: !args.no_replay,
    });
    let outcome = engine.run(&pipeline, inputs, ctx).await?;
    let status = outcome.status();

    let failed: Vec<&str> = outcome.failed.iter().map(OpId::as_str).collect();
    let terminal = if outcome.failed.is_empty() {
        RunEvent::new(run_id, EventType::RunCompleted, EventStatus::Completed)
            .with_message("Run completed")
    } else {
        RunEvent::new(run_id, EventType::RunFailed, EventStatus::Failed)
            .with_message(format!("{} operator(s) failed", failed.len()))
            .with_extra("failed", json!(failed))
    };
    journal.write_event(terminal).await?;
    info!(%run_id, status = ?status, failed = failed.len(), "Run finished");

    let material = store
        .material(&material)?
        .map(|record| {
            json!({
                "id": record.id,
                "title": record.title,
                "rich_data": record.rich_data,
            })
        })
        .unwrap_or(Value::Null);

    Ok(RunReport {
        run_id,
        pipeline: pipeline.name,
        status,
        failed: outcome.failed,
        steps: outcome.steps,
        operators: outcome.operators,
        material,
        cards: store.cards()?,
        journal: journal_path,
    })
}
