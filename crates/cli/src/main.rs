//! Studyflow CLI entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: load `studyflow.toml` (or `--config`) and
//!    apply `STUDYFLOW_*` environment overrides.
//! 2. **Wire observability**: `tracing-subscriber` with an env filter, a human
//!    or JSON fmt layer on stderr, and an optional OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: the OpenAI-compatible LLM provider, the
//!    HTTP fetcher, the PDF figure extractor, the JSONL event journal and the
//!    in-memory study store, injected into the `PipelineEngine`.
//! 4. **Dispatch** the subcommand. Command output goes to stdout as JSON.
//!
//! `run` exits with 0 when every operator succeeded, 2 when the run
//! completed partially and 1 when nothing completed.

mod commands;
mod config;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nodes::RunStatus;

use commands::run::RunArgs;
use commands::PipelineSource;
use config::Config;

#[derive(Parser)]
#[command(
    name = "studyflow",
    version,
    about = "Turns papers and articles into summaries, reading notes and flashcards"
)]
struct Cli {
    /// Configuration file (default: ./studyflow.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered operators and their ports as JSON
    Operators,
    /// Print the definition of a built-in pipeline template
    Template {
        /// Template name, e.g. paper_default
        name: String,
    },
    /// Print the execution levels of a pipeline
    Levels {
        #[command(flatten)]
        source: PipelineSource,
    },
    /// Run a pipeline on one source and print a JSON report
    Run(RunArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let _telemetry = telemetry::init(&config.telemetry)?;

    match cli.command {
        Commands::Operators => commands::inspect::operators(&config)?,
        Commands::Template { name } => commands::inspect::template_definition(&name)?,
        Commands::Levels { source } => commands::inspect::levels(&source)?,
        Commands::Run(args) => {
            let report = commands::run::execute(&config, &args).await?;
            commands::print_json(&report)?;
            return Ok(match report.status {
                RunStatus::Completed => ExitCode::SUCCESS,
                RunStatus::PartiallyCompleted => ExitCode::from(2),
                RunStatus::Failed => ExitCode::FAILURE,
            });
        }
    }
    Ok(ExitCode::SUCCESS)
}
