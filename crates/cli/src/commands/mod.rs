//! Subcommand implementations and shared wiring.

pub mod inspect;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use fetch::{HttpFetcher, PdfFigureExtractor};
use llm::OpenAiProvider;
use nodes::{template, Collaborators, ToolEnvironment, TEMPLATE_NAMES};
use pipeline::{FigureExtractor, Pipeline};
use serde::Serialize;

use crate::config::Config;

/// Where the pipeline to inspect or run comes from.
#[derive(Debug, Clone, Args)]
pub struct PipelineSource {
    /// Built-in template name (default: paper_default)
    #[arg(long, conflicts_with = "pipeline")]
    pub template: Option<String>,

    /// Pipeline definition file (JSON)
    #[arg(long)]
    pub pipeline: Option<PathBuf>,
}

impl PipelineSource {
    pub fn load(&self) -> Result<Pipeline> {
        if let Some(path) = &self.pipeline {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read pipeline: {}", path.display()))?;
            return serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse pipeline: {}", path.display()));
        }
        let name = self.template.as_deref().unwrap_or("paper_default");
        template(name).ok_or_else(|| {
            anyhow!(
                "Unknown template '{name}' (available: {})",
                TEMPLATE_NAMES.join(", ")
            )
        })
    }
}

/// Builds the infrastructure the built-in operators run against.
pub fn collaborators(config: &Config) -> Result<Collaborators> {
    let llm = OpenAiProvider::new(config.llm.provider_config())
        .context("Invalid [llm] configuration")?;
    let fetcher =
        HttpFetcher::new(&config.fetch.fetcher_config()).context("Invalid [fetch] configuration")?;
    let figure_extractor = config.figures.enabled.then(|| {
        Arc::new(PdfFigureExtractor::new(
            config.figures.min_width,
            config.figures.min_height,
        )) as Arc<dyn FigureExtractor>
    });

    Ok(Collaborators {
        llm: Arc::new(llm),
        tools: ToolEnvironment {
            fetcher: Arc::new(fetcher),
            figure_extractor,
            figures_dir: config.figures.output_dir.clone(),
        },
        manifest_dir: config.tools.manifest_dir.clone(),
    })
}

/// Pretty-prints `value` to stdout.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
