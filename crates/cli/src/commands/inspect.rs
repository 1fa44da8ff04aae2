//! Read-only commands: `operators`, `template`, `levels`.

use anyhow::{anyhow, Result};
use nodes::{builtin_registry, template, TEMPLATE_NAMES};
use pipeline::{topological_levels, OpId};

use super::{collaborators, print_json, PipelineSource};
use crate::config::Config;

/// Prints the descriptor of every registered operator.
pub fn operators(config: &Config) -> Result<()> {
    let registry = builtin_registry(&collaborators(config)?)?;
    print_json(&registry.manifests())
}

/// Prints the `{steps, edges}` definition of a built-in template.
pub fn template_definition(name: &str) -> Result<()> {
    let pipeline = template(name).ok_or_else(|| {
        anyhow!(
            "Unknown template '{name}' (available: {})",
            TEMPLATE_NAMES.join(", ")
        )
    })?;
    print_json(&pipeline.definition())
}

/// Prints the execution levels of a pipeline.
pub fn levels(source: &PipelineSource) -> Result<()> {
    let pipeline = source.load()?;
    print_json(&level_ids(&topological_levels(&pipeline)?))
}

fn level_ids(levels: &[Vec<OpId>]) -> Vec<Vec<&str>> {
    levels
        .iter()
        .map(|level| level.iter().map(OpId::as_str).collect())
        .collect()
}
