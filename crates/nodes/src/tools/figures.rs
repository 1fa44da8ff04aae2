use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    describe_figures, BatchId, Figure, FigureExtractor, OperatorContext, OperatorError,
    OperatorKey, PortMap, PortValue, RunId, ToolHandler,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{output, required};

/// Card type whose cards receive figure images.
const READING_NOTE: &str = "reading_note";

/// `extract_figures`: extracts figures and saves them under
/// `<figures_dir>/<run_id>/`.
pub struct ExtractFigures {
    extractor: Option<Arc<dyn FigureExtractor>>,
    figures_dir: PathBuf,
}

impl ExtractFigures {
    /// Creates the handler. Without an extractor no figures are found.
    pub fn new(extractor: Option<Arc<dyn FigureExtractor>>, figures_dir: PathBuf) -> Self {
        Self {
            extractor,
            figures_dir,
        }
    }

    async fn save(
        &self,
        operator: &OperatorKey,
        run_id: RunId,
        figures: &[Figure],
    ) -> Result<Vec<String>, OperatorError> {
        let dir = self.figures_dir.join(run_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| OperatorError::Io {
                operator: operator.clone(),
                context: format!("creating {}", dir.display()),
                source,
            })?;

        let mut saved = Vec::with_capacity(figures.len());
        for figure in figures {
            let path = dir.join(figure.file_name());
            tokio::fs::write(&path, &figure.bytes)
                .await
                .map_err(|source| OperatorError::Io {
                    operator: operator.clone(),
                    context: format!("writing {}", path.display()),
                    source,
                })?;
            saved.push(path.display().to_string());
        }
        Ok(saved)
    }
}

#[async_trait]
impl ToolHandler for ExtractFigures {
    async fn handle(
        &self,
        operator: &OperatorKey,
        inputs: PortMap,
        ctx: &mut OperatorContext,
    ) -> Result<PortMap, OperatorError> {
        let pdf = required(operator, &inputs, "pdf_bytes", PortValue::as_pdf_bytes)?;
        let url = inputs.get("url").and_then(PortValue::as_text);

        let figures = match &self.extractor {
            Some(extractor) => extractor.extract(pdf, url).await?,
            None => {
                debug!("No figure extractor configured");
                Vec::new()
            }
        };
        let saved_paths = if figures.is_empty() {
            Vec::new()
        } else {
            self.save(operator, ctx.run.run_id, &figures).await?
        };
        info!(figures = figures.len(), "Extracted figures");

        let figure_info = describe_figures(&figures);
        let images = figures.into_iter().map(|figure| figure.bytes).collect();
        Ok(PortMap::from([
            output("images", PortValue::Images(images)),
            output("figure_info", figure_info),
            output(
                "saved_paths",
                PortValue::Json(Value::Array(
                    saved_paths.into_iter().map(Value::String).collect(),
                )),
            ),
        ]))
    }
}

/// `apply_figure_associations`: attaches saved figure paths to reading-note
/// cards.
///
/// Association `section_index` values are 1-based and match the card whose
/// `batch_index` is one lower. When `notes_batch` is bound only that batch is
/// considered.
pub struct ApplyFigureAssociations;

#[async_trait]
impl ToolHandler for ApplyFigureAssociations {
    async fn handle(
        &self,
        operator: &OperatorKey,
        inputs: PortMap,
        ctx: &mut OperatorContext,
    ) -> Result<PortMap, OperatorError> {
        let associations = association_list(inputs.get("associations"));
        let saved_paths: Vec<&str> = inputs
            .get("saved_paths")
            .and_then(PortValue::card_items)
            .map(|paths| paths.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if associations.is_empty() || saved_paths.is_empty() {
            info!("No associations or saved paths, nothing to apply");
            return Ok(updated(0));
        }

        let batch = match inputs.get("notes_batch").and_then(PortValue::as_text) {
            Some(text) => Some(text.parse::<BatchId>().map_err(|err| {
                OperatorError::InvalidData {
                    operator: operator.clone(),
                    message: format!("notes_batch '{text}' is not a batch id: {err}"),
                }
            })?),
            None => None,
        };
        let material = ctx.require_material(operator)?.clone();
        let mut cards = ctx
            .session
            .cards_for_material(&material, READING_NOTE)
            .await?;
        if let Some(batch) = batch {
            cards.retain(|card| card.batch_id == batch);
        }
        if cards.is_empty() {
            warn!(material = %material, "No reading note cards found");
            return Ok(updated(0));
        }

        let mut count = 0;
        for association in associations {
            let Some(section) = association
                .get("section_index")
                .and_then(Value::as_u64)
                .filter(|index| *index >= 1)
            else {
                continue;
            };
            let figure_indices: Vec<usize> = association
                .get("figure_indices")
                .and_then(Value::as_array)
                .map(|indices| {
                    indices
                        .iter()
                        .filter_map(Value::as_u64)
                        .filter_map(|index| usize::try_from(index).ok())
                        .collect()
                })
                .unwrap_or_default();
            if figure_indices.is_empty() {
                continue;
            }

            let Some(card) = cards
                .iter()
                .find(|card| u64::try_from(card.batch_index).ok() == Some(section - 1))
            else {
                debug!(section, "No card for section");
                continue;
            };
            let images: Vec<String> = figure_indices
                .iter()
                .filter_map(|index| saved_paths.get(*index))
                .map(|path| (*path).to_string())
                .collect();
            if images.is_empty() {
                continue;
            }
            debug!(card = %card.id, section, images = images.len(), "Attaching figures");
            ctx.session.set_card_images(card.id, images).await?;
            count += 1;
        }

        info!(material = %material, updated = count, "Applied figure associations");
        Ok(updated(count))
    }
}

/// Accepts a bare list or an `{"associations": [...]}` wrapper.
fn association_list(value: Option<&PortValue>) -> Vec<Value> {
    match value.map(PortValue::to_json) {
        Some(Value::Array(items)) => items,
        Some(Value::Object(mut object)) => match object.remove("associations") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn updated(count: usize) -> PortMap {
    PortMap::from([output("updated_count", count.to_string())])
}
