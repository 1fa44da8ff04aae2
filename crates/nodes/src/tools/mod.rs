//! Built-in tool handlers and their manifests.
//!
//! Each tool is declared by a YAML manifest (embedded from `manifests/`)
//! whose `handler` names an entry of the table built by [`builtin_handlers`].
//! Extra manifests can be loaded from a directory with
//! [`read_manifest_dir`]; they may reuse any built-in handler.
//!
//! | Handler | Inputs | Outputs |
//! |---------|--------|---------|
//! | `pdf_fetch` | `url` | `text`, `pdf_bytes` |
//! | `save_summary` | `summary` | `done` |
//! | `save_cards` | `items`, `card_type` | `batch_id`, `count` |
//! | `extract_figures` | `pdf_bytes`, `url?` | `images`, `figure_info`, `saved_paths` |
//! | `apply_figure_associations` | `associations?`, `saved_paths?`, `notes_batch?` | `updated_count` |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipeline::{
    ContentFetcher, FigureExtractor, OperatorError, OperatorKey, PortKey, PortMap, PortValue,
    RegistryError, ToolHandlers,
};
use tracing::{debug, warn};

mod cards;
mod figures;
mod pdf_fetch;

pub use cards::{SaveCards, SaveSummary};
pub use figures::{ApplyFigureAssociations, ExtractFigures};
pub use pdf_fetch::{normalize_arxiv_url, PdfFetch};

/// Manifests shipped with the crate as `(file name, yaml)`.
pub const BUILTIN_MANIFESTS: &[(&str, &str)] = &[
    (
        "pdf_fetch.yaml",
        include_str!("../../manifests/pdf_fetch.yaml"),
    ),
    (
        "save_summary.yaml",
        include_str!("../../manifests/save_summary.yaml"),
    ),
    (
        "save_cards.yaml",
        include_str!("../../manifests/save_cards.yaml"),
    ),
    (
        "extract_figures.yaml",
        include_str!("../../manifests/extract_figures.yaml"),
    ),
    (
        "apply_figure_associations.yaml",
        include_str!("../../manifests/apply_figure_associations.yaml"),
    ),
];

/// Infrastructure the built-in tools need.
#[derive(Clone)]
pub struct ToolEnvironment {
    /// Source of paper text and bytes.
    pub fetcher: Arc<dyn ContentFetcher>,
    /// Figure extractor; without one, `extract_figures` finds no figures.
    pub figure_extractor: Option<Arc<dyn FigureExtractor>>,
    /// Directory under which figures are saved, one sub-directory per run.
    pub figures_dir: PathBuf,
}

impl std::fmt::Debug for ToolEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEnvironment")
            .field("figure_extractor", &self.figure_extractor.is_some())
            .field("figures_dir", &self.figures_dir)
            .finish_non_exhaustive()
    }
}

/// Handler table for the built-in manifests.
pub fn builtin_handlers(env: &ToolEnvironment) -> ToolHandlers {
    ToolHandlers::new()
        .with("pdf_fetch", Arc::new(PdfFetch::new(Arc::clone(&env.fetcher))))
        .with("save_summary", Arc::new(SaveSummary))
        .with("save_cards", Arc::new(SaveCards))
        .with(
            "extract_figures",
            Arc::new(ExtractFigures::new(
                env.figure_extractor.clone(),
                env.figures_dir.clone(),
            )),
        )
        .with("apply_figure_associations", Arc::new(ApplyFigureAssociations))
}

/// Reads every `*.yaml` / `*.yml` file in `dir`, sorted by file name.
///
/// Unreadable files are logged and skipped.
///
/// # Errors
///
/// [`RegistryError::ManifestDir`] if `dir` itself cannot be listed.
pub fn read_manifest_dir(dir: &Path) -> Result<Vec<(String, String)>, RegistryError> {
    let entries = std::fs::read_dir(dir).map_err(|source| RegistryError::ManifestDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    paths.sort();

    let mut manifests = Vec::with_capacity(paths.len());
    for path in paths {
        match std::fs::read_to_string(&path) {
            Ok(yaml) => {
                debug!(path = %path.display(), "Read tool manifest");
                manifests.push((path.display().to_string(), yaml));
            }
            Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable manifest"),
        }
    }
    Ok(manifests)
}

// ---------------------------------------------------------------------------
// Input helpers
// ---------------------------------------------------------------------------

/// Borrows a required input through `extract`.
fn required<'a, T: ?Sized>(
    operator: &OperatorKey,
    inputs: &'a PortMap,
    port: &'static str,
    extract: fn(&PortValue) -> Option<&T>,
) -> Result<&'a T, OperatorError> {
    let value = inputs.get(port).ok_or_else(|| OperatorError::MissingInput {
        operator: operator.clone(),
        port: PortKey::from_static(port),
    })?;
    extract(value).ok_or_else(|| OperatorError::InvalidData {
        operator: operator.clone(),
        message: format!("input '{port}' has unexpected type {}", value.port_type()),
    })
}

fn output(port: &'static str, value: impl Into<PortValue>) -> (PortKey, PortValue) {
    (PortKey::from_static(port), value.into())
}
