//! Assembly of the registry of built-in operators.

use std::path::PathBuf;
use std::sync::Arc;

use pipeline::{LlmProvider, OperatorRegistry, RegistryError, ToolManifest};
use tracing::{info, warn};

use crate::operators::register_llm_operators;
use crate::tools::{builtin_handlers, read_manifest_dir, ToolEnvironment, BUILTIN_MANIFESTS};

/// Collaborators the built-in operators are wired against.
#[derive(Clone)]
pub struct Collaborators {
    /// Provider behind every LLM operator.
    pub llm: Arc<dyn LlmProvider>,
    /// Infrastructure for the tool operators.
    pub tools: ToolEnvironment,
    /// Directory of additional tool manifests.
    pub manifest_dir: Option<PathBuf>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("llm", &self.llm.model())
            .field("tools", &self.tools)
            .field("manifest_dir", &self.manifest_dir)
            .finish()
    }
}

/// Builds a registry holding the built-in LLM and tool operators plus any
/// manifests found in `manifest_dir`.
///
/// Built-in definitions must load; a broken extra manifest is logged and
/// skipped.
///
/// # Errors
///
/// [`RegistryError`] if an embedded prompt or manifest is invalid.
pub fn builtin_registry(collaborators: &Collaborators) -> Result<OperatorRegistry, RegistryError> {
    let mut registry = OperatorRegistry::new();
    register_llm_operators(&mut registry, &collaborators.llm)?;

    let handlers = builtin_handlers(&collaborators.tools);
    for (name, yaml) in BUILTIN_MANIFESTS {
        registry.register_manifest(ToolManifest::from_yaml(name, yaml)?, &handlers)?;
    }

    if let Some(dir) = &collaborators.manifest_dir {
        match read_manifest_dir(dir) {
            Ok(manifests) => {
                let loaded = registry.register_manifests(
                    manifests
                        .iter()
                        .map(|(name, yaml)| (name.as_str(), yaml.as_str())),
                    &handlers,
                );
                info!(dir = %dir.display(), loaded, "Loaded tool manifests");
            }
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "Cannot read tool manifest directory");
            }
        }
    }

    info!(operators = registry.len(), "Operator registry ready");
    Ok(registry)
}
