//! Manifest-defined tool operators.
//!
//! A tool manifest is a YAML document:
//!
//! ```yaml
//! key: save_cards
//! name: Save Cards
//! description: Persists generated items as pending study cards.
//! handler: save_cards
//! input_ports:
//!   - { key: items, type: cards }
//!   - { key: card_type, type: text }
//! output_ports:
//!   - { key: batch_id, type: text }
//! ```
//!
//! `handler` names an entry of an explicit [`ToolHandlers`] table assembled
//! at startup; nothing is resolved by reflection.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    Operator, OperatorContext, OperatorDescriptor, OperatorError, OperatorKey, OperatorKind, Port,
    PortMap, RegistryError,
};

/// Parsed tool manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Operator key.
    pub key: OperatorKey,
    /// Display name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Name of the handler in the [`ToolHandlers`] table.
    pub handler: String,
    /// Declared inputs.
    #[serde(default)]
    pub input_ports: Vec<Port>,
    /// Declared outputs.
    #[serde(default)]
    pub output_ports: Vec<Port>,
}

impl ToolManifest {
    /// Parses a manifest; `source_name` labels errors.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidManifest`] if the YAML does not describe a
    /// manifest.
    pub fn from_yaml(source_name: &str, yaml: &str) -> Result<Self, RegistryError> {
        serde_yaml::from_str(yaml).map_err(|err| RegistryError::InvalidManifest {
            source_name: source_name.to_string(),
            message: err.to_string(),
        })
    }

    /// Converts into a tool-kind descriptor.
    pub fn into_descriptor(self) -> OperatorDescriptor {
        OperatorDescriptor {
            key: self.key,
            name: self.name,
            kind: OperatorKind::Tool,
            description: self.description,
            input_ports: self.input_ports,
            output_ports: self.output_ports,
        }
    }
}

/// Business logic of a tool operator.
///
/// `operator` is the key of the invoking tool so one handler can serve
/// several manifests and still report errors under the right name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool.
    async fn handle(
        &self,
        operator: &OperatorKey,
        inputs: PortMap,
        ctx: &mut OperatorContext,
    ) -> Result<PortMap, OperatorError>;
}

/// Handler name → implementation.
#[derive(Default, Clone)]
pub struct ToolHandlers {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolHandlers {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a handler.
    pub fn insert(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Builder form of [`ToolHandlers::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.insert(name, handler);
        self
    }

    /// Looks up a handler.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Handler names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ToolHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

/// Generic operator pairing a manifest descriptor with its handler.
pub struct ToolOperator {
    descriptor: OperatorDescriptor,
    handler: Arc<dyn ToolHandler>,
}

impl ToolOperator {
    /// Creates the operator.
    pub fn new(descriptor: OperatorDescriptor, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            descriptor,
            handler,
        }
    }
}

#[async_trait]
impl Operator for ToolOperator {
    fn descriptor(&self) -> &OperatorDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        inputs: PortMap,
        ctx: &mut OperatorContext,
    ) -> Result<PortMap, OperatorError> {
        self.validate_inputs(&inputs)?;
        self.handler.handle(&self.descriptor.key, inputs, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OperatorRegistry, PortType};

    const MANIFEST: &str = r#"
key: save_cards
name: Save Cards
description: Persists generated items as pending study cards.
handler: save_cards
input_ports:
  - key: items
    type: cards
    description: Items to persist
  - key: card_type
    type: text
output_ports:
  - key: batch_id
    type: text
  - key: count
    type: text
"#;

    struct Noop;

    #[async_trait]
    impl ToolHandler for Noop {
        async fn handle(
            &self,
            _operator: &OperatorKey,
            _inputs: PortMap,
            _ctx: &mut OperatorContext,
        ) -> Result<PortMap, OperatorError> {
            Ok(PortMap::new())
        }
    }

    #[test]
    fn manifest_ports_default_to_required() {
        let manifest = ToolManifest::from_yaml("save_cards.yaml", MANIFEST).unwrap();
        assert_eq!(manifest.handler, "save_cards");
        assert_eq!(manifest.input_ports[0].port_type, PortType::Cards);
        assert!(manifest.input_ports.iter().all(|port| port.required));

        let descriptor = manifest.into_descriptor();
        assert_eq!(descriptor.kind, OperatorKind::Tool);
        assert_eq!(descriptor.output_ports.len(), 2);
    }

    #[test]
    fn malformed_manifest_names_its_source() {
        let err = ToolManifest::from_yaml("broken.yaml", "key: [").unwrap_err();
        assert!(err.to_string().starts_with("Invalid tool manifest 'broken.yaml'"));
    }

    #[test]
    fn unknown_handler_is_rejected_and_others_still_register() {
        let handlers = ToolHandlers::new().with("save_cards", Arc::new(Noop));
        let orphan = MANIFEST
            .replace("key: save_cards", "key: orphan")
            .replace("handler: save_cards", "handler: missing");

        let mut registry = OperatorRegistry::new();
        let registered = registry.register_manifests(
            [("save_cards.yaml", MANIFEST), ("orphan.yaml", orphan.as_str())],
            &handlers,
        );
        assert_eq!(registered, 1);
        assert!(registry.contains("save_cards"));
        assert!(!registry.contains("orphan"));

        let manifest = ToolManifest::from_yaml("orphan.yaml", &orphan).unwrap();
        assert!(matches!(
            registry.register_manifest(manifest, &handlers),
            Err(RegistryError::UnknownHandler { .. })
        ));
    }
}
