//! The operator abstraction: descriptors, execution contract and run context.
//!
//! An operator is a stateless unit of work with a stable key and typed ports.
//! The engine asks the [`crate::OperatorRegistry`] for a fresh instance per
//! invocation, binds its inputs from upstream outputs and calls
//! [`Operator::execute`] with an [`OperatorContext`] that owns an isolated
//! persistence session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    MaterialId, OpId, OperatorError, OperatorKey, Port, PortMap, RunId, StepKey, StoreSession,
    StudyStore, UserId,
};

/// Broad family of an operator, shown in the manifest listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    /// Prompt-driven, calls an LLM provider.
    Llm,
    /// Manifest-defined, delegates to a tool handler.
    Tool,
}

impl std::fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorKind::Llm => write!(f, "llm"),
            OperatorKind::Tool => write!(f, "tool"),
        }
    }
}

/// Static description of an operator.
///
/// Serialises to the manifest-listing entry
/// `{key, name, kind, description, input_ports, output_ports}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorDescriptor {
    /// Globally unique, stable key.
    pub key: OperatorKey,
    /// Display name.
    pub name: String,
    /// LLM or tool.
    pub kind: OperatorKind,
    /// What the operator does.
    #[serde(default)]
    pub description: String,
    /// Declared inputs.
    #[serde(default)]
    pub input_ports: Vec<Port>,
    /// Declared outputs.
    #[serde(default)]
    pub output_ports: Vec<Port>,
}

impl OperatorDescriptor {
    /// Returns the input port declared under `key`.
    pub fn input_port(&self, key: &str) -> Option<&Port> {
        self.input_ports.iter().find(|port| port.key.as_str() == key)
    }

    /// Checks `inputs` against the declared input ports.
    ///
    /// # Errors
    ///
    /// - [`OperatorError::MissingInput`] for the first required port that is
    ///   not bound.
    /// - [`OperatorError::PortTypeMismatch`] for a bound value whose type does
    ///   not conform to its port.
    pub fn validate_inputs(&self, inputs: &PortMap) -> Result<(), OperatorError> {
        for port in &self.input_ports {
            match inputs.get(&port.key) {
                Some(value) if !value.conforms_to(port.port_type) => {
                    return Err(OperatorError::PortTypeMismatch {
                        operator: self.key.clone(),
                        port: port.key.clone(),
                        expected: port.port_type,
                        actual: value.port_type(),
                    });
                }
                Some(_) => {}
                None if port.required => {
                    return Err(OperatorError::MissingInput {
                        operator: self.key.clone(),
                        port: port.key.clone(),
                    });
                }
                None => {}
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Run-wide execution context shared by every operator of one run.
#[derive(Clone)]
pub struct RunContext {
    /// Correlation key of the event log.
    pub run_id: RunId,
    /// User on whose behalf the run executes.
    pub user_id: UserId,
    /// Material the run derives study content for, if already ingested.
    pub material_id: Option<MaterialId>,
    /// Persistence handle; each operator opens its own session.
    pub store: Arc<dyn StudyStore>,
}

impl RunContext {
    /// Creates a context without a material.
    pub fn new(run_id: RunId, user_id: UserId, store: Arc<dyn StudyStore>) -> Self {
        Self {
            run_id,
            user_id,
            material_id: None,
            store,
        }
    }

    /// Sets the material id.
    #[must_use]
    pub fn with_material(mut self, material_id: MaterialId) -> Self {
        self.material_id = Some(material_id);
        self
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("user_id", &self.user_id)
            .field("material_id", &self.material_id)
            .finish_non_exhaustive()
    }
}

/// Per-invocation context handed to [`Operator::execute`].
///
/// The session is private to this invocation; the engine commits it after a
/// successful execute and drops it (discarding pending writes) on failure.
pub struct OperatorContext {
    /// The run-wide context.
    pub run: RunContext,
    /// Isolated persistence session.
    pub session: Box<dyn StoreSession>,
    /// The op being executed.
    pub op_id: OpId,
    /// Step enclosing the op.
    pub step_key: StepKey,
}

impl OperatorContext {
    /// Returns the run's material id, or a contract error naming `operator`.
    ///
    /// # Errors
    ///
    /// [`OperatorError::MissingContext`] if the run has no material.
    pub fn require_material(&self, operator: &OperatorKey) -> Result<&MaterialId, OperatorError> {
        self.run
            .material_id
            .as_ref()
            .ok_or_else(|| OperatorError::MissingContext {
                operator: operator.clone(),
                field: "material_id",
            })
    }
}

// ---------------------------------------------------------------------------
// Operator trait
// ---------------------------------------------------------------------------

/// A typed processing unit.
///
/// # Contract
///
/// - Inputs carry only declared input ports; required ports are present and
///   type-checked before `execute` is called (see
///   [`Operator::validate_inputs`]).
/// - Returned outputs are keyed by output port. Declared outputs that are
///   missing are tolerated; downstream edges simply bind nothing.
/// - Errors are contained by the engine: they fail this operator and skip its
///   dependents, never the run.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Static description (key, kind, ports).
    fn descriptor(&self) -> &OperatorDescriptor;

    /// Stable operator key.
    fn key(&self) -> &OperatorKey {
        &self.descriptor().key
    }

    /// Checks inputs before execution. The default validates against the
    /// declared input ports.
    ///
    /// # Errors
    ///
    /// A contract-violation [`OperatorError`].
    fn validate_inputs(&self, inputs: &PortMap) -> Result<(), OperatorError> {
        self.descriptor().validate_inputs(inputs)
    }

    /// Runs the operator.
    ///
    /// # Errors
    ///
    /// Any [`OperatorError`]; the engine records it as `operator_failed`.
    async fn execute(
        &self,
        inputs: PortMap,
        ctx: &mut OperatorContext,
    ) -> Result<PortMap, OperatorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PortKey, PortType, PortValue};

    fn descriptor() -> OperatorDescriptor {
        OperatorDescriptor {
            key: OperatorKey::from_static("figure_association"),
            name: "Figure Association".into(),
            kind: OperatorKind::Llm,
            description: String::new(),
            input_ports: vec![
                Port::new(PortKey::from_static("notes"), PortType::Json, "Reading notes"),
                Port::new(PortKey::from_static("images"), PortType::Images, "Figures").optional(),
            ],
            output_ports: vec![Port::new(
                PortKey::from_static("associations"),
                PortType::Json,
                "Section-to-figure mapping",
            )],
        }
    }

    #[test]
    fn optional_ports_may_be_absent() {
        let mut inputs = PortMap::new();
        inputs.insert(
            PortKey::from_static("notes"),
            PortValue::Json(serde_json::json!([])),
        );
        assert!(descriptor().validate_inputs(&inputs).is_ok());
    }

    #[test]
    fn missing_required_port_is_named() {
        let err = descriptor().validate_inputs(&PortMap::new()).unwrap_err();
        match err {
            OperatorError::MissingInput { port, .. } => assert_eq!(port.as_str(), "notes"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn mistyped_value_is_rejected() {
        let mut inputs = PortMap::new();
        inputs.insert(PortKey::from_static("notes"), PortValue::Text("x".into()));
        inputs.insert(PortKey::from_static("images"), PortValue::Images(vec![]));
        assert!(matches!(
            descriptor().validate_inputs(&inputs),
            Err(OperatorError::PortTypeMismatch {
                expected: PortType::Json,
                actual: PortType::Text,
                ..
            })
        ));
    }

    #[test]
    fn manifest_entry_uses_flat_port_fields() {
        let value = serde_json::to_value(descriptor()).unwrap();
        assert_eq!(value["kind"], "llm");
        assert_eq!(value["input_ports"][1]["type"], "images");
        assert_eq!(value["input_ports"][1]["required"], false);
    }
}
