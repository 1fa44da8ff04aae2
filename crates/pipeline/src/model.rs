//! Pipeline definition model: `Pipeline → Step → OpRef → Operator`.
//!
//! - [`OpRef`]: a specific usage of an operator in a pipeline, with config overrides.
//! - [`Step`]: a business-meaningful task composed of one or more OpRefs; the
//!   unit of lifecycle logging and the first smart-skip check.
//! - [`Edge`]: data flow from one OpRef's output port to another's input port,
//!   or from the pipeline's initial input.
//! - [`Pipeline`]: the complete DAG.
//!
//! Definitions are immutable inputs to a run. They serialise to the JSON
//! definition format `{steps: [...], edges: [...]}` used for persistence and
//! editing tools.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{EdgeId, OpId, OperatorKey, PipelineId, PortKey, PortMap, PortValue, StepKey};

/// One usage of an operator inside a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpRef {
    /// Unique within the pipeline.
    pub id: OpId,

    /// Which registered operator to run.
    pub operator_key: OperatorKey,

    /// Static inputs merged at the lowest precedence (edge data wins).
    #[serde(default)]
    pub config_overrides: BTreeMap<String, serde_json::Value>,
}

impl OpRef {
    /// Creates an OpRef with no overrides.
    pub fn new(id: OpId, operator_key: OperatorKey) -> Self {
        Self {
            id,
            operator_key,
            config_overrides: BTreeMap::new(),
        }
    }

    /// Adds a static config override.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config_overrides.insert(key.into(), value);
        self
    }

    /// Converts the config overrides into port values.
    ///
    /// Override keys that are not valid port keys (empty strings) are dropped.
    pub fn override_inputs(&self) -> PortMap {
        self.config_overrides
            .iter()
            .filter_map(|(key, value)| {
                PortKey::new(key.clone()).map(|port| (port, PortValue::from(value.clone())))
            })
            .collect()
    }
}

/// Canvas position of a step in editing tools.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Position {
    /// Creates a position.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A named group of OpRefs reported as one unit of progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Stable step key (e.g. `"summarize"`).
    pub key: StepKey,

    /// User-visible label (e.g. `"Generate Summary"`).
    #[serde(default)]
    pub label: String,

    /// Ordered operators; the last one completing marks the step completed.
    #[serde(default)]
    pub operators: Vec<OpRef>,

    /// Canvas position.
    #[serde(default)]
    pub position: Position,
}

impl Step {
    /// Creates a step.
    pub fn new(key: StepKey, label: impl Into<String>, operators: Vec<OpRef>) -> Self {
        Self {
            key,
            label: label.into(),
            operators,
            position: Position::default(),
        }
    }

    /// Sets the canvas position.
    #[must_use]
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    /// Returns the id of the step's last OpRef, if any.
    pub fn last_op(&self) -> Option<&OpId> {
        self.operators.last().map(|op| &op.id)
    }
}

/// A typed data dependency between two OpRefs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique within the pipeline.
    pub id: EdgeId,

    /// Producing op, or the `__input__` sentinel.
    pub source_op: OpId,

    /// Output port of the producing op (or key of the initial inputs).
    pub source_port: PortKey,

    /// Consuming op.
    pub target_op: OpId,

    /// Input port of the consuming op.
    pub target_port: PortKey,
}

impl Edge {
    /// Creates an edge.
    pub fn new(
        id: EdgeId,
        source_op: OpId,
        source_port: PortKey,
        target_op: OpId,
        target_port: PortKey,
    ) -> Self {
        Self {
            id,
            source_op,
            source_port,
            target_op,
            target_port,
        }
    }

    /// Returns `true` if the edge reads from the pipeline's initial inputs.
    pub fn is_from_initial_input(&self) -> bool {
        self.source_op.is_initial_input()
    }
}

/// The serialisable `{steps, edges}` body of a pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Steps in display order.
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Data-flow edges.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A complete pipeline: ordered steps plus the edges forming a DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Template or stored identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PipelineId>,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Description.
    #[serde(default)]
    pub description: String,

    /// Steps in display order.
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Data-flow edges.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Pipeline {
    /// Builds a pipeline from a stored definition.
    pub fn from_definition(
        id: Option<PipelineId>,
        name: impl Into<String>,
        description: impl Into<String>,
        definition: PipelineDefinition,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            steps: definition.steps,
            edges: definition.edges,
        }
    }

    /// Returns the `{steps, edges}` definition of this pipeline.
    pub fn definition(&self) -> PipelineDefinition {
        PipelineDefinition {
            steps: self.steps.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Iterates over every OpRef in step order.
    pub fn op_refs(&self) -> impl Iterator<Item = (&Step, &OpRef)> {
        self.steps
            .iter()
            .flat_map(|step| step.operators.iter().map(move |op| (step, op)))
    }

    /// Returns the step with the given key.
    pub fn step(&self, key: &StepKey) -> Option<&Step> {
        self.steps.iter().find(|step| &step.key == key)
    }
}
