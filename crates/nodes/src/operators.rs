//! Built-in LLM operators: `summary`, `reading_notes`, `study_quiz` and
//! `figure_association`.
//!
//! Prompts are embedded from `prompts/*.yaml` and parsed once when the
//! registry is built.

use std::sync::Arc;

use pipeline::{
    LlmProvider, OperatorDescriptor, OperatorError, OperatorKey, OperatorKind, OperatorRegistry,
    Port, PortKey, PortMap, PortType, PortValue, RegistryError,
};
use serde_json::Value;

use crate::llm_operator::{LlmOperator, OutputMapper, PromptTemplate, Reply};

/// Static definition of one LLM operator.
struct LlmOperatorDef {
    key: &'static str,
    name: &'static str,
    description: &'static str,
    prompt_file: &'static str,
    prompt_yaml: &'static str,
    structured: bool,
    input_ports: fn() -> Vec<Port>,
    output_ports: fn() -> Vec<Port>,
    map_output: OutputMapper,
}

impl LlmOperatorDef {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor {
            key: OperatorKey::from_static(self.key),
            name: self.name.to_string(),
            kind: OperatorKind::Llm,
            description: self.description.to_string(),
            input_ports: (self.input_ports)(),
            output_ports: (self.output_ports)(),
        }
    }
}

const LLM_OPERATORS: &[LlmOperatorDef] = &[
    LlmOperatorDef {
        key: "summary",
        name: "Summary",
        description: "Generates a concise summary of a paper.",
        prompt_file: "prompts/summary.yaml",
        prompt_yaml: include_str!("../prompts/summary.yaml"),
        structured: false,
        input_ports: text_input,
        output_ports: summary_outputs,
        map_output: map_summary,
    },
    LlmOperatorDef {
        key: "reading_notes",
        name: "Reading Notes",
        description: "Generates 9 structured research note sections from a paper.",
        prompt_file: "prompts/reading_notes.yaml",
        prompt_yaml: include_str!("../prompts/reading_notes.yaml"),
        structured: true,
        input_ports: text_input,
        output_ports: reading_notes_outputs,
        map_output: map_reading_notes,
    },
    LlmOperatorDef {
        key: "study_quiz",
        name: "Study Quiz",
        description: "Generates question/answer flashcards from a paper.",
        prompt_file: "prompts/study_quiz.yaml",
        prompt_yaml: include_str!("../prompts/study_quiz.yaml"),
        structured: true,
        input_ports: text_input,
        output_ports: study_quiz_outputs,
        map_output: map_study_quiz,
    },
    LlmOperatorDef {
        key: "figure_association",
        name: "Figure Association",
        description: "Associates extracted figures with reading note sections.",
        prompt_file: "prompts/figure_association.yaml",
        prompt_yaml: include_str!("../prompts/figure_association.yaml"),
        structured: true,
        input_ports: figure_association_inputs,
        output_ports: figure_association_outputs,
        map_output: map_figure_association,
    },
];

fn port(key: &'static str, port_type: PortType, description: &str) -> Port {
    Port::new(PortKey::from_static(key), port_type, description)
}

fn text_input() -> Vec<Port> {
    vec![port("text", PortType::Text, "Paper full text")]
}

fn summary_outputs() -> Vec<Port> {
    vec![port("summary", PortType::Text, "Paper summary")]
}

fn reading_notes_outputs() -> Vec<Port> {
    vec![port(
        "notes",
        PortType::Json,
        "List of {title, content} note sections",
    )]
}

fn study_quiz_outputs() -> Vec<Port> {
    vec![port(
        "flashcards",
        PortType::Cards,
        "List of {question, answer} cards",
    )]
}

fn figure_association_inputs() -> Vec<Port> {
    vec![
        port("notes", PortType::Json, "Reading notes"),
        port("images", PortType::Images, "Figure images in extraction order").optional(),
    ]
}

fn figure_association_outputs() -> Vec<Port> {
    vec![port("associations", PortType::Json, "Section-to-figure mapping")]
}

/// Registers every built-in LLM operator against `provider`.
///
/// # Errors
///
/// [`RegistryError::InvalidManifest`] if an embedded prompt does not parse.
pub fn register_llm_operators(
    registry: &mut OperatorRegistry,
    provider: &Arc<dyn LlmProvider>,
) -> Result<(), RegistryError> {
    for def in LLM_OPERATORS {
        let prompt = Arc::new(PromptTemplate::from_yaml(def.prompt_file, def.prompt_yaml)?);
        let operator = LlmOperator::new(
            def.descriptor(),
            prompt,
            def.structured,
            def.map_output,
            Arc::clone(provider),
        );
        registry.register(move || operator.clone());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output mapping
// ---------------------------------------------------------------------------

fn single(port: &'static str, value: PortValue) -> PortMap {
    PortMap::from([(PortKey::from_static(port), value)])
}

fn map_summary(_operator: &OperatorKey, reply: Reply) -> Result<PortMap, OperatorError> {
    let text = match reply {
        Reply::Text(text) => text,
        Reply::Json(value) => value.to_string(),
    };
    Ok(single("summary", PortValue::Text(text.trim().to_string())))
}

fn map_reading_notes(_operator: &OperatorKey, reply: Reply) -> Result<PortMap, OperatorError> {
    let notes = match reply {
        Reply::Json(value) => unwrap_list(value, &["notes", "sections", "parts", "content"]),
        Reply::Text(text) => Value::String(text),
    };
    Ok(single("notes", PortValue::Json(notes)))
}

fn map_study_quiz(operator: &OperatorKey, reply: Reply) -> Result<PortMap, OperatorError> {
    match reply {
        Reply::Json(value) => match unwrap_list(value, &["flashcards"]) {
            Value::Array(cards) => Ok(single("flashcards", PortValue::Cards(cards))),
            other => Err(OperatorError::InvalidData {
                operator: operator.clone(),
                message: format!("expected a list of flashcards, got {}", json_kind(&other)),
            }),
        },
        Reply::Text(_) => Err(OperatorError::InvalidData {
            operator: operator.clone(),
            message: "expected a list of flashcards, got text".into(),
        }),
    }
}

fn map_figure_association(_operator: &OperatorKey, reply: Reply) -> Result<PortMap, OperatorError> {
    let associations = match reply {
        Reply::Json(Value::Object(mut object)) if object.contains_key("associations") => object
            .remove("associations")
            .unwrap_or(Value::Null),
        Reply::Json(value) => value,
        Reply::Text(text) => Value::String(text),
    };
    Ok(single("associations", PortValue::Json(associations)))
}

/// Returns the first list found under one of `wrappers`, or `value` itself.
fn unwrap_list(value: Value, wrappers: &[&str]) -> Value {
    match value {
        Value::Object(mut object) => {
            for key in wrappers {
                if object.get(*key).is_some_and(Value::is_array) {
                    return object.remove(*key).unwrap_or(Value::Null);
                }
            }
            Value::Object(object)
        }
        other => other,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
