//! Studyflow pipeline engine and built-in operators.
//!
//! This crate provides the [`PipelineEngine`] that executes a
//! [`pipeline::Pipeline`] level by level, the built-in LLM operators, the
//! manifest-declared tool operators and the built-in pipeline templates.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The engine sequences operators defined against
//! the ports of the [`pipeline`] crate (LLM provider, content fetcher, study
//! store, event log). Infrastructure is injected by the caller.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`engine`] | [`PipelineEngine`], run state and outcome |
//! | [`llm_operator`] | Generic prompt-driven operator, prompt rendering, lenient JSON parsing |
//! | [`operators`] | `summary`, `reading_notes`, `study_quiz`, `figure_association` |
//! | [`tools`] | Tool handlers and embedded manifests |
//! | [`templates`] | Built-in pipelines (`paper_default`) |
//! | [`builtin`] | Registry assembly |

pub mod builtin;
pub mod engine;
pub mod llm_operator;
pub mod operators;
pub mod templates;
pub mod tools;

pub use builtin::{builtin_registry, Collaborators};
pub use engine::{
    EngineOptions, OperatorState, PipelineEngine, RunOutcome, RunStatus, SkipReason, StepStatus,
};
pub use llm_operator::{parse_json_lenient, LlmOperator, PromptTemplate};
pub use templates::{paper_default, template, TEMPLATE_NAMES};
pub use tools::{builtin_handlers, ToolEnvironment};
