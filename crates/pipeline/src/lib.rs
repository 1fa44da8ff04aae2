//! Core domain of the Studyflow pipeline execution core.
//!
//! This crate contains every domain concept, newtype identifier, port value
//! type and error type used throughout the workspace, together with the
//! traits (ports) that infrastructure crates implement. It never performs I/O.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** The `nodes` crate orchestrates
//! operators on top of these types; `llm`, `fetch` and `storage` supply the
//! infrastructure behind [`LlmProvider`], [`ContentFetcher`], [`EventLog`] and
//! [`StudyStore`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`OpId`, `StepKey`, `RunId`, etc.) |
//! | [`types`] | Ports, port values, token counts, timestamps |
//! | [`errors`] | Error enums and [`RetryPolicy`] |
//! | [`model`] | `Pipeline → Step → OpRef` plus `Edge` |
//! | [`graph`] | Operator DAG and level computation |
//! | [`operator`] | The [`Operator`] trait, descriptors and run context |
//! | [`registry`] | [`OperatorRegistry`] |
//! | [`tool`] | Tool manifests, handlers and the generic tool operator |
//! | [`events`] | Run lifecycle events and the [`EventLog`] port |
//! | [`store`] | [`StudyStore`] / [`StoreSession`] persistence port |
//! | [`llm`] | [`LlmProvider`] port and chat message types |
//! | [`fetch`] | [`ContentFetcher`] and [`FigureExtractor`] ports |

pub mod errors;
pub mod events;
pub mod fetch;
pub mod graph;
pub mod identifiers;
pub mod llm;
pub mod model;
pub mod operator;
pub mod registry;
pub mod store;
pub mod tool;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{
    EventLogError, FetchError, LlmError, OperatorError, PipelineError, RegistryError, RetryPolicy,
    StoreError,
};
pub use events::{EventLog, EventStatus, EventType, RunEvent};
pub use fetch::{describe_figures, ContentFetcher, FetchedDocument, Figure, FigureExtractor};
pub use graph::{topological_levels, OperatorGraph};
pub use identifiers::{
    BatchId, CardId, EdgeId, MaterialId, OpId, OperatorKey, PipelineId, PortKey, RunId, StepKey,
    UserId, INITIAL_INPUT,
};
pub use llm::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, ContentPart, LlmProvider, ResponseFormat,
    TokenUsage,
};
pub use model::{Edge, OpRef, Pipeline, PipelineDefinition, Position, Step};
pub use operator::{Operator, OperatorContext, OperatorDescriptor, OperatorKind, RunContext};
pub use registry::{OperatorFactory, OperatorRegistry};
pub use store::{CardRecord, CardStatus, StoreSession, StudyStore};
pub use tool::{ToolHandler, ToolHandlers, ToolManifest, ToolOperator};
pub use types::{Port, PortMap, PortType, PortValue, Timestamp, TokenCount};
