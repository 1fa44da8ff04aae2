//! Error and retry-policy types for the pipeline domain.
//!
//! [`PipelineError`] covers configuration conditions that make a run
//! meaningless; they are raised by the engine before any operator executes.
//! [`OperatorError`] is the typed failure channel of
//! [`crate::Operator::execute`] and is always contained by the engine.
//! Collaborator errors ([`LlmError`], [`FetchError`], [`StoreError`],
//! [`EventLogError`]) are defined here so port traits can name them.
//!
//! [`RetryPolicy`] is a cross-cutting concern: every operator failure can
//! say whether re-running it may succeed.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EdgeId, OpId, OperatorKey, PortKey, PortType, StepKey};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: timeouts, rate limits, server errors, storage hiccups.
/// - `NonRetryable` errors: contract violations, authentication failures,
///   malformed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately or apply the caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Pipeline-level (configuration) errors
// ---------------------------------------------------------------------------

/// Configuration errors that abort a run before any operator executes.
///
/// These are never retried: the pipeline definition or the registry must be
/// fixed first.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The operator graph induced by steps and edges contains a cycle.
    #[error("Pipeline has a cycle: only {placed}/{total} operators reachable")]
    CycleDetected {
        /// Number of operators placed into levels before the sort stalled.
        placed: usize,
        /// Total number of operators in the pipeline.
        total: usize,
    },

    /// The same op id is used by more than one OpRef.
    #[error("Duplicate op id '{op_id}' in steps '{first_step}' and '{second_step}'")]
    DuplicateOpId {
        /// The repeated op id.
        op_id: OpId,
        /// Step that declared the op id first.
        first_step: StepKey,
        /// Step that declared it again.
        second_step: StepKey,
    },

    /// An edge references an op id that no step declares.
    #[error("Edge '{edge}' references unknown op '{op_id}'")]
    DanglingEdge {
        /// The offending edge.
        edge: EdgeId,
        /// The op id that could not be resolved.
        op_id: OpId,
    },

    /// An OpRef names an operator key the registry does not know.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

/// Errors produced by [`crate::OperatorRegistry`] lookups and manifest loading.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No operator is registered under this key. A configuration error.
    #[error("Unknown operator key: '{key}'")]
    UnknownOperator {
        /// The key that was looked up.
        key: String,
    },

    /// A tool manifest could not be parsed.
    #[error("Invalid tool manifest '{source_name}': {message}")]
    InvalidManifest {
        /// File name or label of the manifest.
        source_name: String,
        /// Parser message.
        message: String,
    },

    /// A tool manifest references a handler that is not in the handler table.
    #[error("Tool manifest '{key}' references unknown handler '{handler}'")]
    UnknownHandler {
        /// Key declared by the manifest.
        key: OperatorKey,
        /// The unresolved handler reference.
        handler: String,
    },

    /// A directory of tool manifests could not be listed.
    #[error("Cannot read tool manifest directory {}: {source}", .path.display())]
    ManifestDir {
        /// The directory.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Operator execution errors
// ---------------------------------------------------------------------------

/// Failure of a single operator invocation.
///
/// Returned by [`crate::Operator::execute`]; the engine records it, marks the
/// operator failed and skips its downstream dependents.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// A required input port was not bound.
    #[error("Operator '{operator}': missing required input port '{port}'")]
    MissingInput {
        /// The operator whose contract was violated.
        operator: OperatorKey,
        /// The missing port.
        port: PortKey,
    },

    /// An input port was bound to a value of the wrong type.
    #[error("Operator '{operator}': input port '{port}' expects {expected}, got {actual}")]
    PortTypeMismatch {
        /// The operator whose contract was violated.
        operator: OperatorKey,
        /// The mistyped port.
        port: PortKey,
        /// Declared type.
        expected: PortType,
        /// Type of the supplied value.
        actual: PortType,
    },

    /// The run context lacks a field the operator needs.
    #[error("Operator '{operator}': run context has no {field}")]
    MissingContext {
        /// The operator that needed the field.
        operator: OperatorKey,
        /// Name of the missing context field.
        field: &'static str,
    },

    /// The operator produced or received data it could not interpret.
    #[error("Operator '{operator}': {message}")]
    InvalidData {
        /// The reporting operator.
        operator: OperatorKey,
        /// What was wrong with the data.
        message: String,
    },

    /// The operator task panicked.
    #[error("Operator '{operator}' panicked: {message}")]
    Panicked {
        /// The operator that panicked.
        operator: OperatorKey,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// A local file-system operation failed.
    #[error("Operator '{operator}': {context}: {source}")]
    Io {
        /// The reporting operator.
        operator: OperatorKey,
        /// What was being attempted.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The LLM provider failed.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The content fetcher failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The persistence session failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OperatorError {
    /// Whether re-running the operator may succeed.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            OperatorError::MissingInput { .. }
            | OperatorError::PortTypeMismatch { .. }
            | OperatorError::MissingContext { .. } => RetryPolicy::NonRetryable,
            OperatorError::Llm(err) => err.retry_policy(),
            OperatorError::Fetch(err) => err.retry_policy(),
            OperatorError::InvalidData { .. }
            | OperatorError::Panicked { .. }
            | OperatorError::Io { .. }
            | OperatorError::Store(_) => RetryPolicy::Retryable { after: None },
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator errors
// ---------------------------------------------------------------------------

/// Errors returned by an [`crate::LlmProvider`].
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider answered with a non-success HTTP status.
    #[error("LLM provider returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
        /// Delay requested by `Retry-After`, if any.
        retry_after: Option<Duration>,
    },

    /// The request could not be sent or timed out.
    #[error("LLM transport error: {0}")]
    Transport(String),

    /// The response could not be interpreted.
    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    /// The provider is not configured (e.g. missing API key).
    #[error("LLM provider not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    /// Only rate limiting (429) and server errors (5xx) are retryable.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            LlmError::Status {
                status,
                retry_after,
                ..
            } if *status == 429 || *status >= 500 => RetryPolicy::Retryable {
                after: *retry_after,
            },
            LlmError::Transport(_) => RetryPolicy::Retryable { after: None },
            _ => RetryPolicy::NonRetryable,
        }
    }
}

/// Errors returned by a [`crate::ContentFetcher`] or [`crate::FigureExtractor`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote server answered with a non-success status.
    #[error("Fetching '{url}' returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The request could not be sent or timed out.
    #[error("Fetching '{url}' failed: {message}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Transport message.
        message: String,
    },

    /// The content type cannot be turned into text.
    #[error("Unsupported content type '{content_type}' for '{url}'")]
    UnsupportedContent {
        /// Requested URL.
        url: String,
        /// Reported content type.
        content_type: String,
    },

    /// A local source could not be read.
    #[error("Reading '{path}' failed: {source}")]
    Io {
        /// Local path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Figure extraction failed.
    #[error("Figure extraction failed: {0}")]
    Extraction(String),
}

impl FetchError {
    /// Transport failures and server errors are retryable.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            FetchError::Status { status, .. } if *status == 429 || *status >= 500 => {
                RetryPolicy::Retryable { after: None }
            }
            FetchError::Transport { .. } => RetryPolicy::Retryable { after: None },
            _ => RetryPolicy::NonRetryable,
        }
    }
}

/// Errors returned by a [`crate::StudyStore`] or its sessions.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("Study store lock poisoned")]
    LockPoisoned,
}

/// Errors returned by an [`crate::EventLog`].
#[derive(Debug, Error)]
pub enum EventLogError {
    /// File-system I/O failure.
    #[error("Event log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An event could not be serialised or a stored line could not be parsed.
    #[error("Event log encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Backend failure not covered above.
    #[error("Event log backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations_are_not_retryable() {
        let err = OperatorError::MissingInput {
            operator: OperatorKey::from_static("summary"),
            port: PortKey::from_static("text"),
        };
        assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable);
        assert_eq!(
            err.to_string(),
            "Operator 'summary': missing required input port 'text'"
        );
    }

    #[test]
    fn rate_limits_and_server_errors_are_retryable() {
        let limited = LlmError::Status {
            status: 429,
            body: "slow down".into(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(
            limited.retry_policy(),
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(7))
            }
        );

        let server = LlmError::Status {
            status: 503,
            body: String::new(),
            retry_after: None,
        };
        assert!(server.retry_policy().is_retryable());

        let unauthorised = LlmError::Status {
            status: 401,
            body: "bad key".into(),
            retry_after: None,
        };
        assert!(!OperatorError::from(unauthorised).retry_policy().is_retryable());
    }

    #[test]
    fn cycle_error_reports_reachable_count() {
        let err = PipelineError::CycleDetected { placed: 1, total: 3 };
        assert_eq!(
            err.to_string(),
            "Pipeline has a cycle: only 1/3 operators reachable"
        );
    }

    #[test]
    fn unknown_operator_is_distinct_from_other_registry_errors() {
        let err = PipelineError::from(RegistryError::UnknownOperator {
            key: "nope".into(),
        });
        assert!(matches!(
            err,
            PipelineError::Registry(RegistryError::UnknownOperator { .. })
        ));
        assert_eq!(err.to_string(), "Unknown operator key: 'nope'");
    }
}
