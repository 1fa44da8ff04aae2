//! LLM provider infrastructure adapter.
//!
//! Implements the [`pipeline::LlmProvider`] trait for any server speaking the
//! OpenAI chat completions protocol (OpenAI, Azure-compatible gateways,
//! vLLM, Ollama).
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, request formatting, response parsing,
//! `Retry-After` handling and exponential back-off live here. The
//! [`pipeline`] crate sees only [`pipeline::LlmProvider`].
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`openai`] | [`OpenAiProvider`], [`OpenAiConfig`] |
//! | [`retry`] | [`Backoff`] |

pub mod openai;
pub mod retry;

pub use openai::{OpenAiConfig, OpenAiProvider};
pub use retry::Backoff;
