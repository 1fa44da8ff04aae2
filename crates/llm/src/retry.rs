//! Exponential back-off for rate-limited and failing LLM calls.

use std::time::Duration;

use pipeline::{LlmError, RetryPolicy};

/// Retry schedule for a single chat completion.
///
/// The delay before attempt `n + 1` is `initial * 2^(n - 1)`, capped at
/// `max`. A `Retry-After` from the server replaces the computed delay (still
/// capped at `max`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl Backoff {
    /// Computed delay after failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }

    /// How long to wait before retrying after `err` failed attempt
    /// `attempt`, or `None` when the call must not be retried.
    ///
    /// Only HTTP 429 and 5xx answers are retried here. Transport failures
    /// surface immediately.
    pub fn wait_for(&self, attempt: u32, err: &LlmError) -> Option<Duration> {
        if attempt >= self.max_attempts || !matches!(err, LlmError::Status { .. }) {
            return None;
        }
        match err.retry_policy() {
            RetryPolicy::Retryable { after: Some(after) } => Some(after.min(self.max)),
            RetryPolicy::Retryable { after: None } => Some(self.delay(attempt)),
            RetryPolicy::NonRetryable => None,
        }
    }
}
