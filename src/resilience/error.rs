//! Error taxonomy for the resilience stack.

use thiserror::Error;

/// Errors surfaced by the resilience composition (circuit breaker → retry →
/// timeout → inner operation).
#[derive(Debug, Error)]
pub enum ResilienceError<E: 'static> {
    /// The circuit breaker for this dependency kind is open; the inner
    /// operation was never invoked.
    #[error("circuit open for {kind}: rejecting call, retry after {retry_after_secs}s")]
    CircuitOpen {
        kind: String,
        retry_after_secs: u64,
    },

    /// A single attempt exceeded its per-attempt deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// All configured retry attempts were exhausted.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted { attempts: u32, source: Box<Self> },

    /// The bulkhead for this dependency kind has no free slots.
    #[error("bulkhead saturated for {kind}")]
    BulkheadSaturated { kind: String },

    /// The wrapped operation itself failed (not a resilience-layer failure).
    #[error("{0}")]
    Inner(E),
}

impl<E> ResilienceError<E> {
    /// True for failures that originated in the resilience layers themselves
    /// rather than the wrapped operation.
    pub fn is_resilience_layer_failure(&self) -> bool {
        !matches!(self, ResilienceError::Inner(_))
    }
}
