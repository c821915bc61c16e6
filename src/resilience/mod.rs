//! Composable resilience wrappers around any async boundary call.
//!
//! Every call into an external dependency (LLM, RAG, database, outbound
//! HTTP) is expected to go through [`ResilienceStack::call`] or
//! [`ResilienceStack::call_with_fallback`]. The composition order is fixed,
//! outer to inner:
//!
//! ```text
//! Bulkhead → CircuitBreaker → Retry → Timeout → inner operation
//! ```
//!
//! Bulkhead acquisition happens before the circuit breaker is consulted so a
//! saturated dependency never counts against the breaker's failure budget.
//! Writes are not retried: the `DATABASE` profile sets `retry_enabled=false`.

mod bulkhead;
mod circuit_breaker;
mod error;
mod profile;
mod retry;

pub use bulkhead::{Bulkhead, BulkheadRegistry};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use error::ResilienceError;
pub use profile::{DependencyKind, ResilienceProfile};
pub use retry::backoff_delay;

use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;

/// Process-wide, thread-safe registry of circuit breakers and bulkheads, one
/// of each per dependency kind. Created once at process start; reset only
/// through the explicit test hook [`ResilienceStack::reset_for_tests`].
pub struct ResilienceStack {
    llm: CircuitBreaker,
    rag: CircuitBreaker,
    redis: CircuitBreaker,
    database: CircuitBreaker,
    http: CircuitBreaker,
    bulkheads: BulkheadRegistry,
}

impl ResilienceStack {
    fn new() -> Self {
        Self {
            llm: CircuitBreaker::new(DependencyKind::Llm),
            rag: CircuitBreaker::new(DependencyKind::Rag),
            redis: CircuitBreaker::new(DependencyKind::Redis),
            database: CircuitBreaker::new(DependencyKind::Database),
            http: CircuitBreaker::new(DependencyKind::Http),
            bulkheads: BulkheadRegistry::new(),
        }
    }

    /// The single process-wide instance.
    pub fn global() -> &'static ResilienceStack {
        static INSTANCE: Lazy<ResilienceStack> = Lazy::new(ResilienceStack::new);
        &INSTANCE
    }

    fn breaker(&self, kind: DependencyKind) -> &CircuitBreaker {
        match kind {
            DependencyKind::Llm => &self.llm,
            DependencyKind::Rag => &self.rag,
            DependencyKind::Redis => &self.redis,
            DependencyKind::Database => &self.database,
            DependencyKind::Http => &self.http,
        }
    }

    /// Snapshot every breaker's state for health-check surfaces.
    pub fn breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        [
            DependencyKind::Llm,
            DependencyKind::Rag,
            DependencyKind::Redis,
            DependencyKind::Database,
            DependencyKind::Http,
        ]
        .iter()
        .map(|k| self.breaker(*k).snapshot())
        .collect()
    }

    /// Run `op` under the full resilience stack for `kind`. `op` is a
    /// factory so each attempt gets a fresh future.
    pub async fn call<T, E: 'static, F, Fut>(
        &self,
        kind: DependencyKind,
        operation_name: &str,
        mut op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let bulkhead = self.bulkheads.get(kind);
        let _permit = bulkhead.acquire().await;

        let breaker = self.breaker(kind);
        let profile = kind.profile();

        if let Err(retry_after) = breaker.admit() {
            return Err(ResilienceError::CircuitOpen {
                kind: kind.as_str().to_string(),
                retry_after_secs: retry_after.as_secs(),
            });
        }

        let max_attempts = if profile.retry_enabled {
            profile.max_retries.max(1)
        } else {
            1
        };

        let mut last_err: Option<ResilienceError<E>> = None;

        for attempt in 1..=max_attempts {
            let attempt_result =
                tokio::time::timeout(profile.attempt_timeout, op()).await;

            match attempt_result {
                Ok(Ok(value)) => {
                    // One logical call through the breaker, regardless of
                    // how many retry attempts it took underneath.
                    breaker.on_success();
                    return Ok(value);
                }
                Ok(Err(inner_err)) => {
                    last_err = Some(ResilienceError::Inner(inner_err));
                }
                Err(_elapsed) => {
                    last_err = Some(ResilienceError::Timeout(profile.attempt_timeout));
                }
            }

            if attempt < max_attempts {
                tracing::warn!(
                    operation = operation_name,
                    kind = kind.as_str(),
                    attempt,
                    max_attempts,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(backoff_delay(&profile, attempt)).await;
            }
        }

        // The whole retry chain is one outcome from the breaker's point of
        // view: it only ever sees a single failure per call(), never one
        // per attempt.
        breaker.on_failure();

        let last_err = last_err.expect("loop always runs >=1 iteration");
        if max_attempts > 1 {
            Err(ResilienceError::RetryExhausted {
                attempts: max_attempts,
                source: Box::new(last_err),
            })
        } else {
            Err(last_err)
        }
    }

    /// Same as [`Self::call`], but on terminal failure invokes `fallback`
    /// instead of propagating the error. If `fallback` itself fails, the
    /// original resilience error is returned (the fallback's error is
    /// logged, not surfaced) — matching the "original error wins" rule for
    /// a failed fallback.
    ///
    /// The upstream system looks the fallback up by method name via
    /// reflection; idiomatic Rust has no equivalent dynamic dispatch by
    /// string name on `self`, so the fallback is passed explicitly as a
    /// closure. This keeps the same "clean primary signature, explicit
    /// fallback" intent without unsafe reflection machinery.
    pub async fn call_with_fallback<T, E: 'static, F, Fut, FB, FbFut>(
        &self,
        kind: DependencyKind,
        operation_name: &str,
        op: F,
        fallback: FB,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        match self.call(kind, operation_name, op).await {
            Ok(value) => Ok(value),
            Err(primary_err) => match fallback().await {
                Ok(value) => Ok(value),
                Err(fallback_err) => {
                    tracing::error!(
                        operation = operation_name,
                        kind = kind.as_str(),
                        "fallback itself failed: {}",
                        ResilienceErrDebug(&fallback_err)
                    );
                    Err(primary_err)
                }
            },
        }
    }

    /// Reset all circuit breakers and bulkheads. Test-only escape hatch for
    /// global mutable state, per the lifecycle contract: created once,
    /// thread-safe, reset only via this explicit hook.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn reset_for_tests(&self) {
        for kind in [
            DependencyKind::Llm,
            DependencyKind::Rag,
            DependencyKind::Redis,
            DependencyKind::Database,
            DependencyKind::Http,
        ] {
            self.breaker(kind).on_success();
        }
    }
}

impl Default for ResilienceStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper so a fallback's opaque error type can be logged without requiring
/// `Debug`/`Display` bounds everywhere `call_with_fallback` is used.
struct ResilienceErrDebug<'a, E>(&'a E);
impl<'a, E> std::fmt::Display for ResilienceErrDebug<'a, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<fallback error>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn circuit_opens_after_threshold_failing_calls_not_failing_attempts() {
        // LLM profile: failure_threshold=3, max_retries=3. Each of the first
        // three *calls* exhausts its own 3 retry attempts internally but
        // counts as exactly one failure against the breaker, so the breaker
        // only opens after the third call, not after the third attempt of
        // the first call.
        let stack = ResilienceStack::new(); // isolated instance, not the global singleton
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let res: Result<(), ResilienceError<&str>> = stack
                .call(DependencyKind::Llm, "probe", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("boom") }
                })
                .await;
            assert!(matches!(res, Err(ResilienceError::RetryExhausted { .. })));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 9, "each of the 3 calls should have run all 3 retry attempts");

        let calls_before = calls.load(Ordering::SeqCst);
        let res: Result<(), ResilienceError<&str>> = stack
            .call(DependencyKind::Llm, "probe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("boom") }
            })
            .await;
        assert!(matches!(res, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(
            calls.load(Ordering::SeqCst),
            calls_before,
            "inner op must not run while circuit is open"
        );
    }

    #[tokio::test]
    async fn fallback_invoked_on_retry_exhaustion() {
        let stack = ResilienceStack::new();
        let res: Result<&str, ResilienceError<&str>> = stack
            .call_with_fallback(
                DependencyKind::Redis,
                "probe",
                || async { Err::<&str, _>("down") },
                || async { Ok("fallback-value") },
            )
            .await;
        assert_eq!(res.unwrap(), "fallback-value");
    }

    #[tokio::test]
    async fn database_profile_never_retries() {
        let stack = ResilienceStack::new();
        let calls = AtomicU32::new(0);
        let res: Result<(), ResilienceError<&str>> = stack
            .call(DependencyKind::Database, "write", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("write failed") }
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
