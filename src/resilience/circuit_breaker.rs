//! Per-kind, per-process circuit breaker.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::profile::DependencyKind;

/// Circuit breaker state machine: CLOSED → OPEN → HALF_OPEN → CLOSED | OPEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only snapshot suitable for health-check endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// A single circuit breaker instance, one per dependency kind per process.
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(kind: DependencyKind) -> Self {
        let profile = kind.profile();
        Self {
            name: kind.as_str(),
            failure_threshold: profile.failure_threshold,
            recovery_timeout: profile.recovery_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Returns `Ok(())` if a call may proceed (transitioning OPEN → HALF_OPEN
    /// when the recovery timeout has elapsed), or `Err(retry_after)` if the
    /// circuit is open and the call must be rejected without execution.
    pub fn admit(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(self.recovery_timeout - elapsed)
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count = 0;
        inner.state = CircuitState::Closed;
        inner.last_failure_at = None;
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());
        if inner.failure_count >= self.failure_threshold {
            inner.state = CircuitState::Open;
        } else if inner.state == CircuitState::HalfOpen {
            // A HALF_OPEN probe that fails before crossing the threshold
            // still re-opens the circuit; one failure is enough evidence
            // the dependency has not recovered.
            inner.state = CircuitState::Open;
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        CircuitBreakerSnapshot {
            name: self.name.to_string(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(DependencyKind::Llm); // threshold 3
        for _ in 0..2 {
            cb.admit().unwrap();
            cb.on_failure();
        }
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
        cb.admit().unwrap();
        cb.on_failure();
        assert_eq!(cb.snapshot().state, CircuitState::Open);
        assert!(cb.admit().is_err());
    }

    #[test]
    fn half_open_success_closes_circuit() {
        let cb = CircuitBreaker::new(DependencyKind::Redis);
        {
            let mut inner = cb.inner.lock().unwrap();
            inner.state = CircuitState::HalfOpen;
        }
        cb.on_success();
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }
}
