//! Per-dependency-kind resilience profiles.

use std::time::Duration;

/// External dependency classes with differentiated resilience thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Llm,
    Rag,
    Redis,
    Database,
    Http,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Llm => "llm",
            DependencyKind::Rag => "rag",
            DependencyKind::Redis => "redis",
            DependencyKind::Database => "database",
            DependencyKind::Http => "http",
        }
    }

    /// Resilience profile tuned for this dependency kind.
    pub fn profile(&self) -> ResilienceProfile {
        match self {
            DependencyKind::Llm => ResilienceProfile {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(60),
                attempt_timeout: Duration::from_millis(30_000),
                retry_enabled: true,
                max_retries: 3,
                backoff_multiplier: 1.0,
                backoff_min: Duration::from_millis(1_000),
                backoff_max: Duration::from_millis(10_000),
            },
            DependencyKind::Rag => ResilienceProfile {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
                attempt_timeout: Duration::from_millis(15_000),
                retry_enabled: true,
                max_retries: 3,
                backoff_multiplier: 1.0,
                backoff_min: Duration::from_millis(500),
                backoff_max: Duration::from_millis(5_000),
            },
            DependencyKind::Redis => ResilienceProfile {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(30),
                attempt_timeout: Duration::from_millis(5_000),
                retry_enabled: true,
                max_retries: 2,
                backoff_multiplier: 0.5,
                backoff_min: Duration::from_millis(100),
                backoff_max: Duration::from_millis(2_000),
            },
            DependencyKind::Database => ResilienceProfile {
                failure_threshold: 10,
                recovery_timeout: Duration::from_secs(60),
                attempt_timeout: Duration::from_millis(10_000),
                retry_enabled: false,
                max_retries: 0,
                backoff_multiplier: 0.0,
                backoff_min: Duration::from_millis(0),
                backoff_max: Duration::from_millis(0),
            },
            DependencyKind::Http => ResilienceProfile {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
                attempt_timeout: Duration::from_millis(20_000),
                retry_enabled: true,
                max_retries: 3,
                backoff_multiplier: 1.0,
                backoff_min: Duration::from_millis(1_000),
                backoff_max: Duration::from_millis(15_000),
            },
        }
    }

    /// Default bulkhead capacity for this kind. Unknown names fall back to
    /// the `llm` bulkhead at the call site (see [`crate::resilience::bulkhead`]).
    pub fn bulkhead_capacity(&self) -> usize {
        match self {
            DependencyKind::Llm => 10,
            DependencyKind::Rag => 20,
            DependencyKind::Database => 50,
            DependencyKind::Redis | DependencyKind::Http => 10,
        }
    }
}

/// Tunable knobs for one dependency kind.
#[derive(Debug, Clone, Copy)]
pub struct ResilienceProfile {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub attempt_timeout: Duration,
    pub retry_enabled: bool,
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}
