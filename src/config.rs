//! Process-wide configuration loaded from the environment.
//!
//! Mirrors the external interface contract: every knob is optional with a
//! documented default, and `REDIS_URL`'s role as "persistent store DSN" is
//! filled here by a SQLite path instead (see [`crate::queue::store`]).

use std::env;
use std::time::Duration;

/// Default idempotency window for batch/message de-duplication (24h).
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 86_400;

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// DSN for the persistent task/flag store. `None` means in-memory only.
    pub store_url: Option<String>,
    /// TTL for idempotency tracking (`AAM_IDEMPOTENCY_TTL`).
    pub idempotency_ttl: Duration,
    /// Default tenant used when a caller does not specify one.
    pub default_tenant: String,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            idempotency_ttl: Duration::from_secs(DEFAULT_IDEMPOTENCY_TTL_SECS),
            default_tenant: "default".to_string(),
        }
    }
}

impl FabricConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(url) = env::var("REDIS_URL") {
            if !url.is_empty() {
                cfg.store_url = Some(url);
            }
        }

        if let Ok(raw) = env::var("AAM_IDEMPOTENCY_TTL") {
            if let Ok(secs) = raw.parse::<u64>() {
                cfg.idempotency_ttl = Duration::from_secs(secs);
            }
        }

        if let Ok(tenant) = env::var("FABRIC_DEFAULT_TENANT") {
            if !tenant.is_empty() {
                cfg.default_tenant = tenant;
            }
        }

        cfg
    }

    /// Look up a per-flag environment override (`FEATURE_<FLAG_NAME>`), the
    /// same convention the feature flag store uses for process-level
    /// overrides layered on top of the persisted store.
    pub fn feature_env_override(flag_name: &str) -> Option<bool> {
        let var = format!("FEATURE_{flag_name}");
        match env::var(var).ok()?.to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        }
    }
}

/// Install a `tracing` subscriber honoring `RUST_LOG`, defaulting to `info`.
///
/// Call once from binary entry points; library code only ever emits through
/// `tracing`'s macros and never configures a global subscriber itself.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_store() {
        let cfg = FabricConfig::default();
        assert!(cfg.store_url.is_none());
        assert_eq!(cfg.idempotency_ttl.as_secs(), DEFAULT_IDEMPOTENCY_TTL_SECS);
    }

    #[test]
    fn feature_env_override_parses_truthy_values() {
        env::set_var("FEATURE_TEST_OVERRIDE_FLAG", "yes");
        assert_eq!(
            FabricConfig::feature_env_override("TEST_OVERRIDE_FLAG"),
            Some(true)
        );
        env::remove_var("FEATURE_TEST_OVERRIDE_FLAG");
    }
}
