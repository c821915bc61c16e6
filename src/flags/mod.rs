//! Feature flags: `(flag, tenant) -> {enabled, percentage}` with an
//! environment-variable override, consistent percentage rollout, and
//! pub/sub invalidation of local memoization.

mod pubsub;
mod store;

pub use pubsub::{run_listener_with_watchdog, FlagChangeEvent, FlagChannel, InProcessFlagChannel};
pub use store::{FlagSetting, FlagStore, FlagStoreError, InMemoryFlagStore, SqliteFlagStore, DEFAULT_TENANT};

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};

use crate::config::FabricConfig;

/// Stable per-user hash bucket in `[0, 100)`, used for percentage rollout.
fn user_bucket(user_id: &str) -> u64 {
    let digest = Sha256::digest(user_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    u64::from_be_bytes(bytes) % 100
}

pub struct FeatureFlags {
    store: Arc<dyn FlagStore>,
    channel: Arc<dyn FlagChannel>,
    memo: RwLock<HashMap<(String, String), FlagSetting>>,
    restart_count: Arc<AtomicU64>,
}

impl FeatureFlags {
    pub fn new(store: Arc<dyn FlagStore>, channel: Arc<dyn FlagChannel>) -> Self {
        Self { store, channel, memo: RwLock::new(HashMap::new()), restart_count: Arc::new(AtomicU64::new(0)) }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryFlagStore::new()), Arc::new(InProcessFlagChannel::new()))
    }

    /// Spawn the background pub/sub listener that invalidates local
    /// memoization on a flag change broadcast. Safe to call once per
    /// process; the watchdog restarts the loop if it ever exits.
    pub fn spawn_invalidation_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let channel = Arc::clone(&self.channel);
        let restart_count = Arc::clone(&self.restart_count);
        tokio::spawn(run_listener_with_watchdog(
            channel,
            move |event| {
                this.memo.write().unwrap().remove(&(event.flag, event.tenant));
            },
            restart_count,
        ))
    }

    pub fn restart_count(&self) -> u64 {
        self.restart_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn flag_env_name(flag: &str) -> String {
        flag.to_uppercase().replace(['-', '.'], "_")
    }

    fn resolve_setting(&self, flag: &str, tenant: &str) -> FlagSetting {
        if let Some(cached) = self.memo.read().unwrap().get(&(flag.to_string(), tenant.to_string())) {
            return *cached;
        }

        let setting = self
            .store
            .get(flag, tenant)
            .or_else(|| self.store.get(flag, DEFAULT_TENANT))
            .unwrap_or_else(FlagSetting::off);

        self.memo.write().unwrap().insert((flag.to_string(), tenant.to_string()), setting);
        setting
    }

    /// `true` if `flag` is on for `tenant`, honoring an environment-variable
    /// override (`FEATURE_<FLAG_NAME>`) ahead of the stored default.
    pub fn is_enabled(&self, flag: &str, tenant: &str) -> bool {
        if let Some(override_value) = FabricConfig::feature_env_override(&Self::flag_env_name(flag)) {
            return override_value;
        }
        self.resolve_setting(flag, tenant).enabled
    }

    /// `true` if `flag` is enabled for `tenant` AND `user_id` falls within
    /// the configured rollout percentage (or no percentage is set).
    pub fn is_enabled_for_user(&self, flag: &str, tenant: &str, user_id: &str) -> bool {
        if !self.is_enabled(flag, tenant) {
            return false;
        }
        match self.resolve_setting(flag, tenant).percentage {
            Some(percentage) => user_bucket(user_id) < percentage as u64,
            None => true,
        }
    }

    pub async fn set(&self, flag: &str, tenant: &str, setting: FlagSetting) {
        self.store.set(flag, tenant, setting);
        self.memo.write().unwrap().remove(&(flag.to_string(), tenant.to_string()));
        self.channel.publish(FlagChangeEvent { flag: flag.to_string(), tenant: tenant.to_string() }).await;
    }

    pub async fn clear(&self, flag: &str, tenant: &str) {
        self.store.clear(flag, tenant);
        self.memo.write().unwrap().remove(&(flag.to_string(), tenant.to_string()));
        self.channel.publish(FlagChangeEvent { flag: flag.to_string(), tenant: tenant.to_string() }).await;
    }

    pub fn list(&self, flag: &str) -> Vec<(String, FlagSetting)> {
        self.store.list(flag)
    }

    pub fn list_all(&self, tenant: Option<&str>) -> Vec<(String, String, FlagSetting)> {
        self.store.list_all(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tenant_specific_setting_wins_over_default() {
        let flags = FeatureFlags::in_memory();
        flags.set("new_ui", DEFAULT_TENANT, FlagSetting::off()).await;
        flags.set("new_ui", "tenant-a", FlagSetting::on()).await;
        assert!(flags.is_enabled("new_ui", "tenant-a"));
        assert!(!flags.is_enabled("new_ui", "tenant-b"));
    }

    #[tokio::test]
    async fn unset_flag_falls_back_to_false() {
        let flags = FeatureFlags::in_memory();
        assert!(!flags.is_enabled("never_set", "tenant-a"));
    }

    #[test]
    fn env_override_takes_precedence_over_store() {
        std::env::set_var("FEATURE_OVERRIDE_TEST_FLAG", "true");
        let flags = FeatureFlags::in_memory();
        assert!(flags.is_enabled("override_test_flag", "tenant-a"));
        std::env::remove_var("FEATURE_OVERRIDE_TEST_FLAG");
    }

    #[tokio::test]
    async fn percentage_rollout_is_stable_per_user() {
        let flags = FeatureFlags::in_memory();
        flags.set("new_ui", "tenant-a", FlagSetting::rollout(50)).await;
        let first = flags.is_enabled_for_user("new_ui", "tenant-a", "user-123");
        let second = flags.is_enabled_for_user("new_ui", "tenant-a", "user-123");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn zero_percent_rollout_excludes_everyone() {
        let flags = FeatureFlags::in_memory();
        flags.set("new_ui", "tenant-a", FlagSetting::rollout(0)).await;
        for i in 0..20 {
            assert!(!flags.is_enabled_for_user("new_ui", "tenant-a", &format!("user-{i}")));
        }
    }

    #[tokio::test]
    async fn set_publishes_an_invalidation_event() {
        let flags = FeatureFlags::in_memory();
        let mut receiver = flags.channel.subscribe();
        flags.set("new_ui", "tenant-a", FlagSetting::on()).await;
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.flag, "new_ui");
    }
}
