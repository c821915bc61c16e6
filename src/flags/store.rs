//! `(flag, tenant) -> {enabled, percentage}` storage with a "default"
//! tenant fallback. Pluggable so a process can back it with SQLite today
//! and a shared store later without touching lookup logic.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TENANT: &str = "default";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlagSetting {
    pub enabled: bool,
    pub percentage: Option<u8>,
}

impl FlagSetting {
    pub fn on() -> Self {
        Self { enabled: true, percentage: None }
    }

    pub fn off() -> Self {
        Self { enabled: false, percentage: None }
    }

    pub fn rollout(percentage: u8) -> Self {
        Self { enabled: true, percentage: Some(percentage.min(100)) }
    }
}

pub trait FlagStore: Send + Sync {
    fn get(&self, flag: &str, tenant: &str) -> Option<FlagSetting>;
    fn set(&self, flag: &str, tenant: &str, setting: FlagSetting);
    fn clear(&self, flag: &str, tenant: &str);
    fn list(&self, flag: &str) -> Vec<(String, FlagSetting)>;
    /// All `(flag, tenant, setting)` triples, optionally filtered to one tenant.
    fn list_all(&self, tenant: Option<&str>) -> Vec<(String, String, FlagSetting)>;
}

#[derive(Default)]
pub struct InMemoryFlagStore {
    entries: RwLock<HashMap<(String, String), FlagSetting>>,
}

impl InMemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for InMemoryFlagStore {
    fn get(&self, flag: &str, tenant: &str) -> Option<FlagSetting> {
        self.entries.read().unwrap().get(&(flag.to_string(), tenant.to_string())).copied()
    }

    fn set(&self, flag: &str, tenant: &str, setting: FlagSetting) {
        self.entries.write().unwrap().insert((flag.to_string(), tenant.to_string()), setting);
    }

    fn clear(&self, flag: &str, tenant: &str) {
        self.entries.write().unwrap().remove(&(flag.to_string(), tenant.to_string()));
    }

    fn list(&self, flag: &str) -> Vec<(String, FlagSetting)> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|((f, _), _)| f == flag)
            .map(|((_, tenant), setting)| (tenant.clone(), *setting))
            .collect()
    }

    fn list_all(&self, tenant: Option<&str>) -> Vec<(String, String, FlagSetting)> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|((_, t), _)| tenant.map(|want| want == t).unwrap_or(true))
            .map(|((flag, tenant), setting)| (flag.clone(), tenant.clone(), *setting))
            .collect()
    }
}

/// SQLite-backed store, matching `feature_flag:{flag}:{tenant}` as the
/// conceptual key (one row per flag/tenant pair).
pub struct SqliteFlagStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

#[derive(Debug, thiserror::Error)]
pub enum FlagStoreError {
    #[error("flag store unavailable: {0}")]
    Unavailable(String),
}

impl SqliteFlagStore {
    pub fn open(path: &str) -> Result<Self, FlagStoreError> {
        let conn = rusqlite::Connection::open(path).map_err(|e| FlagStoreError::Unavailable(e.to_string()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS feature_flags (
                flag TEXT NOT NULL,
                tenant TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                percentage INTEGER,
                PRIMARY KEY (flag, tenant)
            )",
            [],
        )
        .map_err(|e| FlagStoreError::Unavailable(e.to_string()))?;
        Ok(Self { conn: std::sync::Mutex::new(conn) })
    }
}

impl FlagStore for SqliteFlagStore {
    fn get(&self, flag: &str, tenant: &str) -> Option<FlagSetting> {
        let conn = self.conn.lock().ok()?;
        conn.query_row(
            "SELECT enabled, percentage FROM feature_flags WHERE flag = ?1 AND tenant = ?2",
            rusqlite::params![flag, tenant],
            |row| {
                let enabled: i64 = row.get(0)?;
                let percentage: Option<i64> = row.get(1)?;
                Ok(FlagSetting { enabled: enabled != 0, percentage: percentage.map(|p| p as u8) })
            },
        )
        .ok()
    }

    fn set(&self, flag: &str, tenant: &str, setting: FlagSetting) {
        if let Ok(conn) = self.conn.lock() {
            let _ = conn.execute(
                "INSERT INTO feature_flags (flag, tenant, enabled, percentage) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(flag, tenant) DO UPDATE SET enabled = excluded.enabled, percentage = excluded.percentage",
                rusqlite::params![flag, tenant, setting.enabled as i64, setting.percentage.map(|p| p as i64)],
            );
        }
    }

    fn clear(&self, flag: &str, tenant: &str) {
        if let Ok(conn) = self.conn.lock() {
            let _ = conn.execute(
                "DELETE FROM feature_flags WHERE flag = ?1 AND tenant = ?2",
                rusqlite::params![flag, tenant],
            );
        }
    }

    fn list(&self, flag: &str) -> Vec<(String, FlagSetting)> {
        self.list_all(None).into_iter().filter(|(f, _, _)| f == flag).map(|(_, t, s)| (t, s)).collect()
    }

    fn list_all(&self, tenant: Option<&str>) -> Vec<(String, String, FlagSetting)> {
        let Ok(conn) = self.conn.lock() else { return Vec::new() };
        let mut stmt = match tenant {
            Some(_) => conn.prepare("SELECT flag, tenant, enabled, percentage FROM feature_flags WHERE tenant = ?1"),
            None => conn.prepare("SELECT flag, tenant, enabled, percentage FROM feature_flags"),
        }
        .expect("static query");

        let map_row = |row: &rusqlite::Row| {
            let flag: String = row.get(0)?;
            let tenant: String = row.get(1)?;
            let enabled: i64 = row.get(2)?;
            let percentage: Option<i64> = row.get(3)?;
            Ok((flag, tenant, FlagSetting { enabled: enabled != 0, percentage: percentage.map(|p| p as u8) }))
        };

        let rows = match tenant {
            Some(t) => stmt.query_map(rusqlite::params![t], map_row),
            None => stmt.query_map([], map_row),
        };
        rows.map(|r| r.filter_map(Result::ok).collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = InMemoryFlagStore::new();
        store.set("new_ui", "tenant-a", FlagSetting::rollout(25));
        let setting = store.get("new_ui", "tenant-a").unwrap();
        assert!(setting.enabled);
        assert_eq!(setting.percentage, Some(25));
    }

    #[test]
    fn clear_removes_the_entry() {
        let store = InMemoryFlagStore::new();
        store.set("new_ui", "tenant-a", FlagSetting::on());
        store.clear("new_ui", "tenant-a");
        assert!(store.get("new_ui", "tenant-a").is_none());
    }

    #[test]
    fn sqlite_store_persists_and_lists_flags() {
        let store = SqliteFlagStore::open(":memory:").unwrap();
        store.set("new_ui", "tenant-a", FlagSetting::rollout(10));
        store.set("new_ui", "tenant-b", FlagSetting::on());
        assert_eq!(store.get("new_ui", "tenant-a").unwrap().percentage, Some(10));
        assert_eq!(store.list("new_ui").len(), 2);
        store.clear("new_ui", "tenant-a");
        assert!(store.get("new_ui", "tenant-a").is_none());
    }
}
