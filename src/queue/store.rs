//! Pluggable backing store for task records.
//!
//! The persisted-state contract calls for a durable, cross-worker-visible
//! store keyed by task id (the source system's `REDIS_URL`). This crate's
//! ambient persistence stack is `rusqlite` rather than a Redis client, so
//! [`SqliteTaskStore`] fills that role; [`InMemoryTaskStore`] is the
//! in-process fallback used when no store URL is configured, with the loss
//! of durability and cross-worker visibility logged at construction time.

use std::sync::Mutex;

use dashmap::DashMap;
use uuid::Uuid;

use super::error::QueueError;
use super::task::Task;

/// Durable or in-process storage for full task records, keyed by id.
///
/// Operations are idempotent: persisting the same task id twice overwrites
/// rather than duplicates.
pub trait TaskStore: Send + Sync {
    fn persist(&self, task: &Task) -> Result<(), QueueError>;
    fn load(&self, id: Uuid) -> Result<Option<Task>, QueueError>;
    fn all_ids(&self) -> Result<Vec<Uuid>, QueueError>;
}

/// Process-local store. Durable for the lifetime of the process only.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<Uuid, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        tracing::warn!("task queue running with in-memory store: no cross-process durability");
        Self::default()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn persist(&self, task: &Task) -> Result<(), QueueError> {
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<Option<Task>, QueueError> {
        Ok(self.tasks.get(&id).map(|r| r.value().clone()))
    }

    fn all_ids(&self) -> Result<Vec<Uuid>, QueueError> {
        Ok(self.tasks.iter().map(|r| *r.key()).collect())
    }
}

/// SQLite-backed store: one row per task, payload/result/metadata stored as
/// JSON text columns.
pub struct SqliteTaskStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteTaskStore {
    pub fn open(path: &str) -> Result<Self, QueueError> {
        let conn = rusqlite::Connection::open(path).map_err(|e| QueueError::Store(e.to_string()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                priority INTEGER NOT NULL,
                json TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| QueueError::Store(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, QueueError> {
        Self::open(":memory:")
    }
}

impl TaskStore for SqliteTaskStore {
    fn persist(&self, task: &Task) -> Result<(), QueueError> {
        let json = serde_json::to_string(task).map_err(|e| QueueError::Store(e.to_string()))?;
        let status = format!("{:?}", task.status);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (id, status, tenant_id, priority, json) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET status=excluded.status, json=excluded.json",
            rusqlite::params![
                task.id.to_string(),
                status,
                task.tenant_id,
                task.priority as i64,
                json
            ],
        )
        .map_err(|e| QueueError::Store(e.to_string()))?;
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<Option<Task>, QueueError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT json FROM tasks WHERE id = ?1")
            .map_err(|e| QueueError::Store(e.to_string()))?;
        let mut rows = stmt
            .query(rusqlite::params![id.to_string()])
            .map_err(|e| QueueError::Store(e.to_string()))?;
        if let Some(row) = rows.next().map_err(|e| QueueError::Store(e.to_string()))? {
            let json: String = row.get(0).map_err(|e| QueueError::Store(e.to_string()))?;
            let task: Task = serde_json::from_str(&json).map_err(|e| QueueError::Store(e.to_string()))?;
            Ok(Some(task))
        } else {
            Ok(None)
        }
    }

    fn all_ids(&self) -> Result<Vec<Uuid>, QueueError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id FROM tasks")
            .map_err(|e| QueueError::Store(e.to_string()))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| QueueError::Store(e.to_string()))?
            .filter_map(|r| r.ok())
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::task::Task;
    use serde_json::json;

    #[test]
    fn sqlite_store_roundtrips_a_task() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let task = Task::new("probe", json!({"x": 1}), "tenant-a");
        let id = task.id;
        store.persist(&task).unwrap();
        let loaded = store.load(id).unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.task_type, "probe");
    }
}
