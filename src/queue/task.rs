//! The `Task` data model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority lane a task is dispatched into. Lower numeric value is served
/// first; the five lanes map 1:1 onto named priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical = 1,
    High = 2,
    Normal = 5,
    Low = 8,
    Background = 10,
}

impl TaskPriority {
    /// All priorities, highest-to-lowest — the order lanes are drained in.
    pub const ALL_HIGHEST_FIRST: [TaskPriority; 5] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
        TaskPriority::Background,
    ];
}

/// Lifecycle status of a task. Transitions are monotonic except the single
/// `Retrying -> Pending`-style re-entry (modeled here as `Retrying` being a
/// transient marker immediately followed by re-insertion as `Pending`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Retrying,
    Dead,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Dead | TaskStatus::Cancelled
        )
    }
}

/// A unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub tenant_id: String,
    pub agent_id: Option<String>,
    pub priority: TaskPriority,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub worker_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_count: u32,
    pub retry_delay_seconds: u64,

    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Task {
    /// Build a new pending task with spec-default timeout/retry policy.
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value, tenant_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            payload,
            tenant_id: tenant_id.into(),
            agent_id: None,
            priority: TaskPriority::Normal,
            scheduled_at: None,
            status: TaskStatus::Pending,
            worker_id: None,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            timeout_seconds: 300,
            max_retries: 3,
            retry_count: 0,
            retry_delay_seconds: 30,
            last_error: None,
            result: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map(|at| at <= now).unwrap_or(true)
    }
}
