//! Priority task queue: five fixed lanes, delayed-task promotion, a
//! processing set for stale-task reclamation, and a dead-letter list for
//! exhausted retries.
//!
//! All mutable state lives behind one mutex. Callers never see the internal
//! lanes/delayed/processing/dead_letter collections directly — every
//! mutation goes through a `TaskQueue` method, so the queue's invariants
//! (no task visible in two lanes at once, dead-lettered tasks never
//! re-enqueued) hold regardless of how many workers call in concurrently.

mod error;
mod store;
mod task;

pub use error::QueueError;
pub use store::{InMemoryTaskStore, SqliteTaskStore, TaskStore};
pub use task::{Task, TaskPriority, TaskStatus};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

struct Delayed {
    task_id: Uuid,
    scheduled_at: DateTime<Utc>,
}

struct State {
    lanes: HashMap<TaskPriority, VecDeque<Uuid>>,
    delayed: Vec<Delayed>,
    processing: HashMap<Uuid, ProcessingEntry>,
    dead_letter: Vec<Uuid>,
    tasks: HashMap<Uuid, Task>,
}

struct ProcessingEntry {
    worker_id: String,
    started_at: DateTime<Utc>,
}

/// Point-in-time counts for each lane plus the delayed/processing/dead-letter
/// sets, for health and metrics surfaces.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub lane_depths: HashMap<TaskPriority, usize>,
    pub delayed: usize,
    pub processing: usize,
    pub dead_letter: usize,
}

/// The task queue. Cheaply cloneable: internally an `Arc` over a mutex.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Mutex<State>>,
    store: Arc<dyn TaskStore>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        let mut lanes = HashMap::new();
        for p in TaskPriority::ALL_HIGHEST_FIRST {
            lanes.insert(p, VecDeque::new());
        }
        Self {
            inner: Arc::new(Mutex::new(State {
                lanes,
                delayed: Vec::new(),
                processing: HashMap::new(),
                dead_letter: Vec::new(),
                tasks: HashMap::new(),
            })),
            store,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryTaskStore::new()))
    }

    /// Admit a task. Due tasks (no `scheduled_at`, or one in the past) land
    /// directly in their priority lane; future-scheduled tasks go into the
    /// delayed set and are promoted by [`Self::dequeue`]'s sweep.
    pub fn enqueue(&self, task: Task) -> Result<Uuid, QueueError> {
        let id = task.id;
        self.store
            .persist(&task)
            .map_err(|e| QueueError::StoreDegraded(e.to_string()))
            .or_else(|e| {
                tracing::warn!(error = %e, "persist failed, task remains queryable in-process only");
                Ok::<(), QueueError>(())
            })?;

        let mut state = self.inner.lock().unwrap();
        let due = task.is_due(Utc::now());
        let priority = task.priority;
        let scheduled_at = task.scheduled_at;
        state.tasks.insert(id, task);

        if due {
            state.lanes.get_mut(&priority).unwrap().push_back(id);
        } else {
            state.delayed.push(Delayed {
                task_id: id,
                scheduled_at: scheduled_at.unwrap(),
            });
        }
        Ok(id)
    }

    fn promote_due_delayed(state: &mut State, now: DateTime<Utc>) {
        let mut i = 0;
        while i < state.delayed.len() {
            if state.delayed[i].scheduled_at <= now {
                let entry = state.delayed.remove(i);
                if let Some(task) = state.tasks.get(&entry.task_id) {
                    let priority = task.priority;
                    state.lanes.get_mut(&priority).unwrap().push_back(entry.task_id);
                }
            } else {
                i += 1;
            }
        }
    }

    /// Pull the next due task of one of `allowed_types` (or any type, if
    /// empty), highest-priority lane first, marking it `Assigned` and
    /// recording it in the processing set under `worker_id`. The worker
    /// transitions the task to `Running` itself via [`Self::mark_running`]
    /// once it actually begins executing it.
    pub fn dequeue(&self, worker_id: &str, allowed_types: &[String]) -> Result<Option<Task>, QueueError> {
        let mut state = self.inner.lock().unwrap();
        Self::promote_due_delayed(&mut state, Utc::now());

        for priority in TaskPriority::ALL_HIGHEST_FIRST {
            let lane = state.lanes.get(&priority).unwrap();
            let pos = lane.iter().position(|id| {
                allowed_types.is_empty()
                    || state
                        .tasks
                        .get(id)
                        .map(|t| allowed_types.iter().any(|at| at == &t.task_type))
                        .unwrap_or(false)
            });
            if let Some(pos) = pos {
                let id = state.lanes.get_mut(&priority).unwrap().remove(pos).unwrap();
                let now = Utc::now();
                let task = {
                    let t = state.tasks.get_mut(&id).unwrap();
                    t.status = TaskStatus::Assigned;
                    t.worker_id = Some(worker_id.to_string());
                    t.assigned_at = Some(now);
                    t.clone()
                };
                state.processing.insert(
                    id,
                    ProcessingEntry {
                        worker_id: worker_id.to_string(),
                        started_at: now,
                    },
                );
                drop(state);
                let _ = self.store.persist(&task);
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Transition an assigned task to `Running` and stamp `started_at`. Called
    /// by the worker right before it invokes the task's handler.
    pub fn mark_running(&self, id: Uuid) -> Result<(), QueueError> {
        let mut state = self.inner.lock().unwrap();
        let task = state.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if task.status.is_terminal() {
            return Err(QueueError::TerminalState(id));
        }
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        let task = task.clone();
        drop(state);
        let _ = self.store.persist(&task);
        Ok(())
    }

    /// Mark a task complete and remove it from the processing set.
    pub fn complete(&self, id: Uuid, result: Option<serde_json::Value>) -> Result<(), QueueError> {
        let mut state = self.inner.lock().unwrap();
        let task = state.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if task.status.is_terminal() {
            return Err(QueueError::TerminalState(id));
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.result = result;
        let snapshot = task.clone();
        state.processing.remove(&id);
        drop(state);
        let _ = self.store.persist(&snapshot);
        Ok(())
    }

    /// Record a failure. If retries remain, re-enqueues with `retry_count`
    /// incremented; otherwise moves the task to the dead-letter list.
    pub fn fail(&self, id: Uuid, error: impl Into<String>) -> Result<TaskStatus, QueueError> {
        let mut state = self.inner.lock().unwrap();
        state.processing.remove(&id);
        let task = state.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if task.status.is_terminal() {
            return Err(QueueError::TerminalState(id));
        }
        task.last_error = Some(error.into());

        let final_status = if task.retry_count < task.max_retries {
            task.retry_count += 1;
            task.status = TaskStatus::Retrying;
            let retry_delay = chrono::Duration::seconds(task.retry_delay_seconds as i64);
            task.scheduled_at = Some(Utc::now() + retry_delay);
            task.status = TaskStatus::Pending;
            let priority = task.priority;
            let scheduled_at = task.scheduled_at.unwrap();
            state.delayed.push(Delayed {
                task_id: id,
                scheduled_at,
            });
            let _ = priority;
            TaskStatus::Pending
        } else {
            task.status = TaskStatus::Dead;
            state.dead_letter.push(id);
            TaskStatus::Dead
        };

        let snapshot = state.tasks.get(&id).unwrap().clone();
        drop(state);
        let _ = self.store.persist(&snapshot);
        Ok(final_status)
    }

    /// Cancel a task, if it is not already in a terminal state.
    pub fn cancel(&self, id: Uuid) -> Result<(), QueueError> {
        let mut state = self.inner.lock().unwrap();
        let task = state.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if task.status.is_terminal() {
            return Err(QueueError::TerminalState(id));
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        let snapshot = task.clone();

        for priority in TaskPriority::ALL_HIGHEST_FIRST {
            let lane = state.lanes.get_mut(&priority).unwrap();
            lane.retain(|lid| *lid != id);
        }
        state.delayed.retain(|d| d.task_id != id);
        state.processing.remove(&id);
        drop(state);
        let _ = self.store.persist(&snapshot);
        Ok(())
    }

    pub fn get_task(&self, id: Uuid) -> Option<Task> {
        self.inner.lock().unwrap().tasks.get(&id).cloned()
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        let state = self.inner.lock().unwrap();
        let lane_depths = state
            .lanes
            .iter()
            .map(|(p, lane)| (*p, lane.len()))
            .collect();
        QueueStats {
            lane_depths,
            delayed: state.delayed.len(),
            processing: state.processing.len(),
            dead_letter: state.dead_letter.len(),
        }
    }

    /// Reclaim tasks that have been in the processing set longer than
    /// `max_age` — e.g. a worker crashed mid-task — re-enqueuing them as if
    /// from [`Self::fail`].
    pub fn cleanup_stale_tasks(&self, max_age: chrono::Duration) -> Result<Vec<Uuid>, QueueError> {
        let now = Utc::now();
        let stale: Vec<Uuid> = {
            let state = self.inner.lock().unwrap();
            state
                .processing
                .iter()
                .filter(|(_, entry)| now - entry.started_at > max_age)
                .map(|(id, _)| *id)
                .collect()
        };

        let mut reclaimed = Vec::new();
        for id in stale {
            match self.fail(id, "stale: worker heartbeat lost") {
                Ok(_) => reclaimed.push(id),
                Err(QueueError::TerminalState(_)) | Err(QueueError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(priority: TaskPriority) -> Task {
        Task::new("probe", json!({}), "tenant-a").with_priority(priority)
    }

    #[test]
    fn dequeue_serves_highest_priority_lane_first() {
        let q = TaskQueue::in_memory();
        q.enqueue(task(TaskPriority::Low)).unwrap();
        q.enqueue(task(TaskPriority::Critical)).unwrap();
        q.enqueue(task(TaskPriority::Normal)).unwrap();

        let t1 = q.dequeue("w1", &[]).unwrap().unwrap();
        assert_eq!(t1.priority, TaskPriority::Critical);
        assert_eq!(t1.status, TaskStatus::Assigned);
        let t2 = q.dequeue("w1", &[]).unwrap().unwrap();
        assert_eq!(t2.priority, TaskPriority::Normal);
        let t3 = q.dequeue("w1", &[]).unwrap().unwrap();
        assert_eq!(t3.priority, TaskPriority::Low);
    }

    #[test]
    fn mark_running_transitions_an_assigned_task_and_stamps_started_at() {
        let q = TaskQueue::in_memory();
        let id = q.enqueue(task(TaskPriority::Normal)).unwrap();
        let assigned = q.dequeue("w1", &[]).unwrap().unwrap();
        assert_eq!(assigned.status, TaskStatus::Assigned);
        assert!(assigned.started_at.is_none());

        q.mark_running(id).unwrap();
        let running = q.get_task(id).unwrap();
        assert_eq!(running.status, TaskStatus::Running);
        assert!(running.started_at.is_some());
    }

    #[test]
    fn delayed_task_is_not_dequeued_until_due() {
        let q = TaskQueue::in_memory();
        let future = Utc::now() + chrono::Duration::hours(1);
        let t = task(TaskPriority::Critical).with_scheduled_at(future);
        q.enqueue(t).unwrap();
        assert!(q.dequeue("w1", &[]).unwrap().is_none());
    }

    #[test]
    fn fail_beyond_max_retries_moves_task_to_dead_letter() {
        let q = TaskQueue::in_memory();
        let mut t = task(TaskPriority::Normal);
        t.max_retries = 0;
        let id = q.enqueue(t).unwrap();
        let picked = q.dequeue("w1", &[]).unwrap().unwrap();
        assert_eq!(picked.id, id);

        let status = q.fail(id, "boom").unwrap();
        assert_eq!(status, TaskStatus::Dead);
        assert_eq!(q.get_queue_stats().dead_letter, 1);
    }

    #[test]
    fn fail_with_retries_remaining_requeues_as_delayed() {
        let q = TaskQueue::in_memory();
        let mut t = task(TaskPriority::Normal);
        t.retry_delay_seconds = 0;
        let id = q.enqueue(t).unwrap();
        q.dequeue("w1", &[]).unwrap();
        let status = q.fail(id, "transient").unwrap();
        assert_eq!(status, TaskStatus::Pending);
        let requeued = q.dequeue("w1", &[]).unwrap().unwrap();
        assert_eq!(requeued.id, id);
        assert_eq!(requeued.retry_count, 1);
    }

    #[test]
    fn cancel_removes_pending_task_from_its_lane() {
        let q = TaskQueue::in_memory();
        let id = q.enqueue(task(TaskPriority::High)).unwrap();
        q.cancel(id).unwrap();
        assert!(q.dequeue("w1", &[]).unwrap().is_none());
        assert_eq!(q.get_task(id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn cancel_on_terminal_task_is_rejected() {
        let q = TaskQueue::in_memory();
        let id = q.enqueue(task(TaskPriority::High)).unwrap();
        q.dequeue("w1", &[]).unwrap();
        q.complete(id, None).unwrap();
        assert!(matches!(q.cancel(id), Err(QueueError::TerminalState(_))));
    }

    #[test]
    fn cleanup_stale_tasks_reclaims_abandoned_processing_entries() {
        let q = TaskQueue::in_memory();
        let mut t = task(TaskPriority::Normal);
        t.retry_delay_seconds = 0;
        let id = q.enqueue(t).unwrap();
        q.dequeue("w1", &[]).unwrap();

        let reclaimed = q.cleanup_stale_tasks(chrono::Duration::seconds(-1)).unwrap();
        assert_eq!(reclaimed, vec![id]);
        assert_eq!(q.get_queue_stats().processing, 0);
    }

    #[test]
    fn dequeue_filters_by_allowed_task_types() {
        let q = TaskQueue::in_memory();
        q.enqueue(Task::new("alpha", json!({}), "t")).unwrap();
        let beta_id = q.enqueue(Task::new("beta", json!({}), "t")).unwrap();

        let picked = q
            .dequeue("w1", &["beta".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, beta_id);
    }
}
