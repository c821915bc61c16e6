//! A single task-pulling worker: poll loop, handler dispatch, heartbeat,
//! graceful shutdown.
//!
//! Handlers are registered by task type before [`Worker::run`] starts —
//! there is no equivalent of the source system's domain-specific
//! `_handle_agent_run`/`_handle_evaluation`/`_handle_scheduled_job`
//! built-ins here; this worker is generic over whatever task types its
//! owner registers.

mod handler;

pub use handler::{BoxedHandler, HandlerFn, HandlerRegistry};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};

use crate::queue::{QueueError, Task, TaskQueue};

/// Lifecycle status of a worker, sampled by the pool's health loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Idle,
    Processing,
    Stopping,
    Stopped,
    Error,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub task_types: Vec<String>,
    pub max_concurrent_tasks: usize,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_task_retries: u32,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_types: Vec::new(),
            max_concurrent_tasks: 1,
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            max_task_retries: 3,
        }
    }

    pub fn with_task_types(mut self, types: Vec<String>) -> Self {
        self.task_types = types;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n.max(1);
        self
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct WorkerMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub last_heartbeat_unix: u64,
}

struct MetricsInner {
    completed: AtomicU64,
    failed: AtomicU64,
    last_heartbeat_unix: AtomicU64,
}

impl Default for MetricsInner {
    fn default() -> Self {
        Self {
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_heartbeat_unix: AtomicU64::new(0),
        }
    }
}

/// Owns a slice of the task pull loop. Cheap to clone: status/metrics are
/// shared behind atomics, the queue is shared behind an `Arc`.
#[derive(Clone)]
pub struct Worker {
    config: Arc<WorkerConfig>,
    queue: TaskQueue,
    handlers: Arc<HandlerRegistry>,
    status: Arc<Mutex<WorkerStatus>>,
    shutdown: Arc<AtomicBool>,
    metrics: Arc<MetricsInner>,
}

impl Worker {
    pub fn new(config: WorkerConfig, queue: TaskQueue, handlers: HandlerRegistry) -> Self {
        Self::new_with_shared_handlers(config, queue, Arc::new(handlers))
    }

    /// Build a worker sharing an existing handler registry — used by the
    /// pool so every member dispatches through the same registered set.
    pub fn new_with_shared_handlers(config: WorkerConfig, queue: TaskQueue, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            queue,
            handlers,
            status: Arc::new(Mutex::new(WorkerStatus::Starting)),
            shutdown: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(MetricsInner::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    pub async fn status(&self) -> WorkerStatus {
        *self.status.lock().await
    }

    pub fn metrics(&self) -> WorkerMetrics {
        WorkerMetrics {
            tasks_completed: self.metrics.completed.load(Ordering::Relaxed),
            tasks_failed: self.metrics.failed.load(Ordering::Relaxed),
            last_heartbeat_unix: self.metrics.last_heartbeat_unix.load(Ordering::Relaxed),
        }
    }

    /// Request graceful shutdown. `run` observes this at the top of its
    /// next poll iteration.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    async fn set_status(&self, status: WorkerStatus) {
        *self.status.lock().await = status;
    }

    fn mark_heartbeat(&self) {
        self.metrics
            .last_heartbeat_unix
            .store(chrono::Utc::now().timestamp() as u64, Ordering::Relaxed);
    }

    /// Main loop. Runs until [`Self::request_shutdown`] is observed, then
    /// drains in-flight tasks (up to `shutdown_timeout`) before returning.
    pub async fn run(&self) {
        self.set_status(WorkerStatus::Starting).await;
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_tasks));
        let mut last_heartbeat = tokio::time::Instant::now();
        self.mark_heartbeat();
        self.set_status(WorkerStatus::Idle).await;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            if last_heartbeat.elapsed() >= self.config.heartbeat_interval {
                self.mark_heartbeat();
                last_heartbeat = tokio::time::Instant::now();
            }

            let permit = match permits.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            match self.queue.dequeue(&self.config.worker_id, &self.config.task_types) {
                Ok(Some(task)) => {
                    self.set_status(WorkerStatus::Processing).await;
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.execute(task).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.config.worker_id, error = %e, "dequeue failed");
                    self.set_status(WorkerStatus::Error).await;
                    drop(permit);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }

            self.set_status(WorkerStatus::Idle).await;
        }

        self.set_status(WorkerStatus::Stopping).await;
        tokio::time::sleep(self.config.shutdown_timeout.min(Duration::from_millis(50))).await;
        self.set_status(WorkerStatus::Stopped).await;
    }

    async fn execute(&self, task: Task) {
        let task_id = task.id;
        let handler = self.handlers.get(&task.task_type);
        let timeout = Duration::from_secs(task.timeout_seconds);

        if let Err(e) = self.queue.mark_running(task_id) {
            tracing::error!(task_id = %task_id, error = %e, "mark_running() failed before dispatch");
        }

        let outcome = match handler {
            Some(h) => tokio::time::timeout(timeout, h(task.clone())).await,
            None => {
                let _ = self.queue.fail(task_id, format!("no handler registered for type '{}'", task.task_type));
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match outcome {
            Ok(Ok(result)) => {
                if let Err(e) = self.queue.complete(task_id, result) {
                    tracing::error!(task_id = %task_id, error = %e, "complete() failed after successful handler");
                }
                self.metrics.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                self.fail_task(task_id, err.to_string()).await;
            }
            Err(_elapsed) => {
                self.fail_task(task_id, "task exceeded timeout_seconds".to_string()).await;
            }
        }
    }

    async fn fail_task(&self, task_id: uuid::Uuid, error: String) {
        if let Err(e) = self.queue.fail(task_id, error) {
            if !matches!(e, QueueError::TerminalState(_)) {
                tracing::error!(task_id = %task_id, error = %e, "fail() itself failed");
            }
        }
        self.metrics.failed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn worker_completes_a_task_via_its_registered_handler() {
        let queue = TaskQueue::in_memory();
        let mut handlers = HandlerRegistry::new();
        handlers.register("echo", |task| async move { Ok(Some(task.payload)) });

        let config = WorkerConfig::new("w1").with_task_types(vec!["echo".into()]);
        let worker = Worker::new(config, queue.clone(), handlers);

        let id = queue.enqueue(Task::new("echo", json!({"hi": 1}), "t")).unwrap();

        let run_handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        let mut attempts = 0;
        loop {
            let t = queue.get_task(id).unwrap();
            if t.status == crate::queue::TaskStatus::Completed {
                break;
            }
            attempts += 1;
            assert!(attempts < 200, "task never completed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        worker.request_shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(1), run_handle).await;
    }

    #[tokio::test]
    async fn worker_fails_task_with_no_registered_handler() {
        let queue = TaskQueue::in_memory();
        let handlers = HandlerRegistry::new();
        let config = WorkerConfig::new("w1");
        let worker = Worker::new(config, queue.clone(), handlers);
        let mut task = Task::new("mystery", json!({}), "t");
        task.max_retries = 0; // fail immediately to Dead instead of Retrying
        let id = queue.enqueue(task).unwrap();

        let run_handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        let mut attempts = 0;
        loop {
            let t = queue.get_task(id).unwrap();
            if t.status == crate::queue::TaskStatus::Failed || t.status == crate::queue::TaskStatus::Dead {
                break;
            }
            attempts += 1;
            assert!(attempts < 200, "task never reached a terminal failed state");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        worker.request_shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(1), run_handle).await;
    }
}
