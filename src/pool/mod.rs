//! Worker Pool: owns N [`Worker`](crate::worker::Worker)s under a single
//! mutex over pool membership, with health monitoring and optional
//! autoscaling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::queue::TaskQueue;
use crate::worker::{HandlerRegistry, Worker, WorkerConfig, WorkerStatus};

/// How the pool decides its worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingPolicy {
    /// Always exactly `initial_workers`.
    Fixed,
    /// Only `scale_to` moves the count; the autoscale loop does not run.
    Manual,
    /// The autoscale loop adjusts the count between `min_workers` and
    /// `max_workers` based on queue depth.
    Auto,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub policy: ScalingPolicy,
    pub initial_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub scale_up_threshold: usize,
    pub scale_down_threshold: usize,
    pub cooldown_up: Duration,
    pub cooldown_down: Duration,
    pub autoscale_interval: Duration,
    pub health_check_interval: Duration,
    pub unhealthy_threshold: u32,
    pub metrics_interval: Duration,
    pub metrics_ring_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            policy: ScalingPolicy::Fixed,
            initial_workers: 1,
            min_workers: 1,
            max_workers: 8,
            scale_up_threshold: 50,
            scale_down_threshold: 5,
            cooldown_up: Duration::from_secs(60),
            cooldown_down: Duration::from_secs(120),
            autoscale_interval: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            unhealthy_threshold: 3,
            metrics_interval: Duration::from_secs(60),
            metrics_ring_capacity: 120,
        }
    }
}

struct Member {
    worker: Worker,
    handle: JoinHandle<()>,
    consecutive_errors: u32,
}

/// A bounded FIFO retained for metrics history.
pub struct MetricsRing<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> MetricsRing<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::new(),
        }
    }

    fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn snapshot(&self) -> Vec<&T> {
        self.items.iter().collect()
    }
}

pub struct WorkerPool {
    config: PoolConfig,
    base_worker_config: WorkerConfig,
    handlers: Arc<HandlerRegistry>,
    queue: TaskQueue,
    members: Arc<Mutex<Vec<Member>>>,
    last_scale_up: Arc<Mutex<Instant>>,
    last_scale_down: Arc<Mutex<Instant>>,
    next_worker_seq: Arc<std::sync::atomic::AtomicU64>,
    metrics_history: Arc<Mutex<MetricsRing<crate::worker::WorkerMetrics>>>,
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        base_worker_config: WorkerConfig,
        handlers: HandlerRegistry,
        queue: TaskQueue,
    ) -> Self {
        let ring_capacity = config.metrics_ring_capacity;
        Self {
            config,
            base_worker_config,
            handlers: Arc::new(handlers),
            queue,
            members: Arc::new(Mutex::new(Vec::new())),
            last_scale_up: Arc::new(Mutex::new(Instant::now() - Duration::from_secs(86400))),
            last_scale_down: Arc::new(Mutex::new(Instant::now() - Duration::from_secs(86400))),
            next_worker_seq: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            metrics_history: Arc::new(Mutex::new(MetricsRing::new(ring_capacity))),
        }
    }

    fn next_id(&self) -> String {
        let n = self.next_worker_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("{}-{n}", self.base_worker_config.worker_id)
    }

    async fn spawn_worker(&self) {
        let mut cfg = self.base_worker_config.clone();
        cfg.worker_id = self.next_id();
        let worker = Worker::new_with_shared_handlers(cfg, self.queue.clone(), Arc::clone(&self.handlers));
        let handle = {
            let w = worker.clone();
            tokio::spawn(async move { w.run().await })
        };
        self.members.lock().await.push(Member {
            worker,
            handle,
            consecutive_errors: 0,
        });
    }

    /// Bring the pool up to `initial_workers` and, if AUTO, start the
    /// autoscale and health background loops.
    pub async fn start(self: &Arc<Self>) {
        for _ in 0..self.config.initial_workers {
            self.spawn_worker().await;
        }

        if self.config.policy == ScalingPolicy::Auto {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.autoscale_loop().await });
        }

        let this = Arc::clone(self);
        tokio::spawn(async move { this.health_loop().await });
    }

    pub async fn worker_count(&self) -> usize {
        self.members.lock().await.len()
    }

    /// MANUAL policy entry point: set the worker count directly.
    pub async fn scale_to(&self, target: usize) {
        let current = self.worker_count().await;
        if target > current {
            for _ in 0..(target - current) {
                self.spawn_worker().await;
            }
        } else if target < current {
            for _ in 0..(current - target) {
                self.remove_one_idle_or_any().await;
            }
        }
    }

    async fn remove_one_idle_or_any(&self) {
        let mut members = self.members.lock().await;
        if members.is_empty() {
            return;
        }
        let mut idle_idx = None;
        for (i, m) in members.iter().enumerate() {
            if m.worker.status().await == WorkerStatus::Idle {
                idle_idx = Some(i);
                break;
            }
        }
        let idx = idle_idx.unwrap_or(0);
        let removed = members.remove(idx);
        removed.worker.request_shutdown();
        removed.handle.abort();
    }

    async fn autoscale_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.autoscale_interval).await;
            let stats = self.queue.get_queue_stats();
            let pending_depth: usize = stats.lane_depths.values().sum::<usize>() + stats.delayed;
            let current = self.worker_count().await;

            if pending_depth > self.config.scale_up_threshold
                && current < self.config.max_workers
                && self.last_scale_up.lock().await.elapsed() >= self.config.cooldown_up
            {
                self.spawn_worker().await;
                *self.last_scale_up.lock().await = Instant::now();
                tracing::info!(pending_depth, current = current + 1, "autoscale: scaled up");
            } else if pending_depth < self.config.scale_down_threshold
                && current > self.config.min_workers
                && self.last_scale_down.lock().await.elapsed() >= self.config.cooldown_down
            {
                self.remove_one_idle_or_any().await;
                *self.last_scale_down.lock().await = Instant::now();
                tracing::info!(pending_depth, current = current.saturating_sub(1), "autoscale: scaled down");
            }
        }
    }

    async fn health_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.health_check_interval).await;

            let to_replace: Vec<usize> = {
                let mut members = self.members.lock().await;
                let mut replace = Vec::new();
                for (i, m) in members.iter_mut().enumerate() {
                    if m.worker.status().await == WorkerStatus::Error {
                        m.consecutive_errors += 1;
                    } else {
                        m.consecutive_errors = 0;
                    }
                    if m.consecutive_errors >= self.config.unhealthy_threshold {
                        replace.push(i);
                    }
                }
                replace
            };

            for idx in to_replace.into_iter().rev() {
                let mut members = self.members.lock().await;
                if idx < members.len() {
                    let removed = members.remove(idx);
                    drop(members);
                    tracing::warn!(worker_id = removed.worker.id(), "replacing unhealthy worker");
                    removed.worker.request_shutdown();
                    removed.handle.abort();
                    self.spawn_worker().await;
                }
            }

            let mut snapshot_metrics = Vec::new();
            for m in self.members.lock().await.iter() {
                snapshot_metrics.push(m.worker.metrics());
            }
            let mut history = self.metrics_history.lock().await;
            for m in snapshot_metrics {
                history.push(m);
            }
        }
    }

    /// Stop every worker, waiting up to each worker's configured shutdown
    /// timeout for in-flight tasks to drain.
    pub async fn shutdown(&self) {
        let members = {
            let mut guard = self.members.lock().await;
            std::mem::take(&mut *guard)
        };
        for m in &members {
            m.worker.request_shutdown();
        }
        for m in members {
            let _ = tokio::time::timeout(Duration::from_secs(5), m.handle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_starts_configured_number_of_workers() {
        let queue = TaskQueue::in_memory();
        let mut config = PoolConfig::default();
        config.initial_workers = 3;
        config.policy = ScalingPolicy::Fixed;
        let worker_config = WorkerConfig::new("pool-w");
        let pool = Arc::new(WorkerPool::new(config, worker_config, HandlerRegistry::new(), queue));
        pool.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.worker_count().await, 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn manual_scale_to_adjusts_worker_count() {
        let queue = TaskQueue::in_memory();
        let mut config = PoolConfig::default();
        config.initial_workers = 1;
        config.policy = ScalingPolicy::Manual;
        let worker_config = WorkerConfig::new("pool-w");
        let pool = Arc::new(WorkerPool::new(config, worker_config, HandlerRegistry::new(), queue));
        pool.start().await;
        pool.scale_to(4).await;
        assert_eq!(pool.worker_count().await, 4);
        pool.scale_to(2).await;
        assert_eq!(pool.worker_count().await, 2);
        pool.shutdown().await;
    }
}
