//! Scheduled jobs: ONCE/INTERVAL/DAILY/HOURLY/CRON/WEBHOOK/EVENT, each
//! re-entering the system through the same [`TaskQueue`] that ordinary
//! producers use.

mod cron;

pub use cron::{CronError, CronSchedule};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::queue::{Task, TaskPriority, TaskQueue};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    Once { run_at: DateTime<Utc> },
    Interval { seconds: u64, max_runs: Option<u32> },
    Daily { hour: u32, minute: u32 },
    Hourly { minute: u32 },
    Cron { expression: String },
    Webhook,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub name: String,
    pub schedule: Schedule,
    pub task_type: String,
    pub payload_template: serde_json::Value,
    pub variables: HashMap<String, String>,
    pub priority: TaskPriority,
    pub target_system: Option<String>,
    pub action_type: Option<String>,
    pub status: JobStatus,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_result: Option<serde_json::Value>,
    pub run_count: u32,
}

impl ScheduledJob {
    pub fn new(name: impl Into<String>, schedule: Schedule, task_type: impl Into<String>, payload_template: serde_json::Value) -> Self {
        let mut job = Self {
            id: Uuid::new_v4(),
            name: name.into(),
            schedule,
            task_type: task_type.into(),
            payload_template,
            variables: HashMap::new(),
            priority: TaskPriority::Normal,
            target_system: None,
            action_type: None,
            status: JobStatus::Pending,
            enabled: true,
            next_run_at: None,
            last_run_at: None,
            last_run_result: None,
            run_count: 0,
        };
        job.recompute_next_run(Utc::now());
        job
    }

    /// Recompute `next_run_at` from the schedule kind, relative to `now`.
    /// WEBHOOK/EVENT jobs never get a scheduled time.
    pub fn recompute_next_run(&mut self, now: DateTime<Utc>) {
        match &self.schedule {
            Schedule::Once { run_at } => {
                if *run_at > now {
                    self.next_run_at = Some(*run_at);
                    self.status = JobStatus::Scheduled;
                } else {
                    self.next_run_at = None;
                    self.enabled = false;
                    self.status = JobStatus::Completed;
                }
            }
            Schedule::Interval { seconds, max_runs } => {
                if max_runs.map(|m| self.run_count >= m).unwrap_or(false) {
                    self.next_run_at = None;
                    self.enabled = false;
                    self.status = JobStatus::Completed;
                } else {
                    self.next_run_at = Some(now + Duration::seconds(*seconds as i64));
                    self.status = JobStatus::Scheduled;
                }
            }
            Schedule::Daily { hour, minute } => {
                self.next_run_at = Some(next_daily_like(now, *hour, *minute, None));
                self.status = JobStatus::Scheduled;
            }
            Schedule::Hourly { minute } => {
                self.next_run_at = Some(next_hourly(now, *minute));
                self.status = JobStatus::Scheduled;
            }
            Schedule::Cron { expression } => {
                match CronSchedule::parse(expression) {
                    Ok(cron) => {
                        self.next_run_at = cron.next_run(now);
                        self.status = JobStatus::Scheduled;
                    }
                    Err(e) => {
                        tracing::error!(job = %self.name, error = %e, "invalid cron expression");
                        self.next_run_at = None;
                        self.enabled = false;
                        self.status = JobStatus::Failed;
                    }
                }
            }
            Schedule::Webhook | Schedule::Event => {
                self.next_run_at = None;
                self.status = JobStatus::Scheduled;
            }
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.status == JobStatus::Scheduled
            && self.next_run_at.map(|t| t <= now).unwrap_or(false)
    }

    fn render_payload(&self, now: DateTime<Utc>) -> serde_json::Value {
        let mut rendered = self.payload_template.clone();
        let mut ctx = self.variables.clone();
        ctx.insert("now".to_string(), now.to_rfc3339());
        ctx.insert("date".to_string(), now.format("%Y-%m-%d").to_string());
        ctx.insert("time".to_string(), now.format("%H:%M:%S").to_string());
        ctx.insert("job_id".to_string(), self.id.to_string());
        ctx.insert("job_name".to_string(), self.name.clone());
        render_placeholders(&mut rendered, &ctx);
        rendered
    }
}

fn render_placeholders(value: &mut serde_json::Value, ctx: &HashMap<String, String>) {
    match value {
        serde_json::Value::String(s) => {
            for (k, v) in ctx {
                let needle = format!("{{{k}}}");
                if s.contains(&needle) {
                    *s = s.replace(&needle, v);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                render_placeholders(item, ctx);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                render_placeholders(v, ctx);
            }
        }
        _ => {}
    }
}

fn next_daily_like(now: DateTime<Utc>, hour: u32, minute: u32, _unused: Option<()>) -> DateTime<Utc> {
    use chrono::Timelike;
    let today = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
        .and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

fn next_hourly(now: DateTime<Utc>, minute: u32) -> DateTime<Utc> {
    use chrono::Timelike;
    let candidate = now
        .date_naive()
        .and_hms_opt(now.hour(), minute, 0)
        .unwrap()
        .and_utc();
    if candidate > now {
        candidate
    } else {
        candidate + Duration::hours(1)
    }
}

/// Owns the job set and drives the tick loop. A single mutex guards job
/// membership and state, matching the task queue's locking discipline.
pub struct Scheduler {
    jobs: Arc<Mutex<HashMap<Uuid, ScheduledJob>>>,
    queue: TaskQueue,
    max_concurrent_jobs: usize,
}

impl Scheduler {
    pub fn new(queue: TaskQueue, max_concurrent_jobs: usize) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            queue,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
        }
    }

    pub async fn add_job(&self, job: ScheduledJob) -> Uuid {
        let id = job.id;
        self.jobs.lock().await.insert(id, job);
        id
    }

    pub async fn pause(&self, id: Uuid) {
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            job.status = JobStatus::Paused;
        }
    }

    pub async fn resume(&self, id: Uuid) {
        let now = Utc::now();
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            job.recompute_next_run(now);
        }
    }

    pub async fn cancel(&self, id: Uuid) {
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            job.status = JobStatus::Cancelled;
            job.enabled = false;
        }
    }

    /// Enqueue a run immediately without advancing the schedule.
    pub async fn trigger_now(&self, id: Uuid) -> Option<Uuid> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id)?;
        Some(self.run_job(job))
    }

    fn run_job(&self, job: &mut ScheduledJob) -> Uuid {
        let now = Utc::now();
        let payload = job.render_payload(now);
        let mut task = Task::new(job.task_type.clone(), payload, "scheduler");
        task.priority = job.priority;
        if let Some(system) = &job.target_system {
            task.metadata.insert("target_system".into(), serde_json::json!(system));
        }
        if let Some(action) = &job.action_type {
            task.metadata.insert("action_type".into(), serde_json::json!(action));
        }
        let task_id = task.id;
        match self.queue.enqueue(task) {
            Ok(id) => {
                job.last_run_result = Some(serde_json::json!({"task_id": id.to_string(), "enqueued_at": now.to_rfc3339()}));
            }
            Err(e) => {
                job.last_run_result = Some(serde_json::json!({"error": e.to_string()}));
            }
        }
        job.last_run_at = Some(now);
        job.run_count += 1;
        task_id
    }

    /// One tick: enqueue every due job (bounded by `max_concurrent_jobs`)
    /// and recompute its next run.
    pub async fn tick(&self) {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let due_ids: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.is_due(now))
            .take(self.max_concurrent_jobs)
            .map(|j| j.id)
            .collect();

        for id in due_ids {
            if let Some(job) = jobs.get_mut(&id) {
                self.run_job(job);
                job.recompute_next_run(now);
            }
        }
    }

    /// Run [`Self::tick`] forever at `interval`.
    pub async fn run_forever(&self, interval: StdDuration) {
        loop {
            self.tick().await;
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn get_job(&self, id: Uuid) -> Option<ScheduledJob> {
        self.jobs.lock().await.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interval_job_is_due_immediately_and_reschedules() {
        let queue = TaskQueue::in_memory();
        let scheduler = Scheduler::new(queue.clone(), 10);
        let mut job = ScheduledJob::new(
            "heartbeat",
            Schedule::Interval { seconds: 60, max_runs: None },
            "ping",
            serde_json::json!({"job": "{job_name}"}),
        );
        job.next_run_at = Some(Utc::now() - Duration::seconds(1));
        job.status = JobStatus::Scheduled;
        let id = scheduler.add_job(job).await;

        scheduler.tick().await;

        let job = scheduler.get_job(id).await.unwrap();
        assert_eq!(job.run_count, 1);
        assert!(job.next_run_at.unwrap() > Utc::now());
        assert!(queue.get_queue_stats().lane_depths.values().sum::<usize>() >= 1);
    }

    #[tokio::test]
    async fn interval_job_disables_after_max_runs() {
        let queue = TaskQueue::in_memory();
        let scheduler = Scheduler::new(queue, 10);
        let mut job = ScheduledJob::new(
            "once-ish",
            Schedule::Interval { seconds: 1, max_runs: Some(1) },
            "t",
            serde_json::json!({}),
        );
        job.next_run_at = Some(Utc::now() - Duration::seconds(1));
        job.status = JobStatus::Scheduled;
        let id = scheduler.add_job(job).await;
        scheduler.tick().await;
        let job = scheduler.get_job(id).await.unwrap();
        assert_eq!(job.run_count, 1);
        assert!(!job.enabled);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn paused_job_never_becomes_due() {
        let queue = TaskQueue::in_memory();
        let scheduler = Scheduler::new(queue.clone(), 10);
        let mut job = ScheduledJob::new("p", Schedule::Interval { seconds: 1, max_runs: None }, "t", serde_json::json!({}));
        job.next_run_at = Some(Utc::now() - Duration::seconds(1));
        job.status = JobStatus::Paused;
        let id = scheduler.add_job(job).await;
        scheduler.tick().await;
        assert_eq!(scheduler.get_job(id).await.unwrap().run_count, 0);
    }

    #[test]
    fn placeholder_rendering_substitutes_known_variables() {
        let mut job = ScheduledJob::new("j", Schedule::Webhook, "t", serde_json::json!({"msg": "hello {job_name}"}));
        let rendered = job.render_payload(Utc::now());
        assert_eq!(rendered["msg"], serde_json::json!("hello j"));
        let _ = &mut job;
    }
}
