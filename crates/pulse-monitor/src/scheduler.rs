// Interval job scheduler for background collection.
//
// Each job runs in its own task on a fixed interval. A job never overlaps
// itself (the loop awaits each run) and ticks missed while a run is still
// going are skipped. A shared semaphore caps how many jobs run at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_WORKERS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job {id}: interval must be non-zero")]
    ZeroInterval { id: String },
}

/// Work performed on every tick.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub struct JobSpec {
    pub id: String,
    pub interval: Duration,
    pub task: JobFn,
}

impl JobSpec {
    pub fn new<F, Fut>(id: impl Into<String>, interval: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task: JobFn = Arc::new(move || Box::pin(task()));
        Self {
            id: id.into(),
            interval,
            task,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub exists: bool,
    pub job_id: String,
    pub interval_secs: Option<u64>,
    pub paused: bool,
    /// `None` while paused or before the scheduler starts.
    pub next_run: Option<DateTime<Utc>>,
    pub runs: u64,
}

#[derive(Default)]
struct JobShared {
    paused: AtomicBool,
    runs: AtomicU64,
    next_run: Mutex<Option<DateTime<Utc>>>,
}

impl JobShared {
    fn set_next_run(&self, at: Option<DateTime<Utc>>) {
        if let Ok(mut slot) = self.next_run.lock() {
            *slot = at;
        }
    }

    fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run.lock().ok().and_then(|slot| *slot)
    }
}

struct JobEntry {
    interval: Duration,
    task: JobFn,
    shared: Arc<JobShared>,
    handle: Option<JoinHandle<()>>,
}

impl JobEntry {
    fn abort(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }
}

pub struct Scheduler {
    jobs: Mutex<HashMap<String, JobEntry>>,
    permits: Arc<Semaphore>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(max_workers: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            running: AtomicBool::new(false),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().expect("scheduler mutex poisoned")
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start every registered job. Calling it again is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut jobs = self.jobs();
        for (id, entry) in jobs.iter_mut() {
            if entry.handle.is_none() {
                entry.handle = Some(self.spawn(id, entry));
            }
        }
        info!(jobs = jobs.len(), "scheduler started");
    }

    /// Stop every job and forget them.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs();
        for entry in jobs.values_mut() {
            entry.abort();
        }
        let count = jobs.len();
        jobs.clear();
        self.running.store(false, Ordering::SeqCst);
        info!(jobs = count, "scheduler shut down");
    }

    /// Register a job, replacing any job with the same id.
    pub fn add_job(&self, spec: JobSpec) -> Result<(), SchedulerError> {
        if spec.interval.is_zero() {
            return Err(SchedulerError::ZeroInterval { id: spec.id });
        }
        let mut entry = JobEntry {
            interval: spec.interval,
            task: spec.task,
            shared: Arc::new(JobShared::default()),
            handle: None,
        };
        if self.is_running() {
            entry.handle = Some(self.spawn(&spec.id, &entry));
        }

        let mut jobs = self.jobs();
        if let Some(mut old) = jobs.insert(spec.id.clone(), entry) {
            old.abort();
            debug!(job = %spec.id, "replaced existing job");
        }
        info!(job = %spec.id, interval_secs = spec.interval.as_secs(), "job scheduled");
        Ok(())
    }

    pub fn remove_job(&self, id: &str) -> bool {
        match self.jobs().remove(id) {
            Some(mut entry) => {
                entry.abort();
                info!(job = %id, "job removed");
                true
            }
            None => false,
        }
    }

    pub fn pause_job(&self, id: &str) -> bool {
        self.set_paused(id, true)
    }

    pub fn resume_job(&self, id: &str) -> bool {
        self.set_paused(id, false)
    }

    fn set_paused(&self, id: &str, paused: bool) -> bool {
        let jobs = self.jobs();
        let Some(entry) = jobs.get(id) else {
            return false;
        };
        entry.shared.paused.store(paused, Ordering::SeqCst);
        debug!(job = %id, paused, "job pause state changed");
        true
    }

    pub fn job_status(&self, id: &str) -> JobStatus {
        let jobs = self.jobs();
        match jobs.get(id) {
            Some(entry) => {
                let paused = entry.shared.paused.load(Ordering::SeqCst);
                JobStatus {
                    exists: true,
                    job_id: id.to_string(),
                    interval_secs: Some(entry.interval.as_secs()),
                    paused,
                    next_run: if paused { None } else { entry.shared.next_run() },
                    runs: entry.shared.runs.load(Ordering::SeqCst),
                }
            }
            None => JobStatus {
                exists: false,
                job_id: id.to_string(),
                interval_secs: None,
                paused: false,
                next_run: None,
                runs: 0,
            },
        }
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn spawn(&self, id: &str, entry: &JobEntry) -> JoinHandle<()> {
        tokio::spawn(job_loop(
            id.to_string(),
            entry.interval,
            entry.task.clone(),
            entry.shared.clone(),
            self.permits.clone(),
        ))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(jobs) = self.jobs.get_mut() {
            for entry in jobs.values_mut() {
                entry.abort();
            }
        }
    }
}

async fn job_loop(
    id: String,
    interval: Duration,
    task: JobFn,
    shared: Arc<JobShared>,
    permits: Arc<Semaphore>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        shared.set_next_run(chrono::Duration::from_std(interval).ok().map(|d| Utc::now() + d));
        ticker.tick().await;
        if shared.paused.load(Ordering::SeqCst) {
            continue;
        }

        let Ok(_permit) = permits.acquire().await else {
            return;
        };
        shared.runs.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = task().await {
            warn!(job = %id, "job run failed: {e:#}");
        }
    }
}
