//! Worker pool driving a [`JobQueue`] in the background.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info};

use crate::queue::{JobOutcome, JobQueue};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on parked waits; workers also wake on queue activity.
    pub poll_interval: Duration,
    /// Number of worker threads (lanes that can run at once).
    pub workers: usize,
    /// Name for logging and thread names
    pub name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            workers: 4,
            name: "courier-jobs".to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_canceled: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to a running worker pool.
#[derive(Debug)]
pub struct JobQueueHandle {
    queue: JobQueue,
    shutdown: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    started: Instant,
}

impl JobQueueHandle {
    /// Stop accepting new attempts and wait for in-flight ones to finish.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.wake_all();
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let mut stats = self.queue.stats_snapshot();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }
}

impl JobQueue {
    /// Spawn the worker pool and the requirement listener.
    pub fn start(&self, config: ExecutorConfig) -> JobQueueHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut joins = Vec::with_capacity(config.workers + 1);

        for index in 0..config.workers.max(1) {
            let queue = self.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();
            let join = thread::Builder::new()
                .name(format!("{}-worker-{index}", config.name))
                .spawn(move || worker_loop(queue, config, index, shutdown))
                .expect("failed to spawn job worker thread");
            joins.push(join);
        }

        {
            let queue = self.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();
            let join = thread::Builder::new()
                .name(format!("{}-requirements", config.name))
                .spawn(move || requirement_loop(queue, config, shutdown))
                .expect("failed to spawn requirement listener thread");
            joins.push(join);
        }

        info!(executor = %config.name, workers = config.workers, "job workers started");

        JobQueueHandle {
            queue: self.clone(),
            shutdown,
            joins,
            started: Instant::now(),
        }
    }
}

fn worker_loop(queue: JobQueue, config: ExecutorConfig, index: usize, shutdown: Arc<AtomicBool>) {
    debug!(executor = %config.name, worker = index, "worker started");

    while !shutdown.load(Ordering::SeqCst) {
        match queue.claim(Utc::now()) {
            Some(record) => {
                let id = record.id;
                let outcome = queue.execute(record, Utc::now());
                if !matches!(outcome, JobOutcome::Succeeded) {
                    debug!(executor = %config.name, worker = index, job_id = %id, outcome = ?outcome, "attempt did not succeed");
                }
            }
            None => queue.wait_for_work(config.poll_interval),
        }
    }

    debug!(executor = %config.name, worker = index, "worker stopped");
}

fn requirement_loop(queue: JobQueue, config: ExecutorConfig, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        if let Some(change) = queue.recv_requirement_change(config.poll_interval) {
            queue.requirements_changed(change.kind);
        }
    }
    info!(executor = %config.name, "job workers stopped");
}
