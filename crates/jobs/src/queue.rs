//! Durable job queue.
//!
//! `JobQueue` ties the pieces together: it persists records through a
//! [`JobStore`], orders them with the lane [`Scheduler`], revives jobs through
//! the [`JobRegistry`] and applies the retry decision after every attempt.
//! Execution can be driven synchronously with [`JobQueue::run_ready`] or by a
//! worker pool started with [`JobQueue::start`](crate::executor).

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use courier_core::{JobId, RequirementKind};
use courier_events::{
    EventBus, InMemoryEventBus, JobEvent, JobEventKind, RequirementChange, Subscription,
};

use crate::executor::ExecutorStats;
use crate::job::{Job, JobContext, JobEnqueuer, JobError};
use crate::registry::JobRegistry;
use crate::requirement::{RequirementContext, RequirementNotifier, RequirementProvider};
use crate::scheduler::{Finish, Scheduler};
use crate::store::{JobStore, StoreError};
use crate::types::{JobRecord, JobStatus, to_chrono};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job store failure: {0}")]
    Store(#[from] StoreError),

    #[error("failed to serialize {kind}: {error}")]
    Serialize { kind: &'static str, error: JobError },
}

/// What happened to one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    RetryScheduled { run_at: DateTime<Utc> },
    Canceled { reason: String },
}

struct Inner {
    scheduler: Mutex<Scheduler>,
    wake: Condvar,
    store: Arc<dyn JobStore>,
    registry: JobRegistry,
    requirements: Arc<dyn RequirementContext>,
    events: InMemoryEventBus<JobEvent>,
    requirement_bus: Arc<InMemoryEventBus<RequirementChange>>,
    requirement_changes: Mutex<Subscription<RequirementChange>>,
    stats: Mutex<ExecutorStats>,
}

/// Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("pending", &self.pending_count())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: JobRegistry,
        requirements: Arc<dyn RequirementContext>,
    ) -> Self {
        let requirement_bus = Arc::new(InMemoryEventBus::new());
        let requirement_changes = Mutex::new(requirement_bus.subscribe());

        Self {
            inner: Arc::new(Inner {
                scheduler: Mutex::new(Scheduler::new()),
                wake: Condvar::new(),
                store,
                registry,
                requirements,
                events: InMemoryEventBus::new(),
                requirement_bus,
                requirement_changes,
                stats: Mutex::new(ExecutorStats::default()),
            }),
        }
    }

    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.inner.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, record: &JobRecord, event: JobEventKind) {
        let event = JobEvent::new(
            record.id,
            record.kind.clone(),
            record.parameters.group_id.clone(),
            event,
        );
        if let Err(err) = self.inner.events.publish(event) {
            warn!(job_id = %record.id, error = ?err, "failed to publish job event");
        }
    }

    /// Handle for requirement providers to wake blocked jobs.
    pub fn requirement_notifier(&self) -> RequirementNotifier {
        RequirementNotifier::new(self.inner.requirement_bus.clone())
    }

    pub fn attach_provider(&self, provider: &dyn RequirementProvider) {
        provider.attach(self.requirement_notifier());
    }

    /// Lifecycle events for every job from now on.
    pub fn subscribe(&self) -> Subscription<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Persist `job` and admit it to its lane.
    ///
    /// Returns once the record is durable; `Ok(None)` when it was dropped as a
    /// duplicate of a pending or running job.
    pub fn enqueue(&self, job: &dyn Job) -> Result<Option<JobId>, QueueError> {
        let kind = job.kind();
        let parameters = job.parameters();
        let payload = job
            .serialize()
            .map_err(|error| QueueError::Serialize { kind, error })?;

        let mut scheduler = self.scheduler();
        if parameters.ignore_duplicates
            && scheduler.has_equivalent(kind, parameters.group_id.as_deref())
        {
            debug!(kind, group_id = ?parameters.group_id, "duplicate job ignored");
            return Ok(None);
        }

        let mut record = JobRecord::new(kind, parameters, payload);
        record.sequence = scheduler.next_sequence();
        self.inner.store.insert(&record)?;
        let phase = scheduler.admit(record.clone(), &*self.inner.requirements, Utc::now());
        drop(scheduler);

        debug!(job_id = %record.id, kind, sequence = record.sequence, phase = ?phase, "job enqueued");
        self.inner.wake.notify_all();
        self.publish(&record, JobEventKind::Enqueued);
        Ok(Some(record.id))
    }

    /// Reload every persisted record and re-admit it. Call once at boot.
    pub fn restore(&self) -> Result<usize, QueueError> {
        let mut records = self.inner.store.load_all()?;
        for record in records.iter_mut().filter(|r| r.status == JobStatus::Running) {
            record.status = JobStatus::Pending;
            self.inner.store.update(record)?;
        }

        let count = records.len();
        self.scheduler()
            .restore(records, &*self.inner.requirements, Utc::now());
        self.inner.wake.notify_all();

        info!(restored = count, "job queue restored");
        Ok(count)
    }

    /// Re-check jobs blocked on `kind`.
    pub fn requirements_changed(&self, kind: RequirementKind) -> usize {
        self.requirements_changed_at(kind, Utc::now())
    }

    pub fn requirements_changed_at(&self, kind: RequirementKind, now: DateTime<Utc>) -> usize {
        let unblocked = self
            .scheduler()
            .requirements_changed(kind, &*self.inner.requirements, now);
        if unblocked > 0 {
            debug!(requirement = %kind, unblocked, "requirement change released jobs");
            self.inner.wake.notify_all();
        }
        unblocked
    }

    /// Apply every requirement change published so far.
    pub fn process_requirement_changes(&self) -> usize {
        self.process_requirement_changes_at(Utc::now())
    }

    pub fn process_requirement_changes_at(&self, now: DateTime<Utc>) -> usize {
        let changes = self
            .inner
            .requirement_changes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain();
        changes
            .into_iter()
            .map(|change| self.requirements_changed_at(change.kind, now))
            .sum()
    }

    pub(crate) fn recv_requirement_change(&self, timeout: Duration) -> Option<RequirementChange> {
        self.inner
            .requirement_changes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recv_timeout(timeout)
            .ok()
    }

    pub fn claim(&self, now: DateTime<Utc>) -> Option<JobRecord> {
        self.scheduler().claim_next(&*self.inner.requirements, now)
    }

    /// Run every job that is ready at `now` on the calling thread.
    ///
    /// Jobs released by the ones executed here (next in lane, newly enqueued)
    /// also run. Returns the number of attempts made.
    pub fn run_ready_at(&self, now: DateTime<Utc>) -> usize {
        self.process_requirement_changes_at(now);
        let mut attempts = 0;
        while let Some(record) = self.claim(now) {
            self.execute(record, now);
            attempts += 1;
        }
        attempts
    }

    pub fn run_ready(&self) -> usize {
        self.run_ready_at(Utc::now())
    }

    /// Execute one claimed attempt and apply its outcome.
    pub fn execute(&self, record: JobRecord, now: DateTime<Utc>) -> JobOutcome {
        self.update_stats(|s| s.current_running += 1);
        let outcome = self.execute_inner(record, now);
        self.update_stats(|s| {
            s.current_running = s.current_running.saturating_sub(1);
            s.jobs_processed += 1;
            match outcome {
                JobOutcome::Succeeded => s.jobs_succeeded += 1,
                JobOutcome::RetryScheduled { .. } => s.jobs_retried += 1,
                JobOutcome::Canceled { .. } => s.jobs_canceled += 1,
            }
        });
        outcome
    }

    fn execute_inner(&self, record: JobRecord, now: DateTime<Utc>) -> JobOutcome {
        let id = record.id;
        self.publish(&record, JobEventKind::Started { attempt: record.attempt });

        if let Err(err) = self.inner.store.update(&record) {
            warn!(job_id = %id, error = %err, "failed to persist attempt start");
        }

        let mut job = match self.inner.registry.instantiate(&record.kind, &record.payload) {
            Ok(job) => job,
            Err(err) => {
                error!(job_id = %id, kind = %record.kind, error = %err, "cannot revive job, dropping it");
                return self.settle_canceled(&record, err.to_string(), now);
            }
        };

        let ctx = JobContext::new(id, record.attempt, now, self);
        debug!(job_id = %id, kind = %record.kind, attempt = record.attempt, "running job");

        let result = panic::catch_unwind(AssertUnwindSafe(|| job.run(&ctx)))
            .unwrap_or_else(|payload| Err(JobError::other(format!("job panicked: {}", panic_message(payload.as_ref())))));

        let err = match result {
            Ok(()) => {
                if let Some(done) = self.finish(id, Finish::Done, now) {
                    if let Err(err) = self.inner.store.remove(id) {
                        warn!(job_id = %id, error = %err, "failed to remove finished job");
                    }
                    self.publish(&done, JobEventKind::Succeeded { attempt: done.attempt });
                }
                debug!(job_id = %id, kind = %record.kind, "job succeeded");
                return JobOutcome::Succeeded;
            }
            Err(err) => err,
        };

        let retryable = job.on_should_retry(&err);
        let params = &record.parameters;
        let budget_start = record.budget_start();
        if retryable && params.retry.allows(record.attempt, budget_start, now) {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| job.on_retry(&ctx)));

            let delay = params.next_delay(record.attempt, budget_start, now);
            let run_at = now + to_chrono(delay);

            let mut scheduler = self.scheduler();
            match job.serialize() {
                Ok(payload) => scheduler.set_payload(id, payload),
                Err(e) => warn!(job_id = %id, error = %e, "keeping previous payload for retry"),
            }
            let updated = scheduler.finish(
                id,
                Finish::Retry { run_at, error: err.to_string() },
                &*self.inner.requirements,
                now,
            );
            // Persist before any other worker can claim the next attempt.
            if let Some(updated) = &updated {
                if let Err(e) = self.inner.store.update(updated) {
                    warn!(job_id = %id, error = %e, "failed to persist retry");
                }
            }
            drop(scheduler);

            if let Some(updated) = updated {
                self.publish(
                    &updated,
                    JobEventKind::RetryScheduled {
                        attempt: record.attempt,
                        run_at,
                        error: err.to_string(),
                    },
                );
            }
            self.inner.wake.notify_all();

            info!(job_id = %id, kind = %record.kind, attempt = record.attempt, delay_ms = delay.as_millis() as u64, error = %err, "job retry scheduled");
            return JobOutcome::RetryScheduled { run_at };
        }

        let reason = if retryable {
            format!("retry budget exhausted: {err}")
        } else {
            err.to_string()
        };
        warn!(job_id = %id, kind = %record.kind, attempt = record.attempt, reason = %reason, "job canceled");

        if panic::catch_unwind(AssertUnwindSafe(|| job.on_canceled(&ctx))).is_err() {
            error!(job_id = %id, kind = %record.kind, "on_canceled panicked");
        }
        self.settle_canceled(&record, reason, now)
    }

    fn settle_canceled(&self, record: &JobRecord, reason: String, now: DateTime<Utc>) -> JobOutcome {
        if let Some(done) = self.finish(record.id, Finish::Done, now) {
            if let Err(err) = self.inner.store.remove(record.id) {
                warn!(job_id = %record.id, error = %err, "failed to remove canceled job");
            }
            self.publish(
                &done,
                JobEventKind::Canceled {
                    attempt: done.attempt,
                    reason: reason.clone(),
                },
            );
        }
        JobOutcome::Canceled { reason }
    }

    fn finish(&self, id: JobId, outcome: Finish, now: DateTime<Utc>) -> Option<JobRecord> {
        let done = self
            .scheduler()
            .finish(id, outcome, &*self.inner.requirements, now);
        self.inner.wake.notify_all();
        done
    }

    fn update_stats(&self, f: impl FnOnce(&mut ExecutorStats)) {
        f(&mut self.inner.stats.lock().unwrap_or_else(|e| e.into_inner()));
    }

    pub(crate) fn stats_snapshot(&self) -> ExecutorStats {
        self.inner.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Park the caller until work may be available or `max_wait` passes.
    pub(crate) fn wait_for_work(&self, max_wait: Duration) {
        let scheduler = self.scheduler();
        if scheduler.ready_count() > 0 {
            return;
        }
        let timeout = match scheduler.next_wake() {
            Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO).min(max_wait),
            None => max_wait,
        };
        let _ = self.inner.wake.wait_timeout(scheduler, timeout);
    }

    pub(crate) fn wake_all(&self) {
        self.inner.wake.notify_all();
    }

    pub fn record(&self, id: JobId) -> Option<JobRecord> {
        self.scheduler().record(id).cloned()
    }

    /// Non-terminal records in enqueue order.
    pub fn records(&self) -> Vec<JobRecord> {
        self.scheduler().records()
    }

    pub fn pending_count(&self) -> usize {
        self.scheduler().len()
    }

    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.scheduler().next_wake()
    }

    pub fn requirements(&self) -> &dyn RequirementContext {
        &*self.inner.requirements
    }
}

impl JobEnqueuer for JobQueue {
    fn enqueue_job(&self, job: &dyn Job) -> Result<Option<JobId>, QueueError> {
        self.enqueue(job)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
