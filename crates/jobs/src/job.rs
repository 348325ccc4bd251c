//! The unit of work executed by the queue.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use courier_core::JobId;

use crate::queue::QueueError;
use crate::store::StoreError;
use crate::types::JobParameters;

/// Why a job attempt failed.
///
/// The queue never inspects these; it only asks the job whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("server responded {status}: {message}")]
    Server { status: u16, message: String },

    #[error("retry later: {0}")]
    RetryLater(String),

    #[error("client needs signed pre-key rotation")]
    KeyRotationRequired,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("untrusted identity for {0}")]
    UntrustedIdentity(String),

    #[error("undeliverable: {0}")]
    Undeliverable(String),

    #[error("client build expired")]
    BuildExpired,

    #[error("malformed job state: {0}")]
    MalformedState(String),

    #[error("no handler registered for job kind {0}")]
    HandlerNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl JobError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn undeliverable(msg: impl Into<String>) -> Self {
        Self::Undeliverable(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedState(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Default recoverability verdict. Anything unclassified is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            JobError::Network(_) | JobError::RetryLater(_) | JobError::KeyRotationRequired => true,
            JobError::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::MalformedState(err.to_string())
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(msg) => JobError::MalformedState(msg),
            other => JobError::Other(format!("storage failure: {other}")),
        }
    }
}

/// Anything that can accept new jobs.
pub trait JobEnqueuer: Send + Sync {
    /// Persist and admit `job`. `Ok(None)` means it was dropped as a duplicate.
    fn enqueue_job(&self, job: &dyn Job) -> Result<Option<JobId>, QueueError>;
}

/// Per-attempt view handed to a running job.
pub struct JobContext<'a> {
    job_id: JobId,
    attempt: u32,
    now: DateTime<Utc>,
    enqueuer: &'a dyn JobEnqueuer,
}

impl<'a> JobContext<'a> {
    pub fn new(job_id: JobId, attempt: u32, now: DateTime<Utc>, enqueuer: &'a dyn JobEnqueuer) -> Self {
        Self {
            job_id,
            attempt,
            now,
            enqueuer,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// 1 on the first run.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Clock reading taken when the attempt was claimed.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn enqueue(&self, job: &dyn Job) -> Result<Option<JobId>, JobError> {
        self.enqueuer
            .enqueue_job(job)
            .map_err(|e| JobError::other(format!("failed to enqueue {}: {e}", job.kind())))
    }

    pub fn enqueuer(&self) -> &'a dyn JobEnqueuer {
        self.enqueuer
    }
}

/// A unit of background work.
///
/// Jobs are rebuilt from their persisted payload by the registry, so
/// `serialize` must capture everything a later attempt needs.
pub trait Job: Send {
    /// Registry tag.
    fn kind(&self) -> &'static str;

    fn parameters(&self) -> JobParameters;

    fn serialize(&self) -> Result<Value, JobError>;

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError>;

    fn on_should_retry(&self, error: &JobError) -> bool {
        error.is_transient()
    }

    /// Called before a retry is persisted.
    fn on_retry(&mut self, _ctx: &JobContext<'_>) {}

    /// Called exactly once when the job gives up. Must not fail.
    fn on_canceled(&mut self, ctx: &JobContext<'_>);
}
