//! Job lifecycle notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::JobId;

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    /// The record was persisted and admitted to its lane.
    Enqueued,
    /// An attempt started.
    Started { attempt: u32 },
    /// The job finished successfully and its record was removed.
    Succeeded { attempt: u32 },
    /// The attempt failed and another one is scheduled.
    RetryScheduled {
        attempt: u32,
        run_at: DateTime<Utc>,
        error: String,
    },
    /// The job gave up and its record was removed.
    Canceled { attempt: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub kind: String,
    pub lane: Option<String>,
    pub event: JobEventKind,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: JobId, kind: impl Into<String>, lane: Option<String>, event: JobEventKind) -> Self {
        Self {
            job_id,
            kind: kind.into(),
            lane,
            event,
            at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event,
            JobEventKind::Succeeded { .. } | JobEventKind::Canceled { .. }
        )
    }
}
