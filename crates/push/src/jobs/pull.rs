use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use courier_jobs::{Job, JobContext, JobError, JobId, JobParameters, JobQueue, QueueError};

use crate::jobs::NoPayload;
use crate::receive::pull_and_process;
use crate::services::PushServices;

/// Handle an external wake-up hint.
///
/// The pending-pull flag is persisted before the job is queued, so a hint that
/// arrives while a drain is running keeps the flag set once that drain ends.
pub fn request_message_pull(queue: &JobQueue, services: &Arc<PushServices>) -> Result<Option<JobId>, QueueError> {
    services.state.mark_needs_message_pull()?;
    queue.enqueue(&PushNotificationReceiveJob::new(services.clone()))
}

/// Drains queued envelopes after an external wake-up hint.
pub struct PushNotificationReceiveJob {
    services: Arc<PushServices>,
}

impl PushNotificationReceiveJob {
    pub const KIND: &'static str = "push_notification_receive";
    pub const LANE: &'static str = "__notification_received";

    pub fn new(services: Arc<PushServices>) -> Self {
        Self { services }
    }

    pub fn from_payload(services: Arc<PushServices>, _payload: NoPayload) -> Self {
        Self::new(services)
    }
}

impl Job for PushNotificationReceiveJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        JobParameters::builder().group_id(Self::LANE).network().build()
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(NoPayload::default())?)
    }

    fn run(&mut self, _ctx: &JobContext<'_>) -> Result<(), JobError> {
        pull_and_process(&self.services, "pull").map(|_| ())
    }

    fn on_should_retry(&self, error: &JobError) -> bool {
        matches!(error, JobError::Network(_))
    }

    fn on_canceled(&mut self, ctx: &JobContext<'_>) {
        warn!(job_id = %ctx.job_id(), "failed to download pending messages");
    }
}
