use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use courier_jobs::{Job, JobContext, JobError, JobParameters};

use crate::jobs::NoPayload;
use crate::services::PushServices;

/// Checks the messaging service after repeated send failures and records
/// whether it looks down.
pub struct ServiceOutageDetectionJob {
    services: Arc<PushServices>,
}

impl ServiceOutageDetectionJob {
    pub const KIND: &'static str = "service_outage_detection";
    pub const LANE: &'static str = "__service_outage_detection__";

    pub fn new(services: Arc<PushServices>) -> Self {
        Self { services }
    }

    pub fn from_payload(services: Arc<PushServices>, _payload: NoPayload) -> Self {
        Self::new(services)
    }
}

impl Job for ServiceOutageDetectionJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        JobParameters::builder()
            .group_id(Self::LANE)
            .ignore_duplicates()
            .network()
            .retry_count(5)
            .build()
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(NoPayload::default())?)
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let state = &self.services.state;
        if self.services.outage.service_reachable()? {
            if state.service_outage()? {
                info!(job_id = %ctx.job_id(), "service reachable again");
            }
            state.set_service_outage(false)?;
            Ok(())
        } else {
            state.set_service_outage(true)?;
            Err(JobError::RetryLater("service reports an outage".into()))
        }
    }

    fn on_should_retry(&self, error: &JobError) -> bool {
        matches!(error, JobError::Network(_) | JobError::RetryLater(_))
    }

    fn on_canceled(&mut self, ctx: &JobContext<'_>) {
        warn!(job_id = %ctx.job_id(), "outage check gave up, assuming the service is down");
        if let Err(err) = self.services.state.set_service_outage(true) {
            warn!(job_id = %ctx.job_id(), error = %err, "failed to record service outage");
        }
    }
}
