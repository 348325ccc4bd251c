use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use courier_core::GroupId;
use courier_jobs::{Job, JobContext, JobError, JobParameters};

use crate::services::PushServices;
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarDownloadPayload {
    pub group_id: GroupId,
}

/// Fetches a group's avatar from the attachment server and stores it.
pub struct AvatarDownloadJob {
    services: Arc<PushServices>,
    payload: AvatarDownloadPayload,
}

impl AvatarDownloadJob {
    pub const KIND: &'static str = "avatar_download";

    pub fn new(services: Arc<PushServices>, group_id: GroupId) -> Self {
        Self::from_payload(services, AvatarDownloadPayload { group_id })
    }

    pub fn from_payload(services: Arc<PushServices>, payload: AvatarDownloadPayload) -> Self {
        Self { services, payload }
    }
}

impl Job for AvatarDownloadJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        JobParameters::builder().network().build()
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(&self.payload)?)
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let services = &self.services;
        let group_id = &self.payload.group_id;
        let Some(pointer) = services.groups.group(group_id)?.and_then(|record| record.avatar_pointer) else {
            return Ok(());
        };
        if pointer.key.is_empty() {
            return Ok(());
        }

        match services
            .receiver
            .retrieve_attachment(&pointer, services.config.max_avatar_size)
        {
            Ok(avatar) => {
                services.groups.update_avatar(group_id, avatar)?;
                info!(job_id = %ctx.job_id(), group = %group_id, "group avatar downloaded");
                Ok(())
            }
            // The server refused or the image is unusable; retrying will not help.
            Err(err @ (TransportError::Status { .. } | TransportError::TooLarge { .. })) => {
                warn!(job_id = %ctx.job_id(), group = %group_id, error = %err, "group avatar unavailable");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn on_should_retry(&self, error: &JobError) -> bool {
        matches!(error, JobError::Network(_))
    }

    fn on_canceled(&mut self, _ctx: &JobContext<'_>) {}
}
