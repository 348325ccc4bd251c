use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use courier_core::{Address, GroupId};
use courier_jobs::{Job, JobContext, JobError, JobParameters};

use crate::model::{Attachment, DataMessage, GroupAction, GroupContext, OutboundMessage};
use crate::services::PushServices;

/// A group and the member a group message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRequestPayload {
    pub source: Address,
    pub group_id: GroupId,
}

/// Sends the current group snapshot to one member who asked for it.
pub struct PushGroupUpdateJob {
    services: Arc<PushServices>,
    payload: GroupRequestPayload,
}

impl PushGroupUpdateJob {
    pub const KIND: &'static str = "push_group_update";

    pub fn new(services: Arc<PushServices>, source: Address, group_id: GroupId) -> Self {
        Self::from_payload(services, GroupRequestPayload { source, group_id })
    }

    pub fn from_payload(services: Arc<PushServices>, payload: GroupRequestPayload) -> Self {
        Self { services, payload }
    }
}

impl Job for PushGroupUpdateJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        JobParameters::builder()
            .network()
            .retry_duration(self.services.config.send_retry_duration)
            .build()
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(&self.payload)?)
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let services = &self.services;
        let group_id = &self.payload.group_id;
        let Some(record) = services.groups.group(group_id)? else {
            warn!(job_id = %ctx.job_id(), group = %group_id, "no record for requested group");
            return Ok(());
        };

        let avatar = match &record.avatar {
            Some(bytes) => {
                let image = Attachment::new("image/jpeg", bytes.clone());
                Some(services.sender.upload_attachment(&image, &mut |_, _| {})?)
            }
            None => None,
        };

        let message = DataMessage {
            timestamp: ctx.now().timestamp_millis(),
            group: Some(GroupContext {
                id: group_id.clone(),
                action: GroupAction::Update,
                title: Some(record.title.clone()),
                members: record.members.clone(),
                avatar,
            }),
            expires_in_secs: record.expires_in_secs,
            ..DataMessage::default()
        };

        let access = services.access_for_address(&self.payload.source)?;
        services
            .sender
            .send_message(&self.payload.source, &access, &OutboundMessage::Data(message))
            .map_err(|e| services.note_transport_error(e))?;
        info!(job_id = %ctx.job_id(), group = %group_id, member = %self.payload.source, "group update sent");
        Ok(())
    }

    fn on_should_retry(&self, error: &JobError) -> bool {
        matches!(error, JobError::Network(_))
    }

    fn on_canceled(&mut self, _ctx: &JobContext<'_>) {}
}

/// Asks a member for the details of a group we know nothing about.
pub struct RequestGroupInfoJob {
    services: Arc<PushServices>,
    payload: GroupRequestPayload,
}

impl RequestGroupInfoJob {
    pub const KIND: &'static str = "request_group_info";

    pub fn new(services: Arc<PushServices>, source: Address, group_id: GroupId) -> Self {
        Self::from_payload(services, GroupRequestPayload { source, group_id })
    }

    pub fn from_payload(services: Arc<PushServices>, payload: GroupRequestPayload) -> Self {
        Self { services, payload }
    }
}

impl Job for RequestGroupInfoJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        JobParameters::builder().network().retry_count(50).build()
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(&self.payload)?)
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let message = DataMessage {
            timestamp: ctx.now().timestamp_millis(),
            group: Some(GroupContext::request_info(self.payload.group_id.clone())),
            ..DataMessage::default()
        };
        let access = self.services.access_for_address(&self.payload.source)?;
        self.services
            .sender
            .send_message(&self.payload.source, &access, &OutboundMessage::Data(message))
            .map_err(|e| self.services.note_transport_error(e))?;
        Ok(())
    }

    fn on_should_retry(&self, error: &JobError) -> bool {
        matches!(error, JobError::Network(_))
    }

    fn on_canceled(&mut self, _ctx: &JobContext<'_>) {}
}
