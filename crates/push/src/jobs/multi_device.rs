use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use courier_jobs::{Job, JobContext, JobError, JobParameters};

use crate::jobs::NoPayload;
use crate::model::SyncMessage;
use crate::services::PushServices;

/// Tells linked devices which contacts and groups are blocked.
pub struct MultiDeviceBlockedUpdateJob {
    services: Arc<PushServices>,
}

impl MultiDeviceBlockedUpdateJob {
    pub const KIND: &'static str = "multi_device_blocked_update";

    pub fn new(services: Arc<PushServices>) -> Self {
        Self { services }
    }

    pub fn from_payload(services: Arc<PushServices>, _payload: NoPayload) -> Self {
        Self::new(services)
    }
}

impl Job for MultiDeviceBlockedUpdateJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        JobParameters::builder()
            .group_id(Self::KIND)
            .network()
            .build()
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(NoPayload::default())?)
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let services = &self.services;
        if !services.state.is_multi_device()? {
            info!(job_id = %ctx.job_id(), "not multi-device, nothing to sync");
            return Ok(());
        }

        let (groups, individuals): (Vec<_>, Vec<_>) =
            services.recipients.blocked()?.into_iter().partition(|a| a.is_group());
        let message = SyncMessage::Blocked {
            numbers: individuals.iter().map(|a| a.as_str().to_string()).collect(),
            groups: groups.iter().filter_map(|a| a.group_id()).collect(),
        };

        services
            .sender
            .send_sync_message(&message, &services.access_for_sync()?)
            .map_err(|e| services.note_transport_error(e))?;
        Ok(())
    }

    fn on_should_retry(&self, error: &JobError) -> bool {
        matches!(error, JobError::Network(_))
    }

    fn on_canceled(&mut self, _ctx: &JobContext<'_>) {}
}

#[cfg(test)]
mod tests {
    use courier_core::{Address, GroupId};

    use super::*;
    use crate::testing::{Fakes, address};

    #[test]
    fn single_device_does_nothing() {
        let fakes = Fakes::new();
        let harness = fakes.harness();

        harness.queue.enqueue(&MultiDeviceBlockedUpdateJob::new(harness.services.clone())).unwrap();
        harness.run();

        assert!(fakes.sender.sync_messages().is_empty());
    }

    #[test]
    fn blocked_list_is_split_by_kind() {
        let fakes = Fakes::new();
        let harness = fakes.harness();
        harness.services.state.set_multi_device(true).unwrap();
        let group = GroupId::new(vec![4u8; 16]);
        fakes.recipients.block(address("+15550300"));
        fakes.recipients.block(Address::group(&group));

        harness.queue.enqueue(&MultiDeviceBlockedUpdateJob::new(harness.services.clone())).unwrap();
        harness.run();

        assert_eq!(
            fakes.sender.sync_messages(),
            vec![SyncMessage::Blocked {
                numbers: vec!["+15550300".to_string()],
                groups: vec![group],
            }]
        );
    }
}
