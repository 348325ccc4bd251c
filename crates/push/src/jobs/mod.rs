//! Concrete delivery job kinds.
//!
//! Each job is a payload plus the shared [`PushServices`]. The payload is all
//! that is persisted; services are injected again when the registry revives a
//! job by its kind tag.

mod avatar;
mod certificate;
mod group;
mod multi_device;
mod outage;
mod pre_keys;
mod profile;
mod pull;
mod receipt;
mod send;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use courier_jobs::{Job, JobRegistry};

use crate::services::PushServices;

pub use avatar::{AvatarDownloadJob, AvatarDownloadPayload};
pub use certificate::RotateCertificateJob;
pub use group::{GroupRequestPayload, PushGroupUpdateJob, RequestGroupInfoJob};
pub use multi_device::MultiDeviceBlockedUpdateJob;
pub use outage::ServiceOutageDetectionJob;
pub use pre_keys::{CleanPreKeysJob, RotateSignedPreKeyJob};
pub use profile::{RefreshAttributesJob, RotateProfileKeyJob};
pub use pull::{PushNotificationReceiveJob, request_message_pull};
pub use receipt::{DeliveryReceiptPayload, SendDeliveryReceiptJob};
pub use send::{MessageSendPayload, PushMediaSendJob, PushTextSendJob};

/// Payload of jobs that carry no state of their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoPayload {}

fn register<P, J>(
    registry: &mut JobRegistry,
    services: &Arc<PushServices>,
    kind: &'static str,
    build: fn(Arc<PushServices>, P) -> J,
) where
    P: DeserializeOwned + 'static,
    J: Job + 'static,
{
    let services = services.clone();
    registry.register_payload(kind, move |payload: P| build(services.clone(), payload));
}

/// Wire every delivery job kind to its constructor.
pub fn register_delivery_jobs(registry: &mut JobRegistry, services: Arc<PushServices>) {
    register(registry, &services, PushTextSendJob::KIND, PushTextSendJob::from_payload);
    register(registry, &services, PushMediaSendJob::KIND, PushMediaSendJob::from_payload);
    register(registry, &services, SendDeliveryReceiptJob::KIND, SendDeliveryReceiptJob::from_payload);
    register(registry, &services, PushGroupUpdateJob::KIND, PushGroupUpdateJob::from_payload);
    register(registry, &services, RequestGroupInfoJob::KIND, RequestGroupInfoJob::from_payload);
    register(registry, &services, AvatarDownloadJob::KIND, AvatarDownloadJob::from_payload);
    register(registry, &services, MultiDeviceBlockedUpdateJob::KIND, MultiDeviceBlockedUpdateJob::from_payload);
    register(registry, &services, PushNotificationReceiveJob::KIND, PushNotificationReceiveJob::from_payload);
    register(registry, &services, RotateSignedPreKeyJob::KIND, RotateSignedPreKeyJob::from_payload);
    register(registry, &services, CleanPreKeysJob::KIND, CleanPreKeysJob::from_payload);
    register(registry, &services, RotateCertificateJob::KIND, RotateCertificateJob::from_payload);
    register(registry, &services, RotateProfileKeyJob::KIND, RotateProfileKeyJob::from_payload);
    register(registry, &services, RefreshAttributesJob::KIND, RefreshAttributesJob::from_payload);
    register(registry, &services, ServiceOutageDetectionJob::KIND, ServiceOutageDetectionJob::from_payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fakes;

    #[test]
    fn every_kind_is_registered() {
        let mut registry = JobRegistry::new();
        register_delivery_jobs(&mut registry, Fakes::new().services());

        let mut kinds = registry.kinds();
        kinds.sort_unstable();
        assert_eq!(
            kinds,
            vec![
                "avatar_download",
                "clean_pre_keys",
                "multi_device_blocked_update",
                "push_group_update",
                "push_media_send",
                "push_notification_receive",
                "push_text_send",
                "refresh_attributes",
                "request_group_info",
                "rotate_certificate",
                "rotate_profile_key",
                "rotate_signed_pre_key",
                "send_delivery_receipt",
                "service_outage_detection",
            ]
        );
    }

    #[test]
    fn stateless_jobs_revive_from_empty_object() {
        let mut registry = JobRegistry::new();
        register_delivery_jobs(&mut registry, Fakes::new().services());

        let job = registry
            .instantiate(RotateSignedPreKeyJob::KIND, &serde_json::json!({}))
            .unwrap();
        assert_eq!(job.kind(), RotateSignedPreKeyJob::KIND);
        assert!(job.parameters().ignore_duplicates);
    }
}
