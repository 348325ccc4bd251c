use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use courier_jobs::{Job, JobContext, JobError, JobParameters};

use crate::config::to_chrono;
use crate::jobs::NoPayload;
use crate::services::PushServices;
use crate::state::RotationKind;

/// Fetches a fresh sender certificate for unidentified delivery.
pub struct RotateCertificateJob {
    services: Arc<PushServices>,
}

impl RotateCertificateJob {
    pub const KIND: &'static str = "rotate_certificate";
    pub const LANE: &'static str = "__rotate_certificate__";

    pub fn new(services: Arc<PushServices>) -> Self {
        Self { services }
    }

    pub fn from_payload(services: Arc<PushServices>, _payload: NoPayload) -> Self {
        Self::new(services)
    }

    /// Whether the cached certificate is missing, unreadable, or expires
    /// within the configured buffer.
    pub fn needs_refresh(services: &PushServices, now: DateTime<Utc>) -> Result<bool, JobError> {
        let Some(certificate) = services.state.sender_certificate()? else {
            return Ok(true);
        };
        let expires = match services.cipher.certificate_expiration(&certificate) {
            Ok(expires) => expires,
            Err(err) => {
                warn!(error = %err, "cached sender certificate is unreadable");
                return Ok(true);
            }
        };
        let buffer = to_chrono(services.config.certificate_expiration_buffer);
        Ok(expires.checked_sub_signed(buffer).map_or(true, |deadline| now > deadline))
    }

    pub fn rotate(services: &PushServices, now: DateTime<Utc>) -> Result<(), JobError> {
        let certificate = services.accounts.sender_certificate()?;
        services.state.set_sender_certificate(&certificate)?;
        services.state.set_last_rotation(RotationKind::SenderCertificate, now)?;
        info!(bytes = certificate.len(), "sender certificate refreshed");
        Ok(())
    }
}

impl Job for RotateCertificateJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        JobParameters::builder()
            .group_id(Self::LANE)
            .ignore_duplicates()
            .network()
            .retry_duration(self.services.config.send_retry_duration)
            .build()
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(NoPayload::default())?)
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        Self::rotate(&self.services, ctx.now())
    }

    fn on_canceled(&mut self, ctx: &JobContext<'_>) {
        warn!(job_id = %ctx.job_id(), "failed to rotate sender certificate");
    }
}
