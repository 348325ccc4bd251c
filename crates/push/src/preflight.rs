//! Checks every outbound send passes before touching the transport.

use std::sync::Arc;

use tracing::{debug, info, warn};

use courier_jobs::{JobContext, JobError};

use crate::jobs::{RotateCertificateJob, RotateSignedPreKeyJob};
use crate::services::PushServices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightStage {
    /// An expired client build may no longer send.
    BuildExpiry,
    /// Too many failed signed pre-key rotations force a rotation first.
    SignedPreKeyHealth,
    /// Refresh a missing or nearly expired sender certificate in-line.
    SenderCertificate,
}

impl PreflightStage {
    /// The stages run for message sends, in order.
    pub const SEND: [PreflightStage; 3] = [
        PreflightStage::BuildExpiry,
        PreflightStage::SignedPreKeyHealth,
        PreflightStage::SenderCertificate,
    ];

    pub fn check(self, services: &Arc<PushServices>, ctx: &JobContext<'_>) -> Result<(), JobError> {
        match self {
            PreflightStage::BuildExpiry => {
                if services.config.is_build_expired(ctx.now()) {
                    return Err(JobError::BuildExpired);
                }
                Ok(())
            }
            PreflightStage::SignedPreKeyHealth => {
                let failures = services.state.signed_pre_key_failure_count()?;
                if failures > services.config.signed_pre_key_failure_threshold {
                    let enqueued = ctx.enqueue(&RotateSignedPreKeyJob::new(services.clone()))?;
                    warn!(
                        job_id = %ctx.job_id(),
                        failures,
                        rotation_enqueued = enqueued.is_some(),
                        "too many signed pre-key rotation failures"
                    );
                    return Err(JobError::KeyRotationRequired);
                }
                Ok(())
            }
            PreflightStage::SenderCertificate => {
                if RotateCertificateJob::needs_refresh(services, ctx.now())? {
                    info!(job_id = %ctx.job_id(), "sender certificate invalid at send time, fetching a new one");
                    RotateCertificateJob::rotate(services, ctx.now())?;
                } else {
                    debug!(job_id = %ctx.job_id(), "sender certificate is valid");
                }
                Ok(())
            }
        }
    }
}

pub fn run_stages(
    stages: &[PreflightStage],
    services: &Arc<PushServices>,
    ctx: &JobContext<'_>,
) -> Result<(), JobError> {
    stages.iter().try_for_each(|stage| stage.check(services, ctx))
}

/// Run the send pre-flight pipeline.
pub fn run_preflight(services: &Arc<PushServices>, ctx: &JobContext<'_>) -> Result<(), JobError> {
    run_stages(&PreflightStage::SEND, services, ctx)
}
