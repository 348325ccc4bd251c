//! Startup re-admission and periodic maintenance scheduling.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use courier_jobs::{Job, JobQueue, QueueError, StoreError};

use crate::config::to_chrono;
use crate::jobs::{PushNotificationReceiveJob, RotateCertificateJob, RotateSignedPreKeyJob};
use crate::services::PushServices;
use crate::state::RotationKind;

#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("delivery state unavailable: {0}")]
    State(#[from] StoreError),
}

/// What boot found and scheduled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Records re-admitted from the job store.
    pub restored: usize,
    pub pull_enqueued: bool,
    pub pre_key_enqueued: bool,
    /// Kind tags of maintenance jobs that were due.
    pub rotations: Vec<&'static str>,
}

/// Bring the queue back after a restart.
///
/// Restores persisted jobs, schedules a pull if the last run was interrupted
/// before draining, registers a first signed pre-key and queues any rotation
/// that has come due.
pub fn boot(queue: &JobQueue, services: &Arc<PushServices>, now: DateTime<Utc>) -> Result<BootReport, BootError> {
    let mut report = BootReport {
        restored: queue.restore()?,
        ..BootReport::default()
    };

    let state = &services.state;
    if state.needs_message_pull()? {
        report.pull_enqueued = queue
            .enqueue(&PushNotificationReceiveJob::new(services.clone()))?
            .is_some();
    }

    if !state.signed_pre_key_registered()? {
        report.pre_key_enqueued = queue
            .enqueue(&RotateSignedPreKeyJob::new(services.clone()))?
            .is_some();
    }

    report.rotations = schedule_due_rotations(queue, services, now)?;

    info!(
        restored = report.restored,
        pull = report.pull_enqueued,
        pre_key = report.pre_key_enqueued,
        rotations = ?report.rotations,
        "delivery engine booted"
    );
    Ok(report)
}

fn is_due(last: Option<DateTime<Utc>>, interval: std::time::Duration, now: DateTime<Utc>) -> bool {
    match last {
        None => true,
        Some(last) => last
            .checked_add_signed(to_chrono(interval))
            .map_or(false, |next| now >= next),
    }
}

/// Enqueue rotations whose interval has elapsed since their last success.
///
/// Returns the kinds that were newly enqueued; rotations already waiting in
/// their lane are not duplicated.
pub fn schedule_due_rotations(
    queue: &JobQueue,
    services: &Arc<PushServices>,
    now: DateTime<Utc>,
) -> Result<Vec<&'static str>, BootError> {
    let state = &services.state;
    let config = &services.config;
    let mut enqueued = Vec::new();

    let due: [(RotationKind, std::time::Duration, Box<dyn Job>); 2] = [
        (
            RotationKind::SignedPreKey,
            config.signed_pre_key_rotation_interval,
            Box::new(RotateSignedPreKeyJob::new(services.clone())),
        ),
        (
            RotationKind::SenderCertificate,
            config.certificate_rotation_interval,
            Box::new(RotateCertificateJob::new(services.clone())),
        ),
    ];

    for (kind, interval, job) in due {
        if !is_due(state.last_rotation(kind)?, interval, now) {
            continue;
        }
        if queue.enqueue(job.as_ref())?.is_some() {
            enqueued.push(job.kind());
        }
    }
    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testing::Fakes;

    #[test]
    fn fresh_install_registers_key_and_rotates() {
        let fakes = Fakes::new();
        let harness = fakes.harness();

        let report = boot(&harness.queue, &harness.services, Utc::now()).unwrap();

        assert!(report.pre_key_enqueued);
        assert!(!report.pull_enqueued);
        // The pre-key rotation was already queued, so only the certificate is new.
        assert_eq!(report.rotations, vec![RotateCertificateJob::KIND]);

        harness.run();
        assert!(harness.services.state.signed_pre_key_registered().unwrap());
        assert_eq!(harness.queue.pending_count(), 0);
    }

    #[test]
    fn interrupted_pull_is_rescheduled() {
        let fakes = Fakes::new();
        let harness = fakes.harness();
        let state = &harness.services.state;
        state.set_needs_message_pull(true).unwrap();
        state.set_signed_pre_key_registered(true).unwrap();
        state.set_last_rotation(RotationKind::SignedPreKey, Utc::now()).unwrap();
        state.set_last_rotation(RotationKind::SenderCertificate, Utc::now()).unwrap();

        let report = boot(&harness.queue, &harness.services, Utc::now()).unwrap();

        assert!(report.pull_enqueued);
        assert!(report.rotations.is_empty());
        assert_eq!(harness.queue.records()[0].kind, PushNotificationReceiveJob::KIND);
        // Only a completed drain clears the flag.
        assert!(state.needs_message_pull().unwrap());

        harness.run();
        assert!(!state.needs_message_pull().unwrap());
    }

    #[test]
    fn rotations_follow_their_intervals() {
        let fakes = Fakes::new();
        let harness = fakes.harness();
        let now = Utc::now();
        let state = &harness.services.state;
        state.set_last_rotation(RotationKind::SignedPreKey, now - Duration::days(1)).unwrap();
        state.set_last_rotation(RotationKind::SenderCertificate, now - Duration::hours(25)).unwrap();

        let due = schedule_due_rotations(&harness.queue, &harness.services, now).unwrap();
        assert_eq!(due, vec![RotateCertificateJob::KIND]);

        let later = now + Duration::days(1);
        let due = schedule_due_rotations(&harness.queue, &harness.services, later).unwrap();
        // The certificate rotation is still pending in its lane.
        assert_eq!(due, vec![RotateSignedPreKeyJob::KIND]);
    }
}
