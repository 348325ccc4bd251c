use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use courier_jobs::{Job, JobContext, JobError, JobParameters};

use crate::config::to_chrono;
use crate::jobs::NoPayload;
use crate::services::PushServices;
use crate::state::RotationKind;

/// Generates a signed pre-key, publishes it and makes it active.
///
/// Successful rotations reset the failure counter; each cancellation bumps it,
/// which is what send pre-flight watches.
pub struct RotateSignedPreKeyJob {
    services: Arc<PushServices>,
}

impl RotateSignedPreKeyJob {
    pub const KIND: &'static str = "rotate_signed_pre_key";
    pub const LANE: &'static str = "__rotate_signed_pre_key__";

    pub fn new(services: Arc<PushServices>) -> Self {
        Self { services }
    }

    pub fn from_payload(services: Arc<PushServices>, _payload: NoPayload) -> Self {
        Self::new(services)
    }
}

impl Job for RotateSignedPreKeyJob {
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
        info!(job_id = %ctx.job_id(), "rotating signed pre-key");
        let services = &self.services;

        let record = services.keys.generate_signed_pre_key(ctx.now())?;
        services.accounts.set_signed_pre_key(&record)?;

        services.state.set_active_signed_pre_key_id(record.id)?;
        services.state.set_signed_pre_key_registered(true)?;
        services.state.reset_signed_pre_key_failures()?;
        services.state.set_last_rotation(RotationKind::SignedPreKey, ctx.now())?;

        ctx.enqueue(&CleanPreKeysJob::new(services.clone()))?;
        Ok(())
    }

    fn on_should_retry(&self, error: &JobError) -> bool {
        match error {
            JobError::Network(_) => true,
            JobError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    fn on_canceled(&mut self, ctx: &JobContext<'_>) {
        match self.services.state.increment_signed_pre_key_failures() {
            Ok(failures) => warn!(job_id = %ctx.job_id(), failures, "signed pre-key rotation gave up"),
            Err(err) => warn!(job_id = %ctx.job_id(), error = %err, "failed to record signed pre-key rotation failure"),
        }
    }
}

/// Removes superseded signed pre-keys past the archive age.
///
/// The active key and the newest superseded one are always kept so messages
/// encrypted to a just-replaced key still decrypt.
pub struct CleanPreKeysJob {
    services: Arc<PushServices>,
}

impl CleanPreKeysJob {
    pub const KIND: &'static str = "clean_pre_keys";
    pub const LANE: &'static str = "__clean_pre_keys__";

    pub fn new(services: Arc<PushServices>) -> Self {
        Self { services }
    }

    pub fn from_payload(services: Arc<PushServices>, _payload: NoPayload) -> Self {
        Self::new(services)
    }
}

impl Job for CleanPreKeysJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        JobParameters::builder()
            .group_id(Self::LANE)
            .ignore_duplicates()
            .build()
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(NoPayload::default())?)
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let services = &self.services;
        let Some(active) = services.state.active_signed_pre_key_id()? else {
            info!(job_id = %ctx.job_id(), "no active signed pre-key, nothing to clean");
            return Ok(());
        };

        let mut superseded: Vec<_> = services
            .keys
            .signed_pre_keys()?
            .into_iter()
            .filter(|record| record.id != active)
            .collect();
        superseded.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let cutoff = ctx
            .now()
            .checked_sub_signed(to_chrono(services.config.signed_pre_key_archive_age));
        let mut removed = 0;
        for record in superseded.iter().skip(1) {
            if cutoff.is_some_and(|cutoff| record.created_at < cutoff) {
                services.keys.remove_signed_pre_key(record.id)?;
                removed += 1;
            }
        }

        info!(job_id = %ctx.job_id(), active, removed, "cleaned signed pre-keys");
        Ok(())
    }

    fn on_canceled(&mut self, ctx: &JobContext<'_>) {
        warn!(job_id = %ctx.job_id(), "failed to clean signed pre-keys");
    }
}
