use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use courier_jobs::{Job, JobContext, JobError, JobParameters};

use crate::jobs::NoPayload;
use crate::model::AccountAttributes;
use crate::services::PushServices;

/// Replaces our profile key and re-uploads the profile under it.
pub struct RotateProfileKeyJob {
    services: Arc<PushServices>,
}

impl RotateProfileKeyJob {
    pub const KIND: &'static str = "rotate_profile_key";
    pub const LANE: &'static str = "__rotate_profile_key__";

    pub fn new(services: Arc<PushServices>) -> Self {
        Self { services }
    }

    pub fn from_payload(services: Arc<PushServices>, _payload: NoPayload) -> Self {
        Self::new(services)
    }
}

impl Job for RotateProfileKeyJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        JobParameters::builder()
            .group_id(Self::LANE)
            .ignore_duplicates()
            .network()
            .build()
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(NoPayload::default())?)
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let services = &self.services;
        let key = services.keys.generate_profile_key();

        let name = services.state.profile_name()?;
        let avatar = services.state.profile_avatar()?;
        services.accounts.set_profile_name(&key, name.as_deref())?;
        services.accounts.set_profile_avatar(&key, avatar.as_deref())?;

        // Only adopt the key once the server holds a profile encrypted with it.
        services.state.set_profile_key(&key)?;
        info!(job_id = %ctx.job_id(), "profile key rotated");

        ctx.enqueue(&RefreshAttributesJob::new(services.clone()))?;
        Ok(())
    }

    fn on_canceled(&mut self, ctx: &JobContext<'_>) {
        warn!(job_id = %ctx.job_id(), "failed to rotate profile key");
    }
}

/// Pushes the account attributes derived from local state to the server.
pub struct RefreshAttributesJob {
    services: Arc<PushServices>,
}

impl RefreshAttributesJob {
    pub const KIND: &'static str = "refresh_attributes";

    pub fn new(services: Arc<PushServices>) -> Self {
        Self { services }
    }

    pub fn from_payload(services: Arc<PushServices>, _payload: NoPayload) -> Self {
        Self::new(services)
    }
}

impl Job for RefreshAttributesJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        JobParameters::builder().group_id(Self::KIND).network().build()
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(NoPayload::default())?)
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let services = &self.services;
        let attributes = AccountAttributes {
            registration_id: services.keys.registration_id(),
            fetches_messages: services.state.fetches_messages()?,
            unidentified_access_key: services
                .state
                .profile_key()?
                .map(|key| services.keys.derive_access_key(&key)),
            unrestricted_unidentified_access: services.state.unrestricted_unidentified_access()?,
        };

        services.accounts.set_account_attributes(&attributes)?;
        info!(job_id = %ctx.job_id(), registration_id = attributes.registration_id, "account attributes refreshed");
        Ok(())
    }

    fn on_canceled(&mut self, ctx: &JobContext<'_>) {
        warn!(job_id = %ctx.job_id(), "failed to refresh account attributes");
    }
}
