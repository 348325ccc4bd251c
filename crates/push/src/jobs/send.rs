use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use courier_core::Address;
use courier_jobs::{Job, JobContext, JobError, JobParameters};

use crate::attachments::{prepare_attachments, quote_for, shared_contacts_for, upload_attachments};
use crate::jobs::ServiceOutageDetectionJob;
use crate::model::{DataMessage, OutboundMessage, OutgoingMessage};
use crate::preflight::run_preflight;
use crate::services::PushServices;

/// Which stored message to deliver, and to whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSendPayload {
    pub message_id: u64,
    pub destination: Address,
}

/// Sends to one destination share a lane so they leave in order.
fn send_parameters(services: &PushServices, destination: &Address) -> JobParameters {
    JobParameters::builder()
        .group_id(destination.as_str())
        .network()
        .retry_duration(services.config.send_retry_duration)
        .build()
}

/// Shared send flow: skip already-delivered messages, run pre-flight, load
/// the message, build it, hand it to the transport and record delivery.
fn deliver(
    services: &Arc<PushServices>,
    ctx: &JobContext<'_>,
    payload: &MessageSendPayload,
    build: impl FnOnce(&OutgoingMessage, DataMessage) -> Result<DataMessage, JobError>,
) -> Result<(), JobError> {
    let message_id = payload.message_id;
    if services.messages.is_sent(message_id)? {
        info!(job_id = %ctx.job_id(), message_id, "message already delivered, nothing to do");
        return Ok(());
    }

    run_preflight(services, ctx)?;

    let message = services
        .messages
        .message(message_id)?
        .ok_or_else(|| JobError::malformed(format!("message {message_id} no longer exists")))?;

    let recipient = services.recipients.settings(&payload.destination)?;
    let access = services.access_for(&recipient)?;
    let base = DataMessage {
        timestamp: message.timestamp,
        body: message.body.clone(),
        profile_key: services.profile_key_for(&recipient)?,
        expires_in_secs: message.expires_in_secs,
        ..DataMessage::default()
    };
    let data = build(&message, base)?;

    info!(job_id = %ctx.job_id(), message_id, attempt = ctx.attempt(), "sending message");
    services
        .sender
        .send_message(&payload.destination, &access, &OutboundMessage::Data(data))
        .map_err(|e| services.note_transport_error(e))?;
    services.messages.mark_sent(message_id, access.is_unidentified())?;
    info!(job_id = %ctx.job_id(), message_id, unidentified = access.is_unidentified(), "message sent");
    Ok(())
}

/// After the second failed attempt, check whether the whole service is down.
fn schedule_outage_check(services: &Arc<PushServices>, ctx: &JobContext<'_>) {
    if ctx.attempt() > 1 {
        info!(job_id = %ctx.job_id(), attempt = ctx.attempt(), "scheduling service outage detection");
        if let Err(err) = ctx.enqueue(&ServiceOutageDetectionJob::new(services.clone())) {
            warn!(job_id = %ctx.job_id(), error = %err, "failed to schedule service outage detection");
        }
    }
}

fn report_failure(services: &PushServices, ctx: &JobContext<'_>, payload: &MessageSendPayload) {
    warn!(job_id = %ctx.job_id(), message_id = payload.message_id, "message send failed permanently");
    if let Err(err) = services.messages.mark_failed(payload.message_id) {
        warn!(message_id = payload.message_id, error = %err, "failed to mark message as failed");
    }
    services
        .notifier
        .message_delivery_failed(&payload.destination, payload.message_id);
}

pub struct PushTextSendJob {
    services: Arc<PushServices>,
    payload: MessageSendPayload,
}

impl PushTextSendJob {
    pub const KIND: &'static str = "push_text_send";

    pub fn new(services: Arc<PushServices>, message_id: u64, destination: Address) -> Self {
        Self::from_payload(
            services,
            MessageSendPayload {
                message_id,
                destination,
            },
        )
    }

    pub fn from_payload(services: Arc<PushServices>, payload: MessageSendPayload) -> Self {
        Self { services, payload }
    }
}

impl Job for PushTextSendJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        send_parameters(&self.services, &self.payload.destination)
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(&self.payload)?)
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        deliver(&self.services, ctx, &self.payload, |_, data| Ok(data))
    }

    fn on_retry(&mut self, ctx: &JobContext<'_>) {
        schedule_outage_check(&self.services, ctx);
    }

    fn on_canceled(&mut self, ctx: &JobContext<'_>) {
        report_failure(&self.services, ctx, &self.payload);
    }
}

/// Sends a message with attachments, a quote or shared contacts.
pub struct PushMediaSendJob {
    services: Arc<PushServices>,
    payload: MessageSendPayload,
}

impl PushMediaSendJob {
    pub const KIND: &'static str = "push_media_send";

    pub fn new(services: Arc<PushServices>, message_id: u64, destination: Address) -> Self {
        Self::from_payload(
            services,
            MessageSendPayload {
                message_id,
                destination,
            },
        )
    }

    pub fn from_payload(services: Arc<PushServices>, payload: MessageSendPayload) -> Self {
        Self { services, payload }
    }
}

impl Job for PushMediaSendJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parameters(&self) -> JobParameters {
        send_parameters(&self.services, &self.payload.destination)
    }

    fn serialize(&self) -> Result<Value, JobError> {
        Ok(serde_json::to_value(&self.payload)?)
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let services = &self.services;
        let message_id = self.payload.message_id;
        deliver(services, ctx, &self.payload, |message, mut data| {
            let attachments = prepare_attachments(services, message_id, &message.attachments)?;
            data.attachments = upload_attachments(services, message_id, &attachments)?;
            data.quote = quote_for(services, message_id, message.quote.as_ref())?;
            data.shared_contacts = shared_contacts_for(services, message_id, &message.shared_contacts)?;
            Ok(data)
        })
    }

    fn on_retry(&mut self, ctx: &JobContext<'_>) {
        schedule_outage_check(&self.services, ctx);
    }

    fn on_canceled(&mut self, ctx: &JobContext<'_>) {
        report_failure(&self.services, ctx, &self.payload);
    }
}
