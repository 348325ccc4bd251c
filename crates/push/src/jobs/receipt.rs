use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use courier_core::Address;
use courier_jobs::{Job, JobContext, JobError, JobParameters};

use crate::model::{OutboundMessage, ReceiptMessage};
use crate::services::PushServices;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceiptPayload {
    pub destination: Address,
    /// Sender timestamp of the message being acknowledged.
    pub message_timestamp: i64,
}

/// Acknowledges receipt of a message back to its sender.
pub struct SendDeliveryReceiptJob {
    services: Arc<PushServices>,
    payload: DeliveryReceiptPayload,
}

impl SendDeliveryReceiptJob {
    pub const KIND: &'static str = "send_delivery_receipt";

    pub fn new(services: Arc<PushServices>, destination: Address, message_timestamp: i64) -> Self {
        Self::from_payload(
            services,
            DeliveryReceiptPayload {
                destination,
                message_timestamp,
            },
        )
    }

    pub fn from_payload(services: Arc<PushServices>, payload: DeliveryReceiptPayload) -> Self {
        Self { services, payload }
    }
}

impl Job for SendDeliveryReceiptJob {
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
        let access = self.services.access_for_address(&self.payload.destination)?;
        let receipt = OutboundMessage::DeliveryReceipt(ReceiptMessage {
            timestamps: vec![self.payload.message_timestamp],
        });
        self.services
            .sender
            .send_message(&self.payload.destination, &access, &receipt)
            .map_err(|e| self.services.note_transport_error(e))?;
        info!(job_id = %ctx.job_id(), timestamp = self.payload.message_timestamp, "delivery receipt sent");
        Ok(())
    }

    fn on_should_retry(&self, error: &JobError) -> bool {
        matches!(error, JobError::Network(_))
    }

    fn on_canceled(&mut self, ctx: &JobContext<'_>) {
        warn!(job_id = %ctx.job_id(), "failed to send delivery receipt");
    }
}
