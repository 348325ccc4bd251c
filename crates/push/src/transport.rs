//! Push service client seams.

use std::time::Duration;

use thiserror::Error;

use courier_core::Address;
use courier_jobs::JobError;

use crate::model::{
    AccessContext, AccountAttributes, Attachment, AttachmentPointer, AvatarPointer, Envelope,
    OutboundMessage, ProfileKey, SignedPreKeyRecord, SyncMessage,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("push service responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("untrusted identity for {0}")]
    UntrustedIdentity(String),

    #[error("read timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

impl TransportError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// The service no longer accepts this device's credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Status { status: 401 | 403, .. })
    }
}

impl From<TransportError> for JobError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) => JobError::Network(msg),
            TransportError::Timeout | TransportError::Closed => JobError::Network(err.to_string()),
            TransportError::Status { status: 401 | 403, message } => JobError::Authentication(message),
            TransportError::Status { status, message } => JobError::Server { status, message },
            TransportError::UntrustedIdentity(who) => JobError::UntrustedIdentity(who),
            TransportError::TooLarge { .. } => JobError::Undeliverable(err.to_string()),
        }
    }
}

pub trait MessageSender: Send + Sync {
    fn send_message(
        &self,
        destination: &Address,
        access: &AccessContext,
        message: &OutboundMessage,
    ) -> Result<(), TransportError>;

    fn send_sync_message(&self, message: &SyncMessage, access: &AccessContext) -> Result<(), TransportError>;

    /// Upload `attachment`, reporting `(total, progress)` in bytes as it goes.
    fn upload_attachment(
        &self,
        attachment: &Attachment,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<AttachmentPointer, TransportError>;
}

/// A streaming connection that yields envelopes as the server pushes them.
pub trait MessagePipe: Send {
    /// Wait up to `timeout` for the next envelope.
    fn read(&mut self, timeout: Duration) -> Result<Envelope, TransportError>;
}

pub trait MessageReceiver: Send + Sync {
    /// Drain every queued envelope, handing each to `on_envelope`.
    fn retrieve_messages(&self, on_envelope: &mut dyn FnMut(Envelope)) -> Result<(), TransportError>;

    fn open_pipe(&self) -> Result<Box<dyn MessagePipe>, TransportError>;

    fn retrieve_attachment(&self, pointer: &AvatarPointer, max_size: u64) -> Result<Vec<u8>, TransportError>;
}

pub trait AccountManager: Send + Sync {
    fn set_signed_pre_key(&self, record: &SignedPreKeyRecord) -> Result<(), TransportError>;

    /// Fetch a fresh sender certificate.
    fn sender_certificate(&self) -> Result<Vec<u8>, TransportError>;

    fn set_profile_name(&self, key: &ProfileKey, name: Option<&str>) -> Result<(), TransportError>;

    fn set_profile_avatar(&self, key: &ProfileKey, avatar: Option<&[u8]>) -> Result<(), TransportError>;

    fn set_account_attributes(&self, attributes: &AccountAttributes) -> Result<(), TransportError>;
}

/// Tells a whole-service outage apart from per-message failures.
pub trait OutageMonitor: Send + Sync {
    /// `Ok(false)` when the service is known to be down.
    fn service_reachable(&self) -> Result<bool, TransportError>;
}
