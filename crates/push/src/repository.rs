//! Local message, group and recipient storage seams.

use thiserror::Error;

use courier_core::{Address, GroupId};
use courier_jobs::JobError;

use crate::model::{Attachment, Envelope, GroupRecord, OutgoingMessage, Plaintext, RecipientSettings};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<RepositoryError> for JobError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => JobError::MalformedState(format!("{what} no longer exists")),
            RepositoryError::Storage(msg) => JobError::Other(msg),
        }
    }
}

pub trait MessageRepository: Send + Sync {
    fn message(&self, message_id: u64) -> Result<Option<OutgoingMessage>, RepositoryError>;

    fn is_sent(&self, message_id: u64) -> Result<bool, RepositoryError>;

    fn mark_sent(&self, message_id: u64, unidentified: bool) -> Result<(), RepositoryError>;

    fn mark_failed(&self, message_id: u64) -> Result<(), RepositoryError>;

    /// Swap in transcoded attachments so a retry does not transcode again.
    fn replace_attachments(&self, message_id: u64, attachments: &[Attachment]) -> Result<(), RepositoryError>;
}

pub trait GroupRepository: Send + Sync {
    fn group(&self, id: &GroupId) -> Result<Option<GroupRecord>, RepositoryError>;

    fn update_avatar(&self, id: &GroupId, avatar: Vec<u8>) -> Result<(), RepositoryError>;
}

pub trait RecipientRepository: Send + Sync {
    fn settings(&self, address: &Address) -> Result<RecipientSettings, RepositoryError>;

    fn blocked(&self) -> Result<Vec<Address>, RepositoryError>;
}

/// Hands decrypted content to the rest of the application.
pub trait MessageDispatcher: Send + Sync {
    fn dispatch(&self, envelope: &Envelope, plaintext: Plaintext) -> Result<(), RepositoryError>;
}

/// User-facing failure surface.
pub trait DeliveryNotifier: Send + Sync {
    fn message_delivery_failed(&self, destination: &Address, message_id: u64);
}
