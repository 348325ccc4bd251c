//! The collaborator bundle injected into every delivery job.

use std::sync::Arc;

use courier_core::Address;
use courier_events::{AttachmentProgress, InMemoryEventBus};
use courier_jobs::JobError;
use tracing::warn;

use crate::config::DeliveryConfig;
use crate::crypto::{KeyMaterial, MessageCipher};
use crate::media::MediaConstraints;
use crate::model::{AccessContext, ProfileKey, RecipientSettings, UnidentifiedAccess};
use crate::receive::ReceiveLock;
use crate::repository::{
    DeliveryNotifier, GroupRepository, MessageDispatcher, MessageRepository, RecipientRepository,
};
use crate::state::DeliveryState;
use crate::transport::{AccountManager, MessageReceiver, MessageSender, OutageMonitor, TransportError};

/// Everything a delivery job needs besides its own payload.
///
/// Built once at startup and shared by the job registry, the observer and
/// boot maintenance.
pub struct PushServices {
    pub config: DeliveryConfig,
    pub state: DeliveryState,
    pub sender: Arc<dyn MessageSender>,
    pub receiver: Arc<dyn MessageReceiver>,
    pub accounts: Arc<dyn AccountManager>,
    pub cipher: Arc<dyn MessageCipher>,
    pub dispatcher: Arc<dyn MessageDispatcher>,
    pub keys: Arc<dyn KeyMaterial>,
    pub media: Arc<dyn MediaConstraints>,
    pub notifier: Arc<dyn DeliveryNotifier>,
    pub messages: Arc<dyn MessageRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub recipients: Arc<dyn RecipientRepository>,
    pub outage: Arc<dyn OutageMonitor>,
    pub progress: Arc<InMemoryEventBus<AttachmentProgress>>,
    pub receive_lock: ReceiveLock,
}

impl std::fmt::Debug for PushServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushServices")
            .field("config", &self.config)
            .field("receive_lock", &self.receive_lock)
            .finish_non_exhaustive()
    }
}

impl PushServices {
    /// Our profile key, if the recipient is allowed to see it.
    pub fn profile_key_for(&self, recipient: &RecipientSettings) -> Result<Option<ProfileKey>, JobError> {
        if !recipient.is_system_contact && !recipient.profile_sharing {
            return Ok(None);
        }
        Ok(self.state.profile_key()?)
    }

    /// Sealed-sender access for `recipient`, falling back to identified delivery.
    pub fn access_for(&self, recipient: &RecipientSettings) -> Result<AccessContext, JobError> {
        let (Some(their_key), Some(certificate)) = (&recipient.profile_key, self.state.sender_certificate()?) else {
            return Ok(AccessContext::identified());
        };
        Ok(AccessContext {
            unidentified: Some(UnidentifiedAccess {
                access_key: self.keys.derive_access_key(their_key),
                certificate,
            }),
        })
    }

    /// Remember a credential rejection so the app can tell the user this
    /// device is no longer registered. Hands `err` back unchanged.
    pub fn note_transport_error(&self, err: TransportError) -> TransportError {
        if err.is_unauthorized() {
            warn!(error = %err, "push service rejected our credentials");
            if let Err(store) = self.state.set_unauthorized(true) {
                warn!(error = %store, "failed to record unauthorized state");
            }
        }
        err
    }

    pub fn access_for_address(&self, address: &Address) -> Result<AccessContext, JobError> {
        let settings = self.recipients.settings(address)?;
        self.access_for(&settings)
    }

    /// Access for messages to our own linked devices.
    pub fn access_for_sync(&self) -> Result<AccessContext, JobError> {
        let (Some(own_key), Some(certificate)) = (self.state.profile_key()?, self.state.sender_certificate()?) else {
            return Ok(AccessContext::identified());
        };
        Ok(AccessContext {
            unidentified: Some(UnidentifiedAccess {
                access_key: self.keys.derive_access_key(&own_key),
                certificate,
            }),
        })
    }
}
