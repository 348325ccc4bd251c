//! Push message delivery on top of the durable job queue.
//!
//! ## Outbound
//!
//! Send jobs run a pre-flight pipeline (build expiry, signed pre-key health,
//! sender certificate freshness), marshal attachments, quotes and shared
//! contacts, then hand the message to the transport.
//!
//! ## Inbound
//!
//! A long-lived observer reads the streaming pipe; pull jobs drain queued
//! envelopes on demand. Both take the same [`ReceiveLock`].
//!
//! ## Maintenance
//!
//! Key, certificate and profile rotations, outage detection and boot-time
//! re-admission of work left over from the last run.
//!
//! Every collaborator (transport, cipher, repositories, media) is a trait
//! object bundled in [`PushServices`].

pub mod attachments;
pub mod boot;
pub mod config;
pub mod crypto;
pub mod jobs;
pub mod media;
pub mod model;
pub mod preflight;
pub mod receive;
pub mod repository;
pub mod services;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use boot::{BootError, BootReport, boot, schedule_due_rotations};
pub use config::{ConfigError, DeliveryConfig};
pub use crypto::{CipherError, KeyMaterial, MessageCipher};
pub use jobs::{register_delivery_jobs, request_message_pull};
pub use media::{MediaConstraints, MediaError};
pub use preflight::{PreflightStage, run_preflight};
pub use receive::{IncomingMessageObserver, ObserverHandle, ReceiveLock, pull_and_process};
pub use repository::{
    DeliveryNotifier, GroupRepository, MessageDispatcher, MessageRepository, RecipientRepository,
    RepositoryError,
};
pub use services::PushServices;
pub use state::{DeliveryState, RotationKind};
pub use transport::{
    AccountManager, MessagePipe, MessageReceiver, MessageSender, OutageMonitor, TransportError,
};
