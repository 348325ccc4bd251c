//! Process-wide delivery flags and counters.
//!
//! Every accessor goes through the injected [`KeyValueStore`], so concurrent
//! jobs observe each other's writes and counters never lose updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use courier_jobs::{KeyValueStore, KeyValueStoreExt, StoreError};

use crate::model::ProfileKey;

mod keys {
    pub const SIGNED_PRE_KEY_FAILURES: &str = "signed_pre_key_failure_count";
    pub const SIGNED_PRE_KEY_REGISTERED: &str = "signed_pre_key_registered";
    pub const ACTIVE_SIGNED_PRE_KEY: &str = "active_signed_pre_key_id";
    pub const NEEDS_MESSAGE_PULL: &str = "needs_message_pull";
    pub const SENDER_CERTIFICATE: &str = "sender_certificate";
    pub const SERVICE_OUTAGE: &str = "service_outage";
    pub const PROFILE_KEY: &str = "profile_key";
    pub const PROFILE_NAME: &str = "profile_name";
    pub const PROFILE_AVATAR: &str = "profile_avatar";
    pub const MULTI_DEVICE: &str = "multi_device";
    pub const FETCHES_MESSAGES: &str = "fetches_messages";
    pub const UNRESTRICTED_ACCESS: &str = "unrestricted_unidentified_access";
    pub const UNAUTHORIZED: &str = "unauthorized_received";
}

/// Periodic maintenance tasks whose last run is remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationKind {
    SignedPreKey,
    SenderCertificate,
}

impl RotationKind {
    fn key(self) -> &'static str {
        match self {
            RotationKind::SignedPreKey => "last_signed_pre_key_rotation",
            RotationKind::SenderCertificate => "last_sender_certificate_rotation",
        }
    }
}

/// Pull requests are counted rather than flagged, so a request that arrives
/// while a drain is running survives that drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PullRequests {
    requested: u64,
    handled: u64,
}

impl PullRequests {
    fn pending(self) -> bool {
        self.requested > self.handled
    }
}

#[derive(Clone)]
pub struct DeliveryState {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryState").finish_non_exhaustive()
    }
}

impl DeliveryState {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn signed_pre_key_failure_count(&self) -> Result<i64, StoreError> {
        Ok(self.store.get_as::<i64>(keys::SIGNED_PRE_KEY_FAILURES)?.unwrap_or(0))
    }

    /// Returns the new count.
    pub fn increment_signed_pre_key_failures(&self) -> Result<i64, StoreError> {
        self.store.increment(keys::SIGNED_PRE_KEY_FAILURES, 1)
    }

    pub fn reset_signed_pre_key_failures(&self) -> Result<(), StoreError> {
        self.store.put(keys::SIGNED_PRE_KEY_FAILURES, Value::from(0))
    }

    pub fn signed_pre_key_registered(&self) -> Result<bool, StoreError> {
        self.store.get_bool(keys::SIGNED_PRE_KEY_REGISTERED)
    }

    pub fn set_signed_pre_key_registered(&self, registered: bool) -> Result<(), StoreError> {
        self.store.put(keys::SIGNED_PRE_KEY_REGISTERED, Value::Bool(registered))
    }

    pub fn active_signed_pre_key_id(&self) -> Result<Option<u32>, StoreError> {
        self.store.get_as(keys::ACTIVE_SIGNED_PRE_KEY)
    }

    pub fn set_active_signed_pre_key_id(&self, id: u32) -> Result<(), StoreError> {
        self.store.put_as(keys::ACTIVE_SIGNED_PRE_KEY, &id)
    }

    fn pull_requests(&self) -> Result<PullRequests, StoreError> {
        Ok(self.store.get_as(keys::NEEDS_MESSAGE_PULL)?.unwrap_or_default())
    }

    fn update_pull_requests(&self, f: impl Fn(PullRequests) -> PullRequests) -> Result<PullRequests, StoreError> {
        let mut before = PullRequests::default();
        self.store.update(keys::NEEDS_MESSAGE_PULL, &mut |current| {
            before = current
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            serde_json::to_value(f(before)).ok()
        })?;
        Ok(before)
    }

    pub fn needs_message_pull(&self) -> Result<bool, StoreError> {
        Ok(self.pull_requests()?.pending())
    }

    /// `true` records a new pull request; `false` settles every request so far.
    pub fn set_needs_message_pull(&self, needed: bool) -> Result<(), StoreError> {
        if needed {
            self.mark_needs_message_pull()?;
        } else {
            self.update_pull_requests(|r| PullRequests {
                handled: r.requested,
                ..r
            })?;
        }
        Ok(())
    }

    /// Record a pull request and report whether one was already pending.
    pub fn mark_needs_message_pull(&self) -> Result<bool, StoreError> {
        let before = self.update_pull_requests(|r| PullRequests {
            requested: r.requested.saturating_add(1),
            ..r
        })?;
        Ok(before.pending())
    }

    /// Number of pull requests recorded so far. Take it before a drain.
    pub fn message_pull_generation(&self) -> Result<u64, StoreError> {
        Ok(self.pull_requests()?.requested)
    }

    /// Settle the requests up to `generation`. Returns whether the flag is now
    /// clear, i.e. nothing asked for another pull in the meantime.
    pub fn clear_needs_message_pull(&self, generation: u64) -> Result<bool, StoreError> {
        let before = self.update_pull_requests(|r| PullRequests {
            handled: r.handled.max(generation.min(r.requested)),
            ..r
        })?;
        Ok(before.requested <= generation)
    }

    pub fn unauthorized(&self) -> Result<bool, StoreError> {
        self.store.get_bool(keys::UNAUTHORIZED)
    }

    pub fn set_unauthorized(&self, unauthorized: bool) -> Result<(), StoreError> {
        self.store.put(keys::UNAUTHORIZED, Value::Bool(unauthorized))
    }

    pub fn sender_certificate(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.get_as(keys::SENDER_CERTIFICATE)
    }

    pub fn set_sender_certificate(&self, certificate: &[u8]) -> Result<(), StoreError> {
        self.store.put_as(keys::SENDER_CERTIFICATE, &certificate)
    }

    pub fn service_outage(&self) -> Result<bool, StoreError> {
        self.store.get_bool(keys::SERVICE_OUTAGE)
    }

    pub fn set_service_outage(&self, down: bool) -> Result<(), StoreError> {
        self.store.put(keys::SERVICE_OUTAGE, Value::Bool(down))
    }

    pub fn profile_key(&self) -> Result<Option<ProfileKey>, StoreError> {
        self.store.get_as(keys::PROFILE_KEY)
    }

    pub fn set_profile_key(&self, key: &ProfileKey) -> Result<(), StoreError> {
        self.store.put_as(keys::PROFILE_KEY, key)
    }

    pub fn profile_name(&self) -> Result<Option<String>, StoreError> {
        self.store.get_as(keys::PROFILE_NAME)
    }

    pub fn set_profile_name(&self, name: &str) -> Result<(), StoreError> {
        self.store.put_as(keys::PROFILE_NAME, &name)
    }

    pub fn profile_avatar(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.get_as(keys::PROFILE_AVATAR)
    }

    pub fn set_profile_avatar(&self, avatar: &[u8]) -> Result<(), StoreError> {
        self.store.put_as(keys::PROFILE_AVATAR, &avatar)
    }

    pub fn is_multi_device(&self) -> Result<bool, StoreError> {
        self.store.get_bool(keys::MULTI_DEVICE)
    }

    pub fn set_multi_device(&self, linked: bool) -> Result<(), StoreError> {
        self.store.put(keys::MULTI_DEVICE, Value::Bool(linked))
    }

    pub fn fetches_messages(&self) -> Result<bool, StoreError> {
        self.store.get_bool(keys::FETCHES_MESSAGES)
    }

    pub fn set_fetches_messages(&self, fetches: bool) -> Result<(), StoreError> {
        self.store.put(keys::FETCHES_MESSAGES, Value::Bool(fetches))
    }

    pub fn unrestricted_unidentified_access(&self) -> Result<bool, StoreError> {
        self.store.get_bool(keys::UNRESTRICTED_ACCESS)
    }

    pub fn set_unrestricted_unidentified_access(&self, allowed: bool) -> Result<(), StoreError> {
        self.store.put(keys::UNRESTRICTED_ACCESS, Value::Bool(allowed))
    }

    pub fn last_rotation(&self, kind: RotationKind) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.store.get_as(kind.key())
    }

    pub fn set_last_rotation(&self, kind: RotationKind, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.put_as(kind.key(), &at)
    }
}
