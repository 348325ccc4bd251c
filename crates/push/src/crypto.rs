//! Cipher and key material seams. The cryptography itself lives elsewhere.

use chrono::{DateTime, Utc};
use thiserror::Error;

use courier_jobs::JobError;

use crate::model::{Envelope, Plaintext, ProfileKey, SignedPreKeyRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("no session with {0}")]
    NoSession(String),

    #[error("duplicate message")]
    Duplicate,

    #[error("untrusted identity for {0}")]
    UntrustedIdentity(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("key material unavailable: {0}")]
    KeyUnavailable(String),
}

impl From<CipherError> for JobError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::UntrustedIdentity(who) => JobError::UntrustedIdentity(who),
            other => JobError::Other(other.to_string()),
        }
    }
}

pub trait MessageCipher: Send + Sync {
    fn decrypt(&self, envelope: &Envelope) -> Result<Plaintext, CipherError>;

    /// Expiry encoded in a serialized sender certificate.
    fn certificate_expiration(&self, certificate: &[u8]) -> Result<DateTime<Utc>, CipherError>;
}

pub trait KeyMaterial: Send + Sync {
    /// Generate and store a new signed pre-key. It is not active until marked so.
    fn generate_signed_pre_key(&self, now: DateTime<Utc>) -> Result<SignedPreKeyRecord, CipherError>;

    fn signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>, CipherError>;

    fn remove_signed_pre_key(&self, id: u32) -> Result<(), CipherError>;

    fn generate_profile_key(&self) -> ProfileKey;

    /// Unidentified-delivery access key for a profile key.
    fn derive_access_key(&self, profile_key: &ProfileKey) -> Vec<u8>;

    fn registration_id(&self) -> u32;
}
