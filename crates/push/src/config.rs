//! Delivery tunables.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be an RFC 3339 timestamp: {value}")]
    InvalidTimestamp { var: &'static str, value: String },

    #[error("{var} must be a non-negative integer: {value}")]
    InvalidNumber { var: &'static str, value: String },
}

/// Knobs for the send, receive and rotation jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    /// Sends fail terminally at or after this instant.
    pub build_expires_at: Option<DateTime<Utc>>,
    /// Send pre-flight forces a rotation once failures exceed this.
    pub signed_pre_key_failure_threshold: i64,
    /// A sender certificate this close to expiry is refreshed before sending.
    pub certificate_expiration_buffer: Duration,
    pub send_retry_duration: Duration,
    pub max_avatar_size: u64,
    /// Per-read timeout on the streaming pipe.
    pub receive_timeout: Duration,
    pub reconnect_delay: Duration,
    pub signed_pre_key_rotation_interval: Duration,
    pub certificate_rotation_interval: Duration,
    /// Superseded signed pre-keys older than this are removed.
    pub signed_pre_key_archive_age: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            build_expires_at: None,
            signed_pre_key_failure_threshold: 5,
            certificate_expiration_buffer: DAY,
            send_retry_duration: DAY,
            max_avatar_size: 20 * 1024 * 1024,
            receive_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
            signed_pre_key_rotation_interval: 2 * DAY,
            certificate_rotation_interval: DAY,
            signed_pre_key_archive_age: 30 * DAY,
        }
    }
}

impl DeliveryConfig {
    /// Defaults overridden by `COURIER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("COURIER_BUILD_EXPIRES_AT") {
            let parsed = DateTime::parse_from_rfc3339(value.trim()).map_err(|_| {
                ConfigError::InvalidTimestamp {
                    var: "COURIER_BUILD_EXPIRES_AT",
                    value: value.clone(),
                }
            })?;
            config.build_expires_at = Some(parsed.with_timezone(&Utc));
        }

        if let Some(n) = number(&lookup, "COURIER_PRE_KEY_FAILURE_THRESHOLD")? {
            config.signed_pre_key_failure_threshold =
                i64::try_from(n).map_err(|_| ConfigError::InvalidNumber {
                    var: "COURIER_PRE_KEY_FAILURE_THRESHOLD",
                    value: n.to_string(),
                })?;
        }
        if let Some(n) = number(&lookup, "COURIER_CERTIFICATE_BUFFER_SECS")? {
            config.certificate_expiration_buffer = Duration::from_secs(n);
        }
        if let Some(n) = number(&lookup, "COURIER_SEND_RETRY_SECS")? {
            config.send_retry_duration = Duration::from_secs(n);
        }
        if let Some(n) = number(&lookup, "COURIER_MAX_AVATAR_BYTES")? {
            config.max_avatar_size = n;
        }
        if let Some(n) = number(&lookup, "COURIER_RECEIVE_TIMEOUT_SECS")? {
            config.receive_timeout = Duration::from_secs(n);
        }
        if let Some(n) = number(&lookup, "COURIER_RECONNECT_DELAY_SECS")? {
            config.reconnect_delay = Duration::from_secs(n);
        }
        if let Some(n) = number(&lookup, "COURIER_SIGNED_PRE_KEY_ROTATION_SECS")? {
            config.signed_pre_key_rotation_interval = Duration::from_secs(n);
        }
        if let Some(n) = number(&lookup, "COURIER_CERTIFICATE_ROTATION_SECS")? {
            config.certificate_rotation_interval = Duration::from_secs(n);
        }

        Ok(config)
    }

    pub fn with_build_expiry(mut self, at: DateTime<Utc>) -> Self {
        self.build_expires_at = Some(at);
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn is_build_expired(&self, now: DateTime<Utc>) -> bool {
        self.build_expires_at.is_some_and(|at| now >= at)
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

fn number(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        None => Ok(None),
    }
}
