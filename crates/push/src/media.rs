//! Media constraint checks applied before upload.

use thiserror::Error;

use courier_jobs::JobError;

use crate::model::{Attachment, MediaData};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("unsupported media type {0}")]
    Unsupported(String),

    #[error("failed to decode media: {0}")]
    Decode(String),

    #[error("attachment has no data")]
    MissingData,
}

impl From<MediaError> for JobError {
    fn from(err: MediaError) -> Self {
        JobError::Undeliverable(err.to_string())
    }
}

pub trait MediaConstraints: Send + Sync {
    fn is_satisfied(&self, attachment: &Attachment) -> bool;

    fn can_resize(&self, attachment: &Attachment) -> bool;

    /// Re-encode within the constraints; also strips metadata.
    fn resize(&self, attachment: &Attachment) -> Result<MediaData, MediaError>;

    /// Small JPEG preview of image bytes.
    fn thumbnail(&self, data: &[u8], content_type: &str) -> Result<MediaData, MediaError>;
}
