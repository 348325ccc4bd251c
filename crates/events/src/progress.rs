use serde::{Deserialize, Serialize};

/// Upload progress for one attachment of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentProgress {
    pub message_id: u64,
    pub attachment_index: usize,
    pub total: u64,
    pub progress: u64,
}

impl AttachmentProgress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.progress >= self.total
    }
}
