//! Message, key and account shapes exchanged with the collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::{Address, GroupId};

/// An encrypted envelope as delivered by the push service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub source: Address,
    pub source_device: u32,
    /// Sender timestamp in milliseconds.
    pub timestamp: i64,
    /// Server-assigned identifier, unique per envelope.
    pub server_guid: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plaintext {
    pub body: Vec<u8>,
}

/// A locally stored attachment of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub content_type: String,
    pub file_name: Option<String>,
    pub data: Option<Vec<u8>>,
    pub thumbnail: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub voice_note: bool,
    pub caption: Option<String>,
    /// Already passed through the media constraints once.
    pub transcoded: bool,
}

impl Attachment {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn size(&self) -> u64 {
        self.data.as_ref().map_or(0, |d| d.len() as u64)
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    pub fn is_video(&self) -> bool {
        self.content_type.starts_with("video/")
    }

    pub fn is_jpeg(&self) -> bool {
        matches!(self.content_type.as_str(), "image/jpeg" | "image/jpg")
    }

    /// Copy of this attachment carrying transcoded media.
    pub fn with_media(&self, media: MediaData) -> Self {
        Self {
            content_type: media.content_type,
            data: Some(media.data),
            width: media.width,
            height: media.height,
            transcoded: true,
            ..self.clone()
        }
    }
}

/// Output of a media transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaData {
    pub data: Vec<u8>,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
}

/// Server-side handle to an uploaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPointer {
    pub remote_id: u64,
    pub content_type: String,
    pub key: Vec<u8>,
    pub size: u64,
    pub digest: Option<Vec<u8>>,
    pub file_name: Option<String>,
    pub width: u32,
    pub height: u32,
    pub voice_note: bool,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: i64,
    pub author: Address,
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedAttachment {
    pub content_type: String,
    pub file_name: Option<String>,
    pub thumbnail: Option<AttachmentPointer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundQuote {
    pub id: i64,
    pub author: Address,
    pub text: Option<String>,
    pub attachments: Vec<QuotedAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactAvatar {
    pub attachment: Attachment,
    pub is_profile: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedContact {
    pub name: String,
    pub phone_numbers: Vec<String>,
    pub avatar: Option<ContactAvatar>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundContact {
    pub name: String,
    pub phone_numbers: Vec<String>,
    pub avatar: Option<(AttachmentPointer, bool)>,
}

/// An outgoing message as stored by the message repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message_id: u64,
    pub destination: Address,
    pub body: Option<String>,
    pub attachments: Vec<Attachment>,
    pub quote: Option<Quote>,
    pub shared_contacts: Vec<SharedContact>,
    pub expires_in_secs: u32,
    /// Sent timestamp in milliseconds.
    pub timestamp: i64,
}

impl OutgoingMessage {
    pub fn text(message_id: u64, destination: Address, body: impl Into<String>, timestamp: i64) -> Self {
        Self {
            message_id,
            destination,
            body: Some(body.into()),
            attachments: Vec::new(),
            quote: None,
            shared_contacts: Vec::new(),
            expires_in_secs: 0,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    Update,
    RequestInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupContext {
    pub id: GroupId,
    pub action: GroupAction,
    pub title: Option<String>,
    pub members: Vec<Address>,
    pub avatar: Option<AttachmentPointer>,
}

impl GroupContext {
    pub fn request_info(id: GroupId) -> Self {
        Self {
            id,
            action: GroupAction::RequestInfo,
            title: None,
            members: Vec::new(),
            avatar: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataMessage {
    pub timestamp: i64,
    pub body: Option<String>,
    pub attachments: Vec<AttachmentPointer>,
    pub quote: Option<OutboundQuote>,
    pub shared_contacts: Vec<OutboundContact>,
    pub group: Option<GroupContext>,
    pub profile_key: Option<ProfileKey>,
    pub expires_in_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptMessage {
    pub timestamps: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Data(DataMessage),
    DeliveryReceipt(ReceiptMessage),
}

impl OutboundMessage {
    pub fn timestamp(&self) -> i64 {
        match self {
            OutboundMessage::Data(data) => data.timestamp,
            OutboundMessage::DeliveryReceipt(receipt) => receipt.timestamps.first().copied().unwrap_or(0),
        }
    }
}

/// Messages addressed to the account's own linked devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    Blocked {
        numbers: Vec<String>,
        groups: Vec<GroupId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnidentifiedAccess {
    pub access_key: Vec<u8>,
    pub certificate: Vec<u8>,
}

/// How a message is authenticated to the service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessContext {
    pub unidentified: Option<UnidentifiedAccess>,
}

impl AccessContext {
    pub fn identified() -> Self {
        Self::default()
    }

    pub fn is_unidentified(&self) -> bool {
        self.unidentified.is_some()
    }
}

/// Where a group avatar lives on the attachment server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarPointer {
    pub remote_id: u64,
    pub content_type: String,
    pub key: Vec<u8>,
    pub digest: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub title: String,
    pub members: Vec<Address>,
    /// Locally stored avatar image.
    pub avatar: Option<Vec<u8>>,
    pub avatar_pointer: Option<AvatarPointer>,
    pub expires_in_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecipientSettings {
    pub is_system_contact: bool,
    pub profile_sharing: bool,
    pub profile_key: Option<ProfileKey>,
    pub expires_in_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileKey(pub Vec<u8>);

impl ProfileKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    pub id: u32,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAttributes {
    pub registration_id: u32,
    pub fetches_messages: bool,
    pub unidentified_access_key: Option<Vec<u8>>,
    pub unrestricted_unidentified_access: bool,
}
