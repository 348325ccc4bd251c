//! Outgoing attachment, quote and shared-contact marshaling.

use tracing::{debug, warn};

use courier_events::{AttachmentProgress, EventBus};
use courier_jobs::JobError;

use crate::model::{
    Attachment, AttachmentPointer, OutboundContact, OutboundQuote, Quote, QuotedAttachment,
    SharedContact,
};
use crate::services::PushServices;

/// Bring every attachment within the media constraints.
///
/// Satisfied JPEGs are still re-encoded once to strip metadata. Anything
/// transcoded is written back to the message repository, and attachments
/// already marked transcoded pass through untouched on retries.
pub fn prepare_attachments(
    services: &PushServices,
    message_id: u64,
    attachments: &[Attachment],
) -> Result<Vec<Attachment>, JobError> {
    let media = &services.media;
    let mut prepared = Vec::with_capacity(attachments.len());
    let mut changed = false;

    for attachment in attachments {
        if attachment.transcoded && media.is_satisfied(attachment) {
            prepared.push(attachment.clone());
        } else if media.is_satisfied(attachment) {
            if attachment.is_jpeg() {
                prepared.push(attachment.with_media(media.resize(attachment)?));
                changed = true;
            } else {
                prepared.push(attachment.clone());
            }
        } else if media.can_resize(attachment) {
            prepared.push(attachment.with_media(media.resize(attachment)?));
            changed = true;
        } else {
            return Err(JobError::undeliverable(format!(
                "{} attachment of {} bytes cannot meet size constraints",
                attachment.content_type,
                attachment.size()
            )));
        }
    }

    if changed {
        services.messages.replace_attachments(message_id, &prepared)?;
        debug!(message_id, "stored transcoded attachments");
    }
    Ok(prepared)
}

/// Upload `attachment`, publishing progress under `index`.
pub fn upload_attachment(
    services: &PushServices,
    message_id: u64,
    index: usize,
    attachment: &Attachment,
) -> Result<AttachmentPointer, JobError> {
    let progress = &services.progress;
    let pointer = services.sender.upload_attachment(attachment, &mut |total, sent| {
        let event = AttachmentProgress {
            message_id,
            attachment_index: index,
            total,
            progress: sent,
        };
        if let Err(err) = progress.publish(event) {
            debug!(message_id, error = ?err, "dropped attachment progress event");
        }
    })?;
    Ok(pointer)
}

/// Upload every attachment that has data. Empty ones are skipped with a warning.
pub fn upload_attachments(
    services: &PushServices,
    message_id: u64,
    attachments: &[Attachment],
) -> Result<Vec<AttachmentPointer>, JobError> {
    let mut pointers = Vec::with_capacity(attachments.len());
    for (index, attachment) in attachments.iter().enumerate() {
        if attachment.size() == 0 {
            warn!(message_id, index, "outgoing attachment has no data, skipping");
            continue;
        }
        pointers.push(upload_attachment(services, message_id, index, attachment)?);
    }
    Ok(pointers)
}

/// Marshal a quote, attaching thumbnails of quoted images and videos.
///
/// Missing source data just omits the thumbnail. A thumbnail that fails to
/// render drops that quoted attachment but keeps the quote.
pub fn quote_for(
    services: &PushServices,
    message_id: u64,
    quote: Option<&Quote>,
) -> Result<Option<OutboundQuote>, JobError> {
    let Some(quote) = quote else {
        return Ok(None);
    };

    let mut attachments = Vec::with_capacity(quote.attachments.len());
    for attachment in &quote.attachments {
        let source = if attachment.is_image() {
            attachment.data.as_deref()
        } else if attachment.is_video() {
            attachment.thumbnail.as_deref()
        } else {
            None
        };

        let thumbnail = match source {
            Some(bytes) => match services.media.thumbnail(bytes, &attachment.content_type) {
                Ok(media) => {
                    let preview = Attachment {
                        width: media.width,
                        height: media.height,
                        ..Attachment::new(media.content_type, media.data)
                    };
                    Some(services.sender.upload_attachment(&preview, &mut |_, _| {})?)
                }
                Err(err) => {
                    warn!(message_id, quote_id = quote.id, error = %err, "failed to render quote thumbnail");
                    continue;
                }
            },
            None => None,
        };

        attachments.push(QuotedAttachment {
            content_type: attachment.content_type.clone(),
            file_name: attachment.file_name.clone(),
            thumbnail,
        });
    }

    Ok(Some(OutboundQuote {
        id: quote.id,
        author: quote.author.clone(),
        text: quote.text.clone(),
        attachments,
    }))
}

pub fn shared_contacts_for(
    services: &PushServices,
    message_id: u64,
    contacts: &[SharedContact],
) -> Result<Vec<OutboundContact>, JobError> {
    contacts
        .iter()
        .map(|contact| -> Result<OutboundContact, JobError> {
            let avatar = match &contact.avatar {
                Some(avatar) if avatar.attachment.size() > 0 => {
                    let pointer = services.sender.upload_attachment(&avatar.attachment, &mut |_, _| {})?;
                    Some((pointer, avatar.is_profile))
                }
                Some(_) => {
                    warn!(message_id, contact = %contact.name, "contact avatar has no data");
                    None
                }
                None => None,
            };
            Ok(OutboundContact {
                name: contact.name.clone(),
                phone_numbers: contact.phone_numbers.clone(),
                avatar,
            })
        })
        .collect()
}
