//! Payload normalizer: webhook batch entries from either platform into [`InboundMessage`]s.
//!
//! Each entry is decoded on its own, so one malformed entry does not drop the rest of the batch.
//! Entries that do not carry a text or image message come back as [`Unrecognized`] and are never
//! forwarded.

use crate::channels::{
    BusinessEntry, ImageRef, InboundMessage, MessageContent, MessageTags, PageEntry, Service,
    UserTags,
};
use crate::gateway::protocol::WebhookPayload;

/// Why an entry produced no message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unrecognized {
    #[error("unsupported webhook object")]
    UnsupportedObject,
    #[error("malformed entry: {0}")]
    Malformed(String),
    #[error("entry has no messaging event")]
    NoEvent,
    #[error("entry has no change value")]
    NoChange,
    #[error("image attachment without a url")]
    MissingImageUrl,
    #[error("event carries neither text nor image")]
    NoContent,
}

/// Normalize every entry of a webhook batch. One result per entry, in batch order.
pub fn normalize(payload: &WebhookPayload) -> Vec<Result<InboundMessage, Unrecognized>> {
    match payload {
        WebhookPayload::Page { entry } => entry
            .iter()
            .map(|raw| {
                serde_json::from_value::<PageEntry>(raw.clone())
                    .map_err(|e| Unrecognized::Malformed(e.to_string()))
                    .and_then(|e| normalize_page_entry(&e))
            })
            .collect(),
        WebhookPayload::WhatsAppBusinessAccount { entry } => entry
            .iter()
            .map(|raw| {
                serde_json::from_value::<BusinessEntry>(raw.clone())
                    .map_err(|e| Unrecognized::Malformed(e.to_string()))
                    .and_then(|e| normalize_business_entry(&e))
            })
            .collect(),
        WebhookPayload::Unsupported => vec![Err(Unrecognized::UnsupportedObject)],
    }
}

/// First messaging event of a page entry: text wins, then a first attachment of type image.
pub fn normalize_page_entry(entry: &PageEntry) -> Result<InboundMessage, Unrecognized> {
    let event = entry.messaging.first().ok_or(Unrecognized::NoEvent)?;
    let message = event.message.as_ref().ok_or(Unrecognized::NoContent)?;

    let content = match message.text.as_deref() {
        Some(text) if !text.is_empty() => MessageContent::Text(text.to_string()),
        _ => {
            let attachment = message
                .attachments
                .first()
                .filter(|a| a.typ == "image")
                .ok_or(Unrecognized::NoContent)?;
            let url = attachment
                .payload
                .as_ref()
                .and_then(|p| p.url.clone())
                .filter(|u| !u.is_empty())
                .ok_or(Unrecognized::MissingImageUrl)?;
            MessageContent::Image(ImageRef::Messenger { url })
        }
    };

    Ok(InboundMessage {
        sender_id: event.sender.id.clone(),
        content,
        user_tags: UserTags::facebook(),
        message_tags: MessageTags::default(),
    })
}

/// First change value of a business entry; tags always carry the account and phone metadata.
pub fn normalize_business_entry(entry: &BusinessEntry) -> Result<InboundMessage, Unrecognized> {
    let value = &entry.changes.first().ok_or(Unrecognized::NoChange)?.value;

    let user_tags = UserTags {
        service: Service::Whatsapp,
        wp_id: Some(entry.id.clone()),
        phone: Some(value.metadata.display_phone_number.clone()),
        phone_id: Some(value.metadata.phone_number_id.clone()),
        name: value
            .contacts
            .first()
            .and_then(|c| c.profile.as_ref())
            .map(|p| p.name.clone()),
    };
    let message_tags = MessageTags {
        wp_id: Some(value.metadata.phone_number_id.clone()),
    };

    let message = value.messages.first().ok_or(Unrecognized::NoContent)?;
    let content = if let Some(text) = &message.text {
        if text.body.is_empty() {
            return Err(Unrecognized::NoContent);
        }
        MessageContent::Text(text.body.clone())
    } else if message.typ.as_deref() == Some("image") {
        let media = message.image.as_ref().ok_or(Unrecognized::MissingImageUrl)?;
        MessageContent::Image(ImageRef::WhatsApp {
            media_id: media.id.clone(),
        })
    } else {
        return Err(Unrecognized::NoContent);
    };

    Ok(InboundMessage {
        sender_id: message.from.clone(),
        content,
        user_tags,
        message_tags,
    })
}
