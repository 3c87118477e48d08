//! Chat platforms the relay talks to (page-based Messenger, WhatsApp Business).
//!
//! Webhook payload types for each platform, the canonical inbound message they normalize into,
//! and the send APIs replies go out through.

mod handle;
mod inbound;
mod messenger;
mod whatsapp;

pub use handle::{ChannelError, ChannelHandle, ReplyTarget};
pub use inbound::{ImageRef, InboundMessage, MessageContent, MessageTags, Service, UserTags};
pub use messenger::{
    Attachment, AttachmentPayload, MessagingEvent, MessengerChannel, MessengerMessage, PageEntry,
    Participant,
};
pub use whatsapp::{
    BusinessEntry, BusinessMessage, Change, ChangeValue, Contact, Media, Metadata, Profile,
    TextBody, WhatsAppChannel,
};
