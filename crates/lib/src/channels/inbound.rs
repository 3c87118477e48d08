//! Inbound message from a platform webhook, normalized for forwarding to the aggregator.

use serde::Serialize;

/// Source platform of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Facebook,
    Whatsapp,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Facebook => "facebook",
            Service::Whatsapp => "whatsapp",
        }
    }
}

/// User-level tags forwarded with every message (`user_tags.*` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserTags {
    pub service: Service,
    /// Business account id (entry id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wp_id: Option<String>,
    /// Display phone number of the business account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Phone-number id of the business account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_id: Option<String>,
    /// Contact profile name, when the platform sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UserTags {
    pub fn facebook() -> Self {
        Self {
            service: Service::Facebook,
            wp_id: None,
            phone: None,
            phone_id: None,
            name: None,
        }
    }
}

/// Message-level tags (`message_tags.*` on the wire). `wp_id` carries the phone-number id
/// the aggregator echoes back so replies route through the business send API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageTags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wp_id: Option<String>,
}

/// Platform-specific handle the image fetcher resolves into bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Direct download URL from the attachment payload.
    Messenger { url: String },
    /// Media id; resolved to a short-lived URL through the Graph API.
    WhatsApp { media_id: String },
}

impl ImageRef {
    pub fn service(&self) -> Service {
        match self {
            ImageRef::Messenger { .. } => Service::Facebook,
            ImageRef::WhatsApp { .. } => Service::Whatsapp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Image(ImageRef),
}

/// One normalized webhook event. Built by the normalizer, consumed once by the forwarder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender_id: String,
    pub content: MessageContent,
    pub user_tags: UserTags,
    pub message_tags: MessageTags,
}
