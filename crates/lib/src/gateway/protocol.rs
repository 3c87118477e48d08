//! Wire types for the relay's HTTP endpoints.

use serde::{Deserialize, Serialize};

/// Webhook POST body, tagged by `object`. Entries stay raw here and are decoded one by one in
/// [`crate::normalize`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "object")]
pub enum WebhookPayload {
    #[serde(rename = "page")]
    Page {
        #[serde(default)]
        entry: Vec<serde_json::Value>,
    },
    #[serde(rename = "whatsapp_business_account")]
    WhatsAppBusinessAccount {
        #[serde(default)]
        entry: Vec<serde_json::Value>,
    },
    #[serde(other)]
    Unsupported,
}

impl WebhookPayload {
    pub fn object(&self) -> &'static str {
        match self {
            WebhookPayload::Page { .. } => "page",
            WebhookPayload::WhatsAppBusinessAccount { .. } => "whatsapp_business_account",
            WebhookPayload::Unsupported => "unsupported",
        }
    }

    pub fn entry_count(&self) -> usize {
        match self {
            WebhookPayload::Page { entry } | WebhookPayload::WhatsAppBusinessAccount { entry } => {
                entry.len()
            }
            WebhookPayload::Unsupported => 0,
        }
    }
}

/// Query of the subscription verification GET (`hub.mode`, `hub.verify_token`, `hub.challenge`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Reply envelope POSTed by the aggregator: `{ token, text: [..], user_id, message_tags? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_tags: Option<ReplyTags>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyTags {
    /// Business phone-number id; when set the reply goes out through WhatsApp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wp_id: Option<String>,
}

impl ReplyEnvelope {
    /// Routing hint for business messaging, if any (blank counts as absent).
    pub fn routing_hint(&self) -> Option<&str> {
        self.message_tags
            .as_ref()
            .and_then(|t| t.wp_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// Body returned for every accepted webhook or reply POST.
pub const EVENT_RECEIVED: &str = "EVENT_RECEIVED";
