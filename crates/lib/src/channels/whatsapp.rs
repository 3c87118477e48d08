//! WhatsApp Business: webhook change types, media URL lookup, and the send API
//! (`{graph}/{phone_number_id}/messages`).

use crate::channels::handle::{check_status, ChannelError, ChannelHandle, ReplyTarget};
use async_trait::async_trait;
use serde::Deserialize;

const CHANNEL: &str = "whatsapp";

/// One `entry` of a `whatsapp_business_account` webhook.
#[derive(Debug, Deserialize)]
pub struct BusinessEntry {
    /// Business account id.
    pub id: String,
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    pub value: ChangeValue,
}

#[derive(Debug, Deserialize)]
pub struct ChangeValue {
    pub metadata: Metadata,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub messages: Vec<BusinessMessage>,
}

#[derive(Debug, Deserialize)]
pub struct Metadata {
    pub display_phone_number: String,
    pub phone_number_id: String,
}

#[derive(Debug, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
pub struct Profile {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct BusinessMessage {
    pub from: String,
    #[serde(rename = "type", default)]
    pub typ: Option<String>,
    #[serde(default)]
    pub text: Option<TextBody>,
    #[serde(default)]
    pub image: Option<Media>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct Media {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct MediaInfo {
    #[serde(default)]
    url: Option<String>,
}

/// Business API client, authenticated with the access token.
#[derive(Clone)]
pub struct WhatsAppChannel {
    id: String,
    graph_api_base: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(graph_api_base: &str, access_token: Option<String>, client: reqwest::Client) -> Self {
        Self {
            id: CHANNEL.to_string(),
            graph_api_base: graph_api_base.trim_end_matches('/').to_string(),
            access_token,
            client,
        }
    }

    fn token(&self) -> Result<&str, ChannelError> {
        self.access_token
            .as_deref()
            .ok_or(ChannelError::MissingToken(CHANNEL))
    }

    /// Bearer token for media downloads.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// GET {graph}/{media_id} (bearer auth). Returns the short-lived download URL, or None when the response has none.
    pub async fn media_url(&self, media_id: &str) -> Result<Option<String>, ChannelError> {
        let token = self.token()?;
        let url = format!("{}/{}", self.graph_api_base, media_id);
        let res = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| ChannelError::Request {
                channel: CHANNEL,
                source,
            })?;
        let res = check_status(CHANNEL, res).await?;
        let info: MediaInfo = res.json().await.map_err(|source| ChannelError::Request {
            channel: CHANNEL,
            source,
        })?;
        Ok(info.url.filter(|u| !u.trim().is_empty()))
    }

    /// POST a text message from `phone_number_id` to `to`.
    pub async fn send_message(
        &self,
        phone_number_id: &str,
        to: &str,
        text: &str,
    ) -> Result<(), ChannelError> {
        let token = self.token()?;
        let url = format!("{}/{}/messages", self.graph_api_base, phone_number_id);
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": text },
        });
        let res = self
            .client
            .post(&url)
            .query(&[("access_token", token)])
            .json(&body)
            .send()
            .await
            .map_err(|source| ChannelError::Request {
                channel: CHANNEL,
                source,
            })?;
        check_status(CHANNEL, res).await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelHandle for WhatsAppChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_text(&self, target: &ReplyTarget, text: &str) -> Result<(), ChannelError> {
        let phone_number_id = target
            .phone_number_id
            .as_deref()
            .ok_or(ChannelError::MissingRoute)?;
        self.send_message(phone_number_id, &target.recipient_id, text)
            .await
    }
}
