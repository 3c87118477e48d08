//! Page-based messenger: webhook entry types and the send API (`{graph}/me/messages`).

use crate::channels::handle::{check_status, ChannelError, ChannelHandle, ReplyTarget};
use async_trait::async_trait;
use serde::Deserialize;

const CHANNEL: &str = "messenger";

/// One `entry` of a `page` webhook.
#[derive(Debug, Deserialize)]
pub struct PageEntry {
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Deserialize)]
pub struct MessagingEvent {
    pub sender: Participant,
    #[serde(default)]
    pub message: Option<MessengerMessage>,
}

#[derive(Debug, Deserialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct MessengerMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub payload: Option<AttachmentPayload>,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentPayload {
    #[serde(default)]
    pub url: Option<String>,
}

/// Messenger send API client, authenticated with the page access token.
#[derive(Clone)]
pub struct MessengerChannel {
    id: String,
    graph_api_base: String,
    page_access_token: Option<String>,
    client: reqwest::Client,
}

impl MessengerChannel {
    pub fn new(
        graph_api_base: &str,
        page_access_token: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            id: CHANNEL.to_string(),
            graph_api_base: graph_api_base.trim_end_matches('/').to_string(),
            page_access_token,
            client,
        }
    }

    /// POST {graph}/me/messages with `{recipient: {id}, message: {text}}`.
    pub async fn send_message(&self, recipient_id: &str, text: &str) -> Result<(), ChannelError> {
        let token = self
            .page_access_token
            .as_deref()
            .ok_or(ChannelError::MissingToken(CHANNEL))?;
        let url = format!("{}/me/messages", self.graph_api_base);
        let body = serde_json::json!({
            "recipient": { "id": recipient_id },
            "message": { "text": text },
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
impl ChannelHandle for MessengerChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_text(&self, target: &ReplyTarget, text: &str) -> Result<(), ChannelError> {
        self.send_message(&target.recipient_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn send_message_posts_recipient_and_text_with_token_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/me/messages")
            .match_query(Matcher::UrlEncoded(
                "access_token".into(),
                "page-token".into(),
            ))
            .match_body(Matcher::Json(serde_json::json!({
                "recipient": { "id": "psid-1" },
                "message": { "text": "hello" }
            })))
            .with_status(200)
            .with_body(r#"{"recipient_id":"psid-1","message_id":"m1"}"#)
            .create_async()
            .await;

        let channel = MessengerChannel::new(
            &server.url(),
            Some("page-token".to_string()),
            reqwest::Client::new(),
        );
        channel.send_message("psid-1", "hello").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn send_message_surfaces_api_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/me/messages")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body("invalid recipient")
            .create_async()
            .await;

        let channel =
            MessengerChannel::new(&server.url(), Some("t".to_string()), reqwest::Client::new());
        let err = channel.send_message("x", "hi").await.unwrap_err();
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("invalid recipient"));
    }

    #[tokio::test]
    async fn send_message_without_token_is_rejected() {
        let channel = MessengerChannel::new("http://127.0.0.1:9", None, reqwest::Client::new());
        let err = channel.send_message("x", "hi").await.unwrap_err();
        assert!(matches!(err, ChannelError::MissingToken("messenger")));
    }

    #[test]
    fn page_entry_decodes_image_attachment() {
        let entry: PageEntry = serde_json::from_value(serde_json::json!({
            "id": "page-1",
            "messaging": [{
                "sender": { "id": "psid-1" },
                "message": {
                    "attachments": [{ "type": "image", "payload": { "url": "https://x/y/pic.png?sig=1" } }]
                }
            }]
        }))
        .unwrap();
        let message = entry.messaging[0].message.as_ref().unwrap();
        assert!(message.text.is_none());
        assert_eq!(message.attachments[0].typ, "image");
    }
}
