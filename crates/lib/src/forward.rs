//! Outbound forwarder: POST normalized messages to the aggregation service.
//!
//! Text goes out as `application/x-www-form-urlencoded`, images as `multipart/form-data` with a
//! `file` part. Nested tag mappings are flattened to dotted keys (`user_tags.service=facebook`) in
//! both modes. One POST per message, no retry.

use crate::channels::{MessageTags, UserTags};
use crate::media::StoredImage;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::io::ReaderStream;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("aggregator request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("aggregator returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("encoding forward request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("reading stored image {path}: {source}")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ForwardKind {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "img")]
    Image,
}

/// Fields of one aggregator POST, in wire order.
#[derive(Debug, Serialize)]
pub struct ForwardRequest<'a> {
    /// Application identifier.
    #[serde(rename = "melisa")]
    pub app: &'a str,
    pub token: &'a str,
    pub user: &'a str,
    /// Text body; empty for images.
    pub message: &'a str,
    pub user_tags: &'a UserTags,
    pub message_tags: &'a MessageTags,
    pub kind: ForwardKind,
}

impl ForwardRequest<'_> {
    /// Flattened `(key, value)` pairs with dotted keys for nested fields.
    pub fn fields(&self) -> Result<Vec<(String, String)>, ForwardError> {
        Ok(flatten_fields("", &serde_json::to_value(self)?))
    }
}

/// Result of a forward attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Aggregator accepted the message; carries the response body.
    Sent(String),
    /// Nothing to send (empty sender or content).
    Skipped,
}

/// Flatten a JSON value into dotted-path pairs. Mappings and arrays recurse (arrays by index);
/// any other value is terminal. Nulls are dropped.
pub fn flatten_fields(prefix: &str, value: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    flatten_into(prefix, value, &mut out);
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_into(&join(k), v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(&join(&i.to_string()), v, out);
            }
        }
        Value::Null => {}
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

/// Client for the aggregation endpoint.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    app_name: String,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, endpoint: String, token: String, app_name: String) -> Self {
        Self {
            client,
            endpoint,
            token,
            app_name,
        }
    }

    fn request<'a>(
        &'a self,
        sender_id: &'a str,
        message: &'a str,
        user_tags: &'a UserTags,
        message_tags: &'a MessageTags,
        kind: ForwardKind,
    ) -> ForwardRequest<'a> {
        ForwardRequest {
            app: &self.app_name,
            token: &self.token,
            user: sender_id,
            message,
            user_tags,
            message_tags,
            kind,
        }
    }

    /// POST a text message URL-encoded. Skipped when the sender or the text is empty.
    pub async fn forward_text(
        &self,
        sender_id: &str,
        text: &str,
        user_tags: &UserTags,
        message_tags: &MessageTags,
    ) -> Result<ForwardOutcome, ForwardError> {
        if sender_id.is_empty() || text.is_empty() {
            log::debug!("forward: skipping text message with empty sender or body");
            return Ok(ForwardOutcome::Skipped);
        }
        let fields = self
            .request(sender_id, text, user_tags, message_tags, ForwardKind::Text)
            .fields()?;
        let res = self.client.post(&self.endpoint).form(&fields).send().await?;
        read_response(res).await.map(ForwardOutcome::Sent)
    }

    /// POST a stored image as multipart: `file` part streamed from disk plus the flattened
    /// request fields.
    /// Skipped when the sender is empty.
    pub async fn forward_image(
        &self,
        sender_id: &str,
        image: &StoredImage,
        user_tags: &UserTags,
        message_tags: &MessageTags,
    ) -> Result<ForwardOutcome, ForwardError> {
        if sender_id.is_empty() {
            log::debug!("forward: skipping image with empty sender");
            return Ok(ForwardOutcome::Skipped);
        }
        let read_err = |source| ForwardError::ReadImage {
            path: image.path.clone(),
            source,
        };
        let opened = tokio::fs::File::open(&image.path).await.map_err(read_err)?;
        let len = opened.metadata().await.map_err(read_err)?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(opened));
        let file = reqwest::multipart::Part::stream_with_length(body, len)
            .file_name(image.file_name())
            .mime_str(&image.content_type())?;
        let mut form = reqwest::multipart::Form::new().part("file", file);
        let fields = self
            .request(sender_id, "", user_tags, message_tags, ForwardKind::Image)
            .fields()?;
        for (key, value) in fields {
            form = form.text(key, value);
        }
        let res = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;
        read_response(res).await.map(ForwardOutcome::Sent)
    }
}

async fn read_response(res: reqwest::Response) -> Result<String, ForwardError> {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ForwardError::Status { status, body });
    }
    Ok(body)
}
