//! Outbound side of a channel: deliver a reply text to a platform user.

use async_trait::async_trait;

/// Send failure on a platform API.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("{channel} request failed: {source}")]
    Request {
        channel: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{channel} api error: {status} {body}")]
    Api {
        channel: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("{0} access token not configured")]
    MissingToken(&'static str),
    #[error("no business phone-number id to send from")]
    MissingRoute,
}

/// Where a reply goes: the platform user id and, for business messaging, the phone-number id to send from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub recipient_id: String,
    pub phone_number_id: Option<String>,
}

/// Handle to a platform send API.
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "messenger").
    fn id(&self) -> &str;
    /// Send one text message to the target.
    async fn send_text(&self, target: &ReplyTarget, text: &str) -> Result<(), ChannelError>;
}

/// Turn a non-2xx response into [`ChannelError::Api`] with the response body.
pub(crate) async fn check_status(
    channel: &'static str,
    res: reqwest::Response,
) -> Result<reqwest::Response, ChannelError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(ChannelError::Api {
        channel,
        status,
        body,
    })
}
