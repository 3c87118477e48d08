//! Reply dispatcher: relay aggregator replies back to the platform the user wrote from.
//!
//! A reply envelope with a business phone-number id (`message_tags.wp_id`) goes out through
//! WhatsApp, anything else through the page messenger. Texts are sent one at a time in envelope
//! order; empty texts are skipped and a failed send does not stop the rest.

use crate::channels::{ChannelHandle, ReplyTarget};
use crate::gateway::protocol::ReplyEnvelope;
use std::sync::Arc;

/// Counts from one dispatch, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Validates reply envelopes and sends their texts.
#[derive(Clone)]
pub struct ReplyDispatcher {
    token: String,
    messenger: Arc<dyn ChannelHandle>,
    whatsapp: Arc<dyn ChannelHandle>,
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

impl ReplyDispatcher {
    pub fn new(
        token: String,
        messenger: Arc<dyn ChannelHandle>,
        whatsapp: Arc<dyn ChannelHandle>,
    ) -> Self {
        Self {
            token,
            messenger,
            whatsapp,
        }
    }

    /// True when the envelope token matches the shared secret exactly. An unset secret accepts nothing.
    pub fn authorize(&self, envelope: &ReplyEnvelope) -> bool {
        !self.token.is_empty() && constant_time_eq(&envelope.token, &self.token)
    }

    /// Channel and target for an envelope.
    pub fn route(&self, envelope: &ReplyEnvelope) -> (&Arc<dyn ChannelHandle>, ReplyTarget) {
        let hint = envelope.routing_hint().map(str::to_string);
        let channel = if hint.is_some() {
            &self.whatsapp
        } else {
            &self.messenger
        };
        let target = ReplyTarget {
            recipient_id: envelope.user_id.clone(),
            phone_number_id: hint,
        };
        (channel, target)
    }

    /// Send every non-empty text in order. Failures are logged and counted, never retried.
    pub async fn dispatch(&self, envelope: &ReplyEnvelope) -> DispatchReport {
        let (channel, target) = self.route(envelope);
        let mut report = DispatchReport::default();
        for text in &envelope.text {
            if text.is_empty() {
                report.skipped += 1;
                continue;
            }
            match channel.send_text(&target, text).await {
                Ok(()) => {
                    log::info!("reply sent via {} to {}", channel.id(), target.recipient_id);
                    report.sent += 1;
                }
                Err(e) => {
                    log::warn!(
                        "reply via {} to {} failed: {}",
                        channel.id(),
                        target.recipient_id,
                        e
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelError, MessengerChannel, WhatsAppChannel};
    use crate::gateway::protocol::ReplyTags;
    use async_trait::async_trait;
    use mockito::Matcher;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        id: String,
        fail_on: Option<String>,
        sent: Mutex<Vec<(ReplyTarget, String)>>,
    }

    impl RecordingChannel {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                ..Default::default()
            })
        }

        fn sent(&self) -> Vec<(ReplyTarget, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelHandle for RecordingChannel {
        fn id(&self) -> &str {
            &self.id
        }

        async fn send_text(&self, target: &ReplyTarget, text: &str) -> Result<(), ChannelError> {
            if self.fail_on.as_deref() == Some(text) {
                return Err(ChannelError::MissingRoute);
            }
            self.sent
                .lock()
                .unwrap()
                .push((target.clone(), text.to_string()));
            Ok(())
        }
    }

    fn envelope(token: &str, text: &[&str], wp_id: Option<&str>) -> ReplyEnvelope {
        ReplyEnvelope {
            token: token.to_string(),
            text: text.iter().map(|s| s.to_string()).collect(),
            user_id: "user-1".to_string(),
            message_tags: wp_id.map(|id| ReplyTags {
                wp_id: Some(id.to_string()),
            }),
        }
    }

    #[test]
    fn authorize_requires_exact_token() {
        let d = ReplyDispatcher::new(
            "secret".to_string(),
            RecordingChannel::new("messenger"),
            RecordingChannel::new("whatsapp"),
        );
        assert!(d.authorize(&envelope("secret", &[], None)));
        assert!(!d.authorize(&envelope("secret ", &[], None)));
        assert!(!d.authorize(&envelope("Secret", &[], None)));
        assert!(!d.authorize(&envelope("", &[], None)));
    }

    #[test]
    fn unset_secret_accepts_nothing() {
        let d = ReplyDispatcher::new(
            String::new(),
            RecordingChannel::new("messenger"),
            RecordingChannel::new("whatsapp"),
        );
        assert!(!d.authorize(&envelope("", &[], None)));
    }

    #[tokio::test]
    async fn empty_texts_are_skipped_and_order_is_kept() {
        let messenger = RecordingChannel::new("messenger");
        let whatsapp = RecordingChannel::new("whatsapp");
        let d = ReplyDispatcher::new("s".to_string(), messenger.clone(), whatsapp.clone());

        let report = d.dispatch(&envelope("s", &["hello", "", "world"], None)).await;

        assert_eq!(
            report,
            DispatchReport {
                sent: 2,
                failed: 0,
                skipped: 1
            }
        );
        let texts: Vec<String> = messenger.sent().into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["hello", "world"]);
        assert!(whatsapp.sent().is_empty());
    }

    #[tokio::test]
    async fn routing_hint_selects_whatsapp() {
        let messenger = RecordingChannel::new("messenger");
        let whatsapp = RecordingChannel::new("whatsapp");
        let d = ReplyDispatcher::new("s".to_string(), messenger.clone(), whatsapp.clone());

        d.dispatch(&envelope("s", &["hola"], Some("10500"))).await;

        assert!(messenger.sent().is_empty());
        let sent = whatsapp.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].0,
            ReplyTarget {
                recipient_id: "user-1".to_string(),
                phone_number_id: Some("10500".to_string())
            }
        );
    }

    #[tokio::test]
    async fn blank_routing_hint_falls_back_to_messenger() {
        let messenger = RecordingChannel::new("messenger");
        let whatsapp = RecordingChannel::new("whatsapp");
        let d = ReplyDispatcher::new("s".to_string(), messenger.clone(), whatsapp.clone());

        d.dispatch(&envelope("s", &["hola"], Some(""))).await;

        assert_eq!(messenger.sent().len(), 1);
        assert!(whatsapp.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_send_does_not_stop_the_rest() {
        let messenger = Arc::new(RecordingChannel {
            id: "messenger".to_string(),
            fail_on: Some("bad".to_string()),
            ..Default::default()
        });
        let d = ReplyDispatcher::new(
            "s".to_string(),
            messenger.clone(),
            RecordingChannel::new("whatsapp"),
        );

        let report = d.dispatch(&envelope("s", &["a", "bad", "b"], None)).await;

        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 1);
        let texts: Vec<String> = messenger.sent().into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn dispatch_through_graph_send_apis() {
        let mut server = mockito::Server::new_async().await;
        let page = server
            .mock("POST", "/me/messages")
            .match_query(Matcher::UrlEncoded("access_token".into(), "page-token".into()))
            .match_body(Matcher::PartialJson(serde_json::json!({
                "recipient": { "id": "user-1" }
            })))
            .expect(2)
            .create_async()
            .await;
        let business = server
            .mock("POST", "/10500/messages")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let client = reqwest::Client::new();
        let d = ReplyDispatcher::new(
            "s".to_string(),
            Arc::new(MessengerChannel::new(
                &server.url(),
                Some("page-token".to_string()),
                client.clone(),
            )),
            Arc::new(WhatsAppChannel::new(
                &server.url(),
                Some("wa-token".to_string()),
                client,
            )),
        );

        let report = d.dispatch(&envelope("s", &["hello", "", "world"], None)).await;

        assert_eq!(report.sent, 2);
        page.assert_async().await;
        business.assert_async().await;
    }
}
