//! Telegram sink: Bot API notifier.
//!
//! Sends each selected frame as a photo with a caption; events without
//! attachable images fall back to a text message. The audible/silent
//! cadence maps onto the API's `disable_notification` flag — silent
//! deliveries still carry the photo and caption, the recipient's device
//! just does not ring.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::{info, warn};

use crate::{Notification, Sink, SinkError};

const PHOTO_TIMEOUT: Duration = Duration::from_secs(30);
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TelegramSink {
    id: String,
    token: String,
    chat_ids: Vec<String>,
    client: reqwest::Client,
    api_base: String,
}

impl TelegramSink {
    pub fn new(id: impl Into<String>, token: impl Into<String>, chat_ids: Vec<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
            chat_ids,
            client: reqwest::Client::new(),
            api_base: "https://api.telegram.org".to_owned(),
        }
    }

    /// Point the sink at a different API host (local bot-api server, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Verify the bot token and each configured chat id.
    ///
    /// Succeeds when the token is valid and at least one chat id is
    /// reachable; individual bad chat ids are logged and tolerated.
    pub async fn verify(&self) -> Result<(), SinkError> {
        let resp = self
            .client
            .get(self.url("getMe"))
            .timeout(MESSAGE_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SinkError::Rejected(format!(
                "getMe failed: {}",
                resp.status()
            )));
        }

        let mut valid = 0;
        for chat_id in &self.chat_ids {
            let resp = self
                .client
                .get(self.url("getChat"))
                .query(&[("chat_id", chat_id.as_str())])
                .timeout(MESSAGE_TIMEOUT)
                .send()
                .await;
            match resp {
                Ok(r) if r.status().is_success() => valid += 1,
                Ok(r) => warn!(sink = %self.id, chat_id, status = %r.status(), "chat id rejected"),
                Err(e) => warn!(sink = %self.id, chat_id, "chat id unreachable: {e}"),
            }
        }
        if valid == 0 {
            return Err(SinkError::Rejected("no valid chat ids".to_owned()));
        }
        info!(sink = %self.id, valid, total = self.chat_ids.len(), "telegram verified");
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: &str,
        image: &[u8],
        caption: &str,
        silent: bool,
    ) -> Result<(), SinkError> {
        let form = Form::new()
            .text("chat_id", chat_id.to_owned())
            .text("caption", caption.to_owned())
            .text("disable_notification", silent.to_string())
            .part("photo", Part::bytes(image.to_vec()).file_name("frame.jpg"));
        let resp = self
            .client
            .post(self.url("sendPhoto"))
            .multipart(form)
            .timeout(PHOTO_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected(format!("sendPhoto {status}: {body}")));
        }
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, text: &str, silent: bool) -> Result<(), SinkError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "disable_notification": silent,
        });
        let resp = self
            .client
            .post(self.url("sendMessage"))
            .json(&body)
            .timeout(MESSAGE_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected(format!("sendMessage {status}: {text}")));
        }
        Ok(())
    }
}

/// Caption for one attached frame.
fn caption(n: &Notification, rank: usize, total: usize, confidence: f64) -> String {
    let marker = if n.is_audible { "(audible)" } else { "(silent)" };
    format!(
        "{marker} Behavior event - {}\n\
         Start: {}\n\
         Confidence: {confidence:.2}\n\
         Frame {rank}/{total}\n\
         Event duration: {:.1}s",
        n.source_name,
        n.summary.start_time.format("%Y-%m-%d %H:%M:%S"),
        n.summary.duration_secs,
    )
}

/// Text-only fallback when an event has no attachable frames.
fn summary_text(n: &Notification) -> String {
    let marker = if n.is_audible { "(audible)" } else { "(silent)" };
    format!(
        "{marker} Behavior event - {}\n\
         Start: {}\n\
         Peak confidence: {:.2}\n\
         High-confidence frames: {}\n\
         Event duration: {:.1}s",
        n.source_name,
        n.summary.start_time.format("%Y-%m-%d %H:%M:%S"),
        n.summary.peak_confidence,
        n.summary.high_confidence_count,
        n.summary.duration_secs,
    )
}

#[async_trait]
impl Sink for TelegramSink {
    fn id(&self) -> &str {
        &self.id
    }

    /// Deliver to every configured chat; succeeds when at least one chat
    /// accepted the notification.
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        let silent = !notification.is_audible;
        let total = notification.frames.len();

        // Read each image once, shared across chats. Unreadable images are
        // dropped from the attachment set, not fatal.
        let mut attachments = Vec::with_capacity(total);
        for frame in &notification.frames {
            match tokio::fs::read(frame.image_ref.as_str()).await {
                Ok(bytes) => attachments.push((frame.confidence, bytes)),
                Err(e) => warn!(
                    sink = %self.id,
                    image = %frame.image_ref,
                    "could not read frame image: {e}"
                ),
            }
        }

        let mut delivered = 0;
        for chat_id in &self.chat_ids {
            let result = if attachments.is_empty() {
                self.send_message(chat_id, &summary_text(notification), silent)
                    .await
            } else {
                let mut result = Ok(());
                for (rank, (confidence, bytes)) in attachments.iter().enumerate() {
                    let text = caption(notification, rank + 1, attachments.len(), *confidence);
                    if let Err(e) = self.send_photo(chat_id, bytes, &text, silent).await {
                        result = Err(e);
                        break;
                    }
                }
                result
            };
            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!(sink = %self.id, chat_id, "delivery to chat failed: {e}"),
            }
        }

        if delivered == 0 {
            return Err(SinkError::Rejected(format!(
                "all {} chats failed",
                self.chat_ids.len()
            )));
        }
        info!(
            sink = %self.id,
            delivered,
            chats = self.chat_ids.len(),
            audible = notification.is_audible,
            "notification delivered"
        );
        Ok(())
    }

    async fn announce(&self, text: &str) -> Result<(), SinkError> {
        let mut delivered = 0;
        for chat_id in &self.chat_ids {
            match self.send_message(chat_id, text, false).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(sink = %self.id, chat_id, "announce failed: {e}"),
            }
        }
        if delivered == 0 {
            return Err(SinkError::Rejected("announce reached no chats".to_owned()));
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use herdwatch_core::types::EventSummary;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn notification(is_audible: bool) -> Notification {
        Notification {
            source_id: "camera-1".to_owned(),
            source_name: "Barn east".to_owned(),
            summary: EventSummary {
                start_time: t0(),
                duration_secs: 12.3,
                peak_confidence: 0.91,
                high_confidence_count: 4,
            },
            frames: Vec::new(),
            is_audible,
        }
    }

    #[test]
    fn url_embeds_token_and_method() {
        let sink = TelegramSink::new("tg", "123:abc", vec!["1".into()])
            .with_api_base("http://localhost:8081");
        assert_eq!(
            sink.url("sendPhoto"),
            "http://localhost:8081/bot123:abc/sendPhoto"
        );
    }

    #[test]
    fn caption_marks_audible_deliveries() {
        let text = caption(&notification(true), 1, 2, 0.93);
        assert!(text.starts_with("(audible)"));
        assert!(text.contains("Barn east"));
        assert!(text.contains("Confidence: 0.93"));
        assert!(text.contains("Frame 1/2"));
        assert!(text.contains("Event duration: 12.3s"));
    }

    #[test]
    fn caption_marks_silent_deliveries() {
        let text = caption(&notification(false), 2, 2, 0.88);
        assert!(text.starts_with("(silent)"));
        assert!(text.contains("Frame 2/2"));
    }

    #[test]
    fn summary_text_carries_event_digest() {
        let text = summary_text(&notification(false));
        assert!(text.contains("Peak confidence: 0.91"));
        assert!(text.contains("High-confidence frames: 4"));
        assert!(text.contains("2026-03-01 08:00:00"));
    }
}
