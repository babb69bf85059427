//! Telegram Bot API channel — outbound sendMessage / sendPhoto.
//!
//! Recipients are bot-addressable chat ids; subscriber identity lives in
//! its own table, not the lead/client address space.

use async_trait::async_trait;
use serde::Deserialize;

use blastline_core::config::TelegramConfig;
use blastline_core::error::{BlastlineError, Result};
use blastline_core::traits::ChannelSender;
use blastline_core::types::{ChannelKind, OutboundMessage, SendReceipt};

/// Telegram Bot API sender.
pub struct TelegramSender {
    config: TelegramConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TelegramApiResponse {
    ok: bool,
    result: Option<serde_json::Value>,
    description: Option<String>,
}

impl TelegramSender {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{}",
            self.config.bot_token, method
        )
    }

    fn build_payload(chat_id: i64, message: &OutboundMessage) -> (&'static str, serde_json::Value) {
        match message.media_urls.first() {
            Some(url) => (
                "sendPhoto",
                serde_json::json!({
                    "chat_id": chat_id,
                    "photo": url,
                    "caption": message.body,
                }),
            ),
            None => (
                "sendMessage",
                serde_json::json!({
                    "chat_id": chat_id,
                    "text": message.body,
                }),
            ),
        }
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt> {
        let chat_id: i64 = message
            .address
            .parse()
            .map_err(|_| BlastlineError::Channel(format!("invalid chat id '{}'", message.address)))?;
        let (method, body) = Self::build_payload(chat_id, message);

        let response = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| BlastlineError::Channel(format!("{method} failed: {e}")))?;

        let result: TelegramApiResponse = response
            .json()
            .await
            .map_err(|e| BlastlineError::Channel(format!("Invalid Telegram response: {e}")))?;

        if !result.ok {
            return Err(BlastlineError::Channel(format!(
                "Telegram API error: {}",
                result.description.unwrap_or_default()
            )));
        }

        let message_id = result
            .result
            .as_ref()
            .and_then(|r| r["message_id"].as_i64())
            .map(|id| id.to_string());
        tracing::debug!("Telegram message sent to chat {chat_id}");
        Ok(SendReceipt { provider_ref: message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(media: &[&str]) -> OutboundMessage {
        OutboundMessage {
            address: "8812345".into(),
            subject: None,
            body: "promo".into(),
            media_urls: media.iter().map(|s| s.to_string()).collect(),
            assistant_id: None,
        }
    }

    #[test]
    fn test_text_uses_send_message() {
        let (method, payload) = TelegramSender::build_payload(8812345, &msg(&[]));
        assert_eq!(method, "sendMessage");
        assert_eq!(payload["chat_id"], 8812345);
        assert_eq!(payload["text"], "promo");
    }

    #[test]
    fn test_media_uses_send_photo() {
        let (method, payload) =
            TelegramSender::build_payload(8812345, &msg(&["https://x.co/b.png"]));
        assert_eq!(method, "sendPhoto");
        assert_eq!(payload["photo"], "https://x.co/b.png");
        assert_eq!(payload["caption"], "promo");
    }
}
