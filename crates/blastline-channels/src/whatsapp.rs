//! WhatsApp Business Cloud API channel.
//!
//! Uses the official WhatsApp Business Platform (Cloud API).
//! Requires: Access Token + Phone Number ID from Meta Business Suite.

use async_trait::async_trait;

use blastline_core::config::WhatsAppConfig;
use blastline_core::error::{BlastlineError, Result};
use blastline_core::traits::ChannelSender;
use blastline_core::types::{ChannelKind, OutboundMessage, SendReceipt};

/// WhatsApp Cloud API sender.
pub struct WhatsAppSender {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppSender {
    pub fn new(config: &WhatsAppConfig) -> Self {
        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self) -> String {
        format!(
            "https://graph.facebook.com/v21.0/{}/messages",
            self.config.phone_number_id
        )
    }

    /// Text message, or image-with-caption when media is attached.
    fn build_payload(to: &str, message: &OutboundMessage) -> serde_json::Value {
        match message.media_urls.first() {
            Some(url) => serde_json::json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "image",
                "image": { "link": url, "caption": message.body }
            }),
            None => serde_json::json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "text",
                "text": { "preview_url": false, "body": message.body }
            }),
        }
    }
}

#[async_trait]
impl ChannelSender for WhatsAppSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt> {
        let body = Self::build_payload(&message.address, message);

        let response = self
            .client
            .post(self.api_url())
            .header(
                "Authorization",
                format!("Bearer {}", self.config.access_token),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| BlastlineError::Channel(format!("WhatsApp API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BlastlineError::Channel(format!(
                "WhatsApp API error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BlastlineError::Channel(format!("Invalid WhatsApp response: {e}")))?;
        let msg_id = result["messages"][0]["id"].as_str().map(String::from);
        tracing::debug!("WhatsApp message sent to {} ({:?})", message.address, msg_id);
        Ok(SendReceipt { provider_ref: msg_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(media: &[&str]) -> OutboundMessage {
        OutboundMessage {
            address: "+84900000001".into(),
            subject: None,
            body: "new offer".into(),
            media_urls: media.iter().map(|s| s.to_string()).collect(),
            assistant_id: None,
        }
    }

    #[test]
    fn test_text_payload() {
        let payload = WhatsAppSender::build_payload("+84900000001", &msg(&[]));
        assert_eq!(payload["type"], "text");
        assert_eq!(payload["text"]["body"], "new offer");
    }

    #[test]
    fn test_media_payload_becomes_image() {
        let payload =
            WhatsAppSender::build_payload("+84900000001", &msg(&["https://x.co/p.jpg"]));
        assert_eq!(payload["type"], "image");
        assert_eq!(payload["image"]["link"], "https://x.co/p.jpg");
        assert_eq!(payload["image"]["caption"], "new offer");
    }
}
