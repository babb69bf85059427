//! Voice channel — outbound AI-assistant calls via a voice provider
//! REST API. The created call id is kept as the provider correlation
//! reference on the recipient snapshot.

use async_trait::async_trait;

use blastline_core::config::VoiceConfig;
use blastline_core::error::{BlastlineError, Result};
use blastline_core::traits::ChannelSender;
use blastline_core::types::{ChannelKind, OutboundMessage, SendReceipt};

/// Voice-AI call sender.
pub struct VoiceSender {
    config: VoiceConfig,
    client: reqwest::Client,
}

impl VoiceSender {
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn build_payload(&self, message: &OutboundMessage) -> Result<serde_json::Value> {
        let assistant_id = message.assistant_id.as_deref().ok_or_else(|| {
            BlastlineError::Channel("voice send missing assistant id".into())
        })?;
        Ok(serde_json::json!({
            "assistantId": assistant_id,
            "phoneNumberId": self.config.phone_number_id,
            "customer": { "number": message.address },
        }))
    }
}

#[async_trait]
impl ChannelSender for VoiceSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Voice
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt> {
        let body = self.build_payload(message)?;
        let response = self
            .client
            .post(format!("{}/call", self.config.api_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| BlastlineError::Channel(format!("voice call request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BlastlineError::Channel(format!(
                "voice API error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BlastlineError::Channel(format!("Invalid voice response: {e}")))?;
        let call_id = result["id"].as_str().map(String::from);
        tracing::debug!("voice call placed to {} ({:?})", message.address, call_id);
        Ok(SendReceipt { provider_ref: call_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> VoiceSender {
        VoiceSender::new(&VoiceConfig {
            enabled: true,
            api_url: "https://api.vapi.ai".into(),
            api_key: "k".into(),
            phone_number_id: "pn-1".into(),
        })
    }

    #[test]
    fn test_payload_carries_assistant_and_number() {
        let message = OutboundMessage {
            address: "+15550002222".into(),
            subject: None,
            body: String::new(),
            media_urls: Vec::new(),
            assistant_id: Some("asst-42".into()),
        };
        let payload = sender().build_payload(&message).unwrap();
        assert_eq!(payload["assistantId"], "asst-42");
        assert_eq!(payload["phoneNumberId"], "pn-1");
        assert_eq!(payload["customer"]["number"], "+15550002222");
    }

    #[test]
    fn test_missing_assistant_is_channel_error() {
        let message = OutboundMessage {
            address: "+15550002222".into(),
            subject: None,
            body: String::new(),
            media_urls: Vec::new(),
            assistant_id: None,
        };
        assert!(sender().build_payload(&message).is_err());
    }
}
