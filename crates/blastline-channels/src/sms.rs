//! SMS channel — Twilio Messages API (form POST, basic auth).

use async_trait::async_trait;

use blastline_core::config::SmsConfig;
use blastline_core::error::{BlastlineError, Result};
use blastline_core::traits::ChannelSender;
use blastline_core::types::{ChannelKind, OutboundMessage, SendReceipt};

/// Twilio-backed SMS/MMS sender.
pub struct SmsSender {
    config: SmsConfig,
    client: reqwest::Client,
}

impl SmsSender {
    pub fn new(config: &SmsConfig) -> Self {
        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        )
    }

    /// Twilio form body; `MediaUrl` repeats per attachment (MMS).
    fn build_form(&self, message: &OutboundMessage) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("To", message.address.clone()),
            ("From", self.config.from_number.clone()),
            ("Body", message.body.clone()),
        ];
        for url in &message.media_urls {
            form.push(("MediaUrl", url.clone()));
        }
        form
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt> {
        let response = self
            .client
            .post(self.api_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&self.build_form(message))
            .send()
            .await
            .map_err(|e| BlastlineError::Channel(format!("Twilio request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BlastlineError::Channel(format!(
                "Twilio error {status}: {body}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BlastlineError::Channel(format!("Invalid Twilio response: {e}")))?;
        let sid = result["sid"].as_str().map(String::from);
        tracing::debug!("SMS sent to {} (sid={:?})", message.address, sid);
        Ok(SendReceipt { provider_ref: sid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> SmsSender {
        SmsSender::new(&SmsConfig {
            enabled: true,
            account_sid: "AC123".into(),
            auth_token: "tok".into(),
            from_number: "+15550001111".into(),
        })
    }

    #[test]
    fn test_form_fields() {
        let message = OutboundMessage {
            address: "+15557770000".into(),
            subject: None,
            body: "sale ends friday".into(),
            media_urls: vec!["https://x.co/flyer.jpg".into()],
            assistant_id: None,
        };
        let form = sender().build_form(&message);
        assert_eq!(form[0], ("To", "+15557770000".to_string()));
        assert_eq!(form[1], ("From", "+15550001111".to_string()));
        assert_eq!(form[2], ("Body", "sale ends friday".to_string()));
        assert_eq!(form[3], ("MediaUrl", "https://x.co/flyer.jpg".to_string()));
    }

    #[test]
    fn test_api_url_embeds_account() {
        assert!(sender().api_url().contains("/Accounts/AC123/"));
    }
}
