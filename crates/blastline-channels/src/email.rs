//! Email channel — async SMTP sending via lettre (STARTTLS relay).

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use blastline_core::config::EmailConfig;
use blastline_core::error::{BlastlineError, Result};
use blastline_core::traits::ChannelSender;
use blastline_core::types::{ChannelKind, OutboundMessage, SendReceipt};

/// SMTP-backed email sender.
pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailSender {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| BlastlineError::Config(format!("bad from_address: {e}")))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| BlastlineError::Config(format!("SMTP relay: {e}")))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        Ok(Self { transport, from })
    }

    fn render_body(message: &OutboundMessage) -> String {
        if message.media_urls.is_empty() {
            return message.body.clone();
        }
        // Media rides as trailing links; attachments are out of scope.
        let mut body = message.body.clone();
        body.push_str("\n\n");
        for url in &message.media_urls {
            body.push_str(url);
            body.push('\n');
        }
        body
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt> {
        let to: Mailbox = message
            .address
            .parse()
            .map_err(|e| BlastlineError::Channel(format!("bad recipient address: {e}")))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone().unwrap_or_default())
            .body(Self::render_body(message))
            .map_err(|e| BlastlineError::Channel(format!("build message: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| BlastlineError::Channel(format!("SMTP send: {e}")))?;
        tracing::debug!("email sent to {}", message.address);
        // SMTP gives no durable provider id worth correlating on.
        Ok(SendReceipt::default())
    }
}
