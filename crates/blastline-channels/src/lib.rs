//! # Blastline Channels
//! Delivery provider implementations behind the uniform `ChannelSender`
//! contract. One module per channel; the dispatcher never sees past the
//! trait.

pub mod email;
pub mod sms;
pub mod telegram;
pub mod voice;
pub mod whatsapp;

use std::collections::HashMap;
use std::sync::Arc;

use blastline_core::config::BlastlineConfig;
use blastline_core::error::Result;
use blastline_core::traits::ChannelSender;
use blastline_core::types::ChannelKind;

pub use email::EmailSender;
pub use sms::SmsSender;
pub use telegram::TelegramSender;
pub use voice::VoiceSender;
pub use whatsapp::WhatsAppSender;

/// Build the sender set for every channel enabled in config.
pub fn build_senders(
    config: &BlastlineConfig,
) -> Result<HashMap<ChannelKind, Arc<dyn ChannelSender>>> {
    let mut senders: HashMap<ChannelKind, Arc<dyn ChannelSender>> = HashMap::new();
    if config.email.enabled {
        senders.insert(
            ChannelKind::Email,
            Arc::new(EmailSender::new(&config.email)?),
        );
    }
    if config.sms.enabled {
        senders.insert(ChannelKind::Sms, Arc::new(SmsSender::new(&config.sms)));
    }
    if config.whatsapp.enabled {
        senders.insert(
            ChannelKind::WhatsApp,
            Arc::new(WhatsAppSender::new(&config.whatsapp)),
        );
    }
    if config.telegram.enabled {
        senders.insert(
            ChannelKind::Telegram,
            Arc::new(TelegramSender::new(&config.telegram)),
        );
    }
    if config.voice.enabled {
        senders.insert(ChannelKind::Voice, Arc::new(VoiceSender::new(&config.voice)));
    }
    tracing::info!("{} channel sender(s) configured", senders.len());
    Ok(senders)
}
