//! Core data types shared by the store, dispatcher, and channel senders.

use serde::{Deserialize, Serialize};

use crate::error::{BlastlineError, Result};

/// The five outbound delivery channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
    WhatsApp,
    Telegram,
    Voice,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::WhatsApp => "whatsapp",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Voice => "voice",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "email" => Ok(ChannelKind::Email),
            "sms" => Ok(ChannelKind::Sms),
            "whatsapp" => Ok(ChannelKind::WhatsApp),
            "telegram" => Ok(ChannelKind::Telegram),
            "voice" => Ok(ChannelKind::Voice),
            other => Err(BlastlineError::Validation(format!(
                "unknown channel '{other}' (expected email|sms|whatsapp|telegram|voice)"
            ))),
        }
    }

}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical description of who a campaign targets.
///
/// Stored as text: `all`, `leads`, `clients`, `group:<id>`,
/// `individual:<address>`. For the Telegram channel `All` means "all
/// bot subscribers" and `Individual` is a chat id — the other selectors
/// are rejected at compose time because bot subscriber identity is not
/// reconcilable with the lead/client address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceSelector {
    All,
    Leads,
    Clients,
    Group(String),
    Individual(String),
}

impl AudienceSelector {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(AudienceSelector::All),
            "leads" => Ok(AudienceSelector::Leads),
            "clients" => Ok(AudienceSelector::Clients),
            other => {
                if let Some(id) = other.strip_prefix("group:") {
                    if id.is_empty() {
                        return Err(BlastlineError::Validation("empty group id".into()));
                    }
                    Ok(AudienceSelector::Group(id.to_string()))
                } else if let Some(addr) = other.strip_prefix("individual:") {
                    if addr.is_empty() {
                        return Err(BlastlineError::Validation(
                            "empty individual address".into(),
                        ));
                    }
                    Ok(AudienceSelector::Individual(addr.to_string()))
                } else {
                    Err(BlastlineError::Validation(format!(
                        "unknown audience selector '{other}'"
                    )))
                }
            }
        }
    }
}

impl std::fmt::Display for AudienceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudienceSelector::All => f.write_str("all"),
            AudienceSelector::Leads => f.write_str("leads"),
            AudienceSelector::Clients => f.write_str("clients"),
            AudienceSelector::Group(id) => write!(f, "group:{id}"),
            AudienceSelector::Individual(addr) => write!(f, "individual:{addr}"),
        }
    }
}

/// Where a resolved recipient came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    Lead,
    Client,
    FreeForm,
}

impl RecipientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientKind::Lead => "lead",
            RecipientKind::Client => "client",
            RecipientKind::FreeForm => "free_form",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "lead" => RecipientKind::Lead,
            "client" => RecipientKind::Client,
            _ => RecipientKind::FreeForm,
        }
    }
}

/// One concrete, addressable recipient produced by audience resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Normalized channel address (email, E.164 phone, or chat id).
    pub address: String,
    pub kind: RecipientKind,
    /// Back-reference to the originating lead/client, when known.
    pub source_id: Option<String>,
}

/// Message content composed by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContent {
    /// Required for email, unused elsewhere.
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
    /// Voice-AI assistant identifier, required for the voice channel.
    pub assistant_id: Option<String>,
}

/// One fully-addressed message handed to a `ChannelSender`.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub address: String,
    pub subject: Option<String>,
    pub body: String,
    pub media_urls: Vec<String>,
    pub assistant_id: Option<String>,
}

impl OutboundMessage {
    pub fn new(address: &str, content: &MessageContent) -> Self {
        Self {
            address: address.to_string(),
            subject: content.subject.clone(),
            body: content.body.clone(),
            media_urls: content.media_urls.clone(),
            assistant_id: content.assistant_id.clone(),
        }
    }
}

/// Outcome of a successful provider call.
#[derive(Debug, Clone, Default)]
pub struct SendReceipt {
    /// Provider-side correlation id (message SID, call id, ...).
    pub provider_ref: Option<String>,
}

impl SendReceipt {
    pub fn with_ref(provider_ref: impl Into<String>) -> Self {
        Self {
            provider_ref: Some(provider_ref.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_roundtrip() {
        for kind in [
            ChannelKind::Email,
            ChannelKind::Sms,
            ChannelKind::WhatsApp,
            ChannelKind::Telegram,
            ChannelKind::Voice,
        ] {
            assert_eq!(ChannelKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(ChannelKind::parse("fax").is_err());
    }

    #[test]
    fn test_selector_roundtrip() {
        for sel in [
            AudienceSelector::All,
            AudienceSelector::Leads,
            AudienceSelector::Clients,
            AudienceSelector::Group("g-1".into()),
            AudienceSelector::Individual("a@b.co".into()),
        ] {
            assert_eq!(AudienceSelector::parse(&sel.to_string()).unwrap(), sel);
        }
    }

    #[test]
    fn test_selector_rejects_garbage() {
        assert!(AudienceSelector::parse("everyone").is_err());
        assert!(AudienceSelector::parse("group:").is_err());
        assert!(AudienceSelector::parse("individual:").is_err());
    }
}
