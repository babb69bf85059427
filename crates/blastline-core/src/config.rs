//! Blastline configuration system.
//!
//! One TOML file with a block per concern: store path, scheduler tick,
//! dispatch limits, and one block per delivery channel.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BlastlineError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlastlineConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
}

impl BlastlineConfig {
    /// Load config from the default path (~/.blastline/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BlastlineError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| BlastlineError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Default config path (~/.blastline/config.toml).
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Blastline home directory (~/.blastline).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".blastline")
    }
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    BlastlineConfig::home_dir().join("blastline.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the tick loop scans for due campaigns and series steps.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

fn default_tick_secs() -> u64 {
    15
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
        }
    }
}

/// Dispatch limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Worker limit for per-recipient sends within one campaign run.
    #[serde(default = "default_max_parallel")]
    pub max_parallel_sends: usize,
    /// Per-call provider timeout; a timeout counts as a failed send.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_max_parallel() -> usize {
    8
}

fn default_send_timeout() -> u64 {
    30
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_parallel_sends: default_max_parallel(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

/// SMTP relay configuration for the email channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// From address, e.g. "Acme Outreach <hello@acme.co>".
    #[serde(default)]
    pub from_address: String,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
        }
    }
}

/// Twilio configuration for the SMS channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    /// Sending number in E.164 form.
    #[serde(default)]
    pub from_number: String,
}

/// WhatsApp Business Cloud API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Facebook Graph API access token.
    #[serde(default)]
    pub access_token: String,
    /// WhatsApp Phone Number ID.
    #[serde(default)]
    pub phone_number_id: String,
}

/// Telegram Bot API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
}

/// Voice-AI call provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_voice_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Provider-side outbound phone number id.
    #[serde(default)]
    pub phone_number_id: String,
}

fn default_voice_api_url() -> String {
    "https://api.vapi.ai".into()
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_voice_api_url(),
            api_key: String::new(),
            phone_number_id: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BlastlineConfig::default();
        assert_eq!(config.scheduler.tick_secs, 15);
        assert_eq!(config.dispatch.max_parallel_sends, 8);
        assert!(!config.email.enabled);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [scheduler]
            tick_secs = 5

            [telegram]
            enabled = true
            bot_token = "123:abc"
        "#;
        let config: BlastlineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.scheduler.tick_secs, 5);
        assert!(config.telegram.enabled);
        assert_eq!(config.telegram.bot_token, "123:abc");
        // Untouched sections fall back to defaults
        assert_eq!(config.email.smtp_port, 587);
    }
}
