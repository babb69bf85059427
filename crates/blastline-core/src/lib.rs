//! # Blastline Core
//!
//! Shared foundation for the broadcast dispatch engine: the error
//! taxonomy, channel/audience/content types, the `ChannelSender`
//! contract every delivery provider implements, and the TOML
//! configuration layer.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::BlastlineConfig;
pub use error::{BlastlineError, Result};
pub use traits::{ChannelSender, Clock, SystemClock};
pub use types::{
    AudienceSelector, ChannelKind, MessageContent, OutboundMessage, Recipient, RecipientKind,
    SendReceipt,
};
