//! The seams of the engine: the uniform send contract every delivery
//! provider implements, and the injectable clock the scheduler ticks on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{ChannelKind, OutboundMessage, SendReceipt};

/// Uniform delivery contract over heterogeneous providers.
///
/// Implementations map provider failures into `BlastlineError::Channel`
/// strings; the dispatcher treats every error identically regardless of
/// channel and records the message on the recipient snapshot. Senders
/// must not panic across this boundary.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Which channel this sender delivers on.
    fn kind(&self) -> ChannelKind;

    /// Deliver one message to one recipient.
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt>;
}

/// Injectable time source so tests can simulate time passage instead of
/// sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
