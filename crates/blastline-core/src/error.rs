//! Error taxonomy for the dispatch engine.
//!
//! Four families, matching how failures are surfaced:
//! - `Validation` — bad compose input or empty audience; rejected before
//!   any row exists, shown directly to the operator.
//! - `Channel` — a provider call failed; recorded per recipient, never
//!   escalated to abort a batch.
//! - `Store` — SQLite failure; fatal to the in-progress run.
//! - `Config` / `NotFound` — setup and lookup problems.

use thiserror::Error;

/// All errors produced by blastline crates.
#[derive(Debug, Error)]
pub enum BlastlineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Convenience result alias used across all crates.
pub type Result<T> = std::result::Result<T, BlastlineError>;

impl BlastlineError {
    /// True for errors the operator can fix by changing their input.
    pub fn is_validation(&self) -> bool {
        matches!(self, BlastlineError::Validation(_))
    }
}
