//! # Blastline Dispatch
//!
//! Turns a composed campaign into a tracked delivery run: resolve the
//! logical audience into a concrete recipient snapshot, then drive
//! per-recipient sends through the channel senders with bounded
//! parallelism.

pub mod audience;
pub mod compose;
pub mod dispatcher;

pub use audience::{AudienceResolver, Resolution};
pub use compose::{CampaignDraft, Composed};
pub use dispatcher::{Dispatcher, RunSummary, SenderMap, SharedStore};
