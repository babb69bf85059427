//! # Blastline Scheduler
//!
//! Time-driven side of the engine: the tick loop that picks up due
//! campaigns, recurrence expansion for repeating broadcasts, and the
//! drip series engine that walks enrollments through their steps.

pub mod engine;
pub mod recurrence;
pub mod series;

pub use engine::TickEngine;
pub use recurrence::next_occurrence;
pub use series::{EnrollOutcome, EnrollTarget, SeriesEngine, SweepOutcome};
