//! # Blastline Store
//!
//! SQLite-backed relational store for the dispatch engine. Owns the
//! schema for campaigns, recipient snapshots, marketing groups, drip
//! series, and the read-only audience tables (leads, clients, bot
//! subscribers). WAL mode — survives restarts, tolerates the scheduler
//! and operator CLI sharing one database file.

pub mod models;
pub mod store;

pub use models::{
    Campaign, CampaignStatus, Client, Enrollment, EnrollmentStatus, Group, GroupMember, Lead,
    MemberRef, Recurrence, RecurrencePattern, RecipientSnapshot, RecipientStatus, Series,
    SeriesStep, SeriesStepDraft,
};
pub use store::Store;
