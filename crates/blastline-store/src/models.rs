//! Row models — the persistent data model for broadcast runs and series.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use blastline_core::types::{AudienceSelector, ChannelKind, MessageContent, RecipientKind};

/// Campaign lifecycle. `pending → sending → completed` on the happy
/// path; `pending → failed` only when audience resolution errors before
/// any send attempt. Partial delivery failure still ends in `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Sending,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sending" => CampaignStatus::Sending,
            "completed" => CampaignStatus::Completed,
            "failed" => CampaignStatus::Failed,
            _ => CampaignStatus::Pending,
        }
    }
}

/// Recurrence descriptor attached to a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub pattern: RecurrencePattern,
    /// Multiplier on the pattern unit, at least 1.
    pub interval: u32,
    /// No occurrence is created past this point.
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
}

impl RecurrencePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrencePattern::Daily => "daily",
            RecurrencePattern::Weekly => "weekly",
            RecurrencePattern::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(RecurrencePattern::Daily),
            "weekly" => Some(RecurrencePattern::Weekly),
            "monthly" => Some(RecurrencePattern::Monthly),
            _ => None,
        }
    }
}

/// One broadcast run. A recurring definition produces a fresh row per
/// occurrence; completed rows are immutable history.
#[derive(Debug, Clone)]
pub struct Campaign {
    pub id: String,
    pub channel: ChannelKind,
    pub audience: AudienceSelector,
    pub content: MessageContent,
    pub status: CampaignStatus,
    pub total_recipients: u32,
    pub success_count: u32,
    pub failed_count: u32,
    /// None means "send now".
    pub scheduled_at: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn new(
        channel: ChannelKind,
        audience: AudienceSelector,
        content: MessageContent,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel,
            audience,
            content,
            status: CampaignStatus::Pending,
            total_recipients: 0,
            success_count: 0,
            failed_count: 0,
            scheduled_at: None,
            recurrence: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// Fresh `pending` row for the next occurrence of a recurring
    /// campaign, carrying the same channel/audience/content/recurrence.
    pub fn next_occurrence_row(&self, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let mut next = Campaign::new(
            self.channel,
            self.audience.clone(),
            self.content.clone(),
            now,
        );
        next.scheduled_at = Some(scheduled_at);
        next.recurrence = self.recurrence.clone();
        next
    }
}

/// Per-recipient delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::Sent => "sent",
            RecipientStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => RecipientStatus::Sent,
            "failed" => RecipientStatus::Failed,
            _ => RecipientStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecipientStatus::Pending)
    }
}

/// Durable per-recipient record for one broadcast run. Immutable once
/// materialized except for the terminal fields — the recipient list of
/// a run never changes after snapshot time.
#[derive(Debug, Clone)]
pub struct RecipientSnapshot {
    pub id: String,
    pub campaign_id: String,
    pub address: String,
    pub kind: RecipientKind,
    pub source_id: Option<String>,
    pub status: RecipientStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub provider_ref: Option<String>,
}

/// Opted-in (or not) sales lead. Read-only to the engine.
#[derive(Debug, Clone)]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub opted_in: bool,
}

/// Existing client. Read-only to the engine.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub opted_in: bool,
}

/// Named durable recipient set, usable as an audience selector.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A group member references exactly one of lead, client, or a
/// free-form address — never more than one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberRef {
    Lead(String),
    Client(String),
    Address(String),
}

#[derive(Debug, Clone)]
pub struct GroupMember {
    pub id: String,
    pub group_id: String,
    pub member: MemberRef,
}

/// Ordered drip sequence. Each enrollment advances independently.
#[derive(Debug, Clone)]
pub struct Series {
    pub id: String,
    pub name: String,
    pub channel: ChannelKind,
    pub created_at: DateTime<Utc>,
}

/// One step of a series, with its delay relative to the previous send
/// and cumulative delivery counters for the operator read model.
#[derive(Debug, Clone)]
pub struct SeriesStep {
    pub id: String,
    pub series_id: String,
    pub position: u32,
    pub delay_days: u32,
    pub delay_hours: u32,
    pub subject: Option<String>,
    pub body: String,
    pub sent_count: u32,
    pub failed_count: u32,
}

impl SeriesStep {
    pub fn delay(&self) -> Duration {
        Duration::days(self.delay_days as i64) + Duration::hours(self.delay_hours as i64)
    }
}

/// Step definition used when creating a series.
#[derive(Debug, Clone)]
pub struct SeriesStepDraft {
    pub delay_days: u32,
    pub delay_hours: u32,
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Unsubscribed,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Unsubscribed => "unsubscribed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => EnrollmentStatus::Completed,
            "unsubscribed" => EnrollmentStatus::Unsubscribed,
            _ => EnrollmentStatus::Active,
        }
    }
}

/// The binding of one recipient to one series, with its own cursor.
/// `current_step` only ever moves forward, one step per due-check.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub id: String,
    pub series_id: String,
    pub address: String,
    pub kind: RecipientKind,
    pub source_id: Option<String>,
    pub status: EnrollmentStatus,
    pub current_step: u32,
    pub next_step_due_at: Option<DateTime<Utc>>,
    pub last_step_sent_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
}

