//! SQLite store — schema migrations and every query the engine runs.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use blastline_core::error::{BlastlineError, Result};
use blastline_core::types::{AudienceSelector, ChannelKind, MessageContent, Recipient, RecipientKind};

use crate::models::{
    Campaign, CampaignStatus, Client, Enrollment, EnrollmentStatus, Group, GroupMember, Lead,
    MemberRef, Recurrence, RecurrencePattern, RecipientSnapshot, RecipientStatus, Series,
    SeriesStep, SeriesStepDraft,
};

/// Relational store for the whole engine.
pub struct Store {
    conn: Connection,
}

/// Shared SELECT column list for campaign queries — single source of truth.
const CAMPAIGN_SELECT: &str = "SELECT id,channel,audience,subject,body,media_urls,assistant_id,status,total_recipients,success_count,failed_count,scheduled_at,recur_pattern,recur_interval,recur_end,created_at,completed_at FROM campaigns";

const SNAPSHOT_SELECT: &str = "SELECT id,campaign_id,address,source_kind,source_id,status,sent_at,error_message,provider_ref FROM campaign_recipients";

const ENROLLMENT_SELECT: &str = "SELECT id,series_id,address,source_kind,source_id,status,current_step,next_step_due_at,last_step_sent_at,enrolled_at FROM series_enrollments";

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conv_err(idx, BlastlineError::Store(format!("bad timestamp '{s}': {e}"))))
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn conv_err(idx: usize, e: BlastlineError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_campaign(row: &rusqlite::Row) -> rusqlite::Result<Campaign> {
    let channel: String = row.get(1)?;
    let audience: String = row.get(2)?;
    let media_urls: String = row.get(5)?;
    let recur_pattern: Option<String> = row.get(12)?;
    let recur_interval: Option<u32> = row.get(13)?;
    let recurrence = match (recur_pattern.as_deref().and_then(RecurrencePattern::parse), recur_interval) {
        (Some(pattern), Some(interval)) => Some(Recurrence {
            pattern,
            interval,
            end_date: parse_opt_ts(row.get(14)?),
        }),
        _ => None,
    };
    Ok(Campaign {
        id: row.get(0)?,
        channel: ChannelKind::parse(&channel).map_err(|e| conv_err(1, e))?,
        audience: AudienceSelector::parse(&audience).map_err(|e| conv_err(2, e))?,
        content: MessageContent {
            subject: row.get(3)?,
            body: row.get(4)?,
            media_urls: serde_json::from_str(&media_urls).unwrap_or_default(),
            assistant_id: row.get(6)?,
        },
        status: CampaignStatus::parse(&row.get::<_, String>(7)?),
        total_recipients: row.get(8)?,
        success_count: row.get(9)?,
        failed_count: row.get(10)?,
        scheduled_at: parse_opt_ts(row.get(11)?),
        recurrence,
        created_at: parse_ts(15, &row.get::<_, String>(15)?)?,
        completed_at: parse_opt_ts(row.get(16)?),
    })
}

fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<RecipientSnapshot> {
    Ok(RecipientSnapshot {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        address: row.get(2)?,
        kind: RecipientKind::parse(&row.get::<_, String>(3)?),
        source_id: row.get(4)?,
        status: RecipientStatus::parse(&row.get::<_, String>(5)?),
        sent_at: parse_opt_ts(row.get(6)?),
        error_message: row.get(7)?,
        provider_ref: row.get(8)?,
    })
}

fn row_to_enrollment(row: &rusqlite::Row) -> rusqlite::Result<Enrollment> {
    Ok(Enrollment {
        id: row.get(0)?,
        series_id: row.get(1)?,
        address: row.get(2)?,
        kind: RecipientKind::parse(&row.get::<_, String>(3)?),
        source_id: row.get(4)?,
        status: EnrollmentStatus::parse(&row.get::<_, String>(5)?),
        current_step: row.get(6)?,
        next_step_due_at: parse_opt_ts(row.get(7)?),
        last_step_sent_at: parse_opt_ts(row.get(8)?),
        enrolled_at: parse_ts(9, &row.get::<_, String>(9)?)?,
    })
}

impl Store {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BlastlineError::Store(format!("create db dir: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| BlastlineError::Store(format!("DB open: {e}")))?;
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BlastlineError::Store(format!("DB open: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        // WAL allows the tick loop and the operator CLI to share the file.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| BlastlineError::Store(format!("DB pragma: {e}")))?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            -- Audience tables. Read-only to the engine: populated by the
            -- record-management side of the platform (or seed tooling).
            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT,
                phone TEXT,
                opted_in INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT,
                phone TEXT,
                opted_in INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bot_subscribers (
                chat_id TEXT PRIMARY KEY,
                username TEXT,
                subscribed_at TEXT NOT NULL
            );

            -- One row per broadcast run; recurring definitions create a
            -- fresh row per occurrence.
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                channel TEXT NOT NULL,
                audience TEXT NOT NULL,
                subject TEXT,
                body TEXT NOT NULL,
                media_urls TEXT NOT NULL DEFAULT '[]',
                assistant_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                total_recipients INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                scheduled_at TEXT,
                recur_pattern TEXT,
                recur_interval INTEGER,
                recur_end TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS campaign_recipients (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL,
                address TEXT NOT NULL,
                source_kind TEXT NOT NULL,
                source_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                sent_at TEXT,
                error_message TEXT,
                provider_ref TEXT,
                FOREIGN KEY (campaign_id) REFERENCES campaigns(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_recipients_campaign
                ON campaign_recipients(campaign_id);

            CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Exactly one of lead_id / client_id / address is set.
            CREATE TABLE IF NOT EXISTS group_members (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                lead_id TEXT,
                client_id TEXT,
                address TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS series (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                channel TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS series_steps (
                id TEXT PRIMARY KEY,
                series_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                delay_days INTEGER NOT NULL DEFAULT 0,
                delay_hours INTEGER NOT NULL DEFAULT 0,
                subject TEXT,
                body TEXT NOT NULL,
                sent_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (series_id) REFERENCES series(id) ON DELETE CASCADE,
                UNIQUE(series_id, position)
            );

            CREATE TABLE IF NOT EXISTS series_enrollments (
                id TEXT PRIMARY KEY,
                series_id TEXT NOT NULL,
                address TEXT NOT NULL,
                source_kind TEXT NOT NULL,
                source_id TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                current_step INTEGER NOT NULL DEFAULT 0,
                next_step_due_at TEXT,
                last_step_sent_at TEXT,
                enrolled_at TEXT NOT NULL,
                FOREIGN KEY (series_id) REFERENCES series(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_enrollments_due
                ON series_enrollments(status, next_step_due_at);
        ",
            )
            .map_err(|e| BlastlineError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    // ─── Campaigns ──────────────────────────────────────

    pub fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let media = serde_json::to_string(&campaign.content.media_urls).unwrap_or_else(|_| "[]".into());
        self.conn
            .execute(
                "INSERT INTO campaigns
                 (id,channel,audience,subject,body,media_urls,assistant_id,status,
                  total_recipients,success_count,failed_count,scheduled_at,
                  recur_pattern,recur_interval,recur_end,created_at,completed_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
                params![
                    campaign.id,
                    campaign.channel.as_str(),
                    campaign.audience.to_string(),
                    campaign.content.subject,
                    campaign.content.body,
                    media,
                    campaign.content.assistant_id,
                    campaign.status.as_str(),
                    campaign.total_recipients,
                    campaign.success_count,
                    campaign.failed_count,
                    campaign.scheduled_at.map(ts),
                    campaign.recurrence.as_ref().map(|r| r.pattern.as_str()),
                    campaign.recurrence.as_ref().map(|r| r.interval),
                    campaign.recurrence.as_ref().and_then(|r| r.end_date).map(ts),
                    ts(campaign.created_at),
                    campaign.completed_at.map(ts),
                ],
            )
            .map_err(|e| BlastlineError::Store(format!("Insert campaign: {e}")))?;
        Ok(())
    }

    pub fn campaign(&self, id: &str) -> Result<Campaign> {
        self.conn
            .query_row(
                &format!("{CAMPAIGN_SELECT} WHERE id=?1"),
                params![id],
                row_to_campaign,
            )
            .optional()
            .map_err(|e| BlastlineError::Store(format!("Load campaign: {e}")))?
            .ok_or_else(|| BlastlineError::NotFound(format!("campaign {id}")))
    }

    pub fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CAMPAIGN_SELECT} ORDER BY created_at DESC"))
            .map_err(|e| BlastlineError::Store(format!("List campaigns: {e}")))?;
        let rows = stmt
            .query_map([], row_to_campaign)
            .map_err(|e| BlastlineError::Store(format!("List campaigns: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| BlastlineError::Store(format!("List campaigns: {e}")))
    }

    /// Campaigns whose send time has arrived: `pending` with no
    /// schedule ("now") or a schedule at or before `now`.
    pub fn due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{CAMPAIGN_SELECT} WHERE status='pending'
                 AND (scheduled_at IS NULL OR scheduled_at <= ?1)
                 ORDER BY created_at"
            ))
            .map_err(|e| BlastlineError::Store(format!("Due campaigns: {e}")))?;
        let rows = stmt
            .query_map(params![ts(now)], row_to_campaign)
            .map_err(|e| BlastlineError::Store(format!("Due campaigns: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| BlastlineError::Store(format!("Due campaigns: {e}")))
    }

    /// Atomic `pending → sending` claim. Returns false when another
    /// tick already owns the campaign — the sole concurrency control
    /// against double dispatch.
    pub fn claim_campaign(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE campaigns SET status='sending' WHERE id=?1 AND status='pending'",
                params![id],
            )
            .map_err(|e| BlastlineError::Store(format!("Claim campaign: {e}")))?;
        Ok(changed == 1)
    }

    /// Terminal failure before any send attempt (bad audience, bad
    /// compose fields discovered at dispatch time).
    pub fn fail_campaign(&self, id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE campaigns SET status='failed' WHERE id=?1",
                params![id],
            )
            .map_err(|e| BlastlineError::Store(format!("Fail campaign: {e}")))?;
        Ok(())
    }

    pub fn finalize_campaign(
        &self,
        id: &str,
        success: u32,
        failed: u32,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE campaigns SET status='completed', success_count=?1,
                 failed_count=?2, completed_at=?3 WHERE id=?4",
                params![success, failed, ts(completed_at), id],
            )
            .map_err(|e| BlastlineError::Store(format!("Finalize campaign: {e}")))?;
        Ok(())
    }

    /// Delete a campaign that has not started. A `sending` campaign is
    /// not cancellable in-place; terminal rows are immutable history.
    pub fn delete_campaign(&self, id: &str) -> Result<()> {
        let campaign = self.campaign(id)?;
        if campaign.status != CampaignStatus::Pending {
            return Err(BlastlineError::Validation(format!(
                "campaign {id} is {} — only pending campaigns can be deleted",
                campaign.status.as_str()
            )));
        }
        self.conn
            .execute("DELETE FROM campaigns WHERE id=?1", params![id])
            .map_err(|e| BlastlineError::Store(format!("Delete campaign: {e}")))?;
        Ok(())
    }

    // ─── Recipient snapshots ──────────────────────────────────────

    /// Materialize one snapshot per resolved recipient in a single
    /// transaction, fixing `total_recipients` for the run. All rows of
    /// a run appear together or not at all.
    pub fn materialize_snapshots(
        &mut self,
        campaign_id: &str,
        recipients: &[Recipient],
    ) -> Result<Vec<RecipientSnapshot>> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| BlastlineError::Store(format!("Snapshot tx: {e}")))?;
        let mut snapshots = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let snapshot = RecipientSnapshot {
                id: new_id(),
                campaign_id: campaign_id.to_string(),
                address: recipient.address.clone(),
                kind: recipient.kind,
                source_id: recipient.source_id.clone(),
                status: RecipientStatus::Pending,
                sent_at: None,
                error_message: None,
                provider_ref: None,
            };
            tx.execute(
                "INSERT INTO campaign_recipients
                 (id,campaign_id,address,source_kind,source_id,status)
                 VALUES (?1,?2,?3,?4,?5,'pending')",
                params![
                    snapshot.id,
                    snapshot.campaign_id,
                    snapshot.address,
                    snapshot.kind.as_str(),
                    snapshot.source_id,
                ],
            )
            .map_err(|e| BlastlineError::Store(format!("Insert snapshot: {e}")))?;
            snapshots.push(snapshot);
        }
        tx.execute(
            "UPDATE campaigns SET total_recipients=?1 WHERE id=?2",
            params![recipients.len() as u32, campaign_id],
        )
        .map_err(|e| BlastlineError::Store(format!("Set total: {e}")))?;
        tx.commit()
            .map_err(|e| BlastlineError::Store(format!("Snapshot commit: {e}")))?;
        Ok(snapshots)
    }

    pub fn mark_snapshot_sent(
        &self,
        id: &str,
        sent_at: DateTime<Utc>,
        provider_ref: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE campaign_recipients SET status='sent', sent_at=?1, provider_ref=?2
                 WHERE id=?3 AND status='pending'",
                params![ts(sent_at), provider_ref, id],
            )
            .map_err(|e| BlastlineError::Store(format!("Mark sent: {e}")))?;
        Ok(())
    }

    pub fn mark_snapshot_failed(&self, id: &str, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE campaign_recipients SET status='failed', error_message=?1
                 WHERE id=?2 AND status='pending'",
                params![error, id],
            )
            .map_err(|e| BlastlineError::Store(format!("Mark failed: {e}")))?;
        Ok(())
    }

    /// (total, sent, failed) for one campaign, counted from snapshots.
    pub fn snapshot_counts(&self, campaign_id: &str) -> Result<(u32, u32, u32)> {
        self.conn
            .query_row(
                "SELECT COUNT(*),
                        IFNULL(SUM(CASE WHEN status='sent' THEN 1 ELSE 0 END), 0),
                        IFNULL(SUM(CASE WHEN status='failed' THEN 1 ELSE 0 END), 0)
                 FROM campaign_recipients WHERE campaign_id=?1",
                params![campaign_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| BlastlineError::Store(format!("Snapshot counts: {e}")))
    }

    /// Per-campaign recipient listing for the delivery-detail surface.
    pub fn campaign_recipients(&self, campaign_id: &str) -> Result<Vec<RecipientSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SNAPSHOT_SELECT} WHERE campaign_id=?1 ORDER BY address"))
            .map_err(|e| BlastlineError::Store(format!("List recipients: {e}")))?;
        let rows = stmt
            .query_map(params![campaign_id], row_to_snapshot)
            .map_err(|e| BlastlineError::Store(format!("List recipients: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| BlastlineError::Store(format!("List recipients: {e}")))
    }

    // ─── Audience (read-only to the engine) ──────────────────────────

    pub fn add_lead(
        &self,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
        opted_in: bool,
    ) -> Result<Lead> {
        let lead = Lead {
            id: new_id(),
            name: name.to_string(),
            email: email.map(String::from),
            phone: phone.map(String::from),
            opted_in,
        };
        self.conn
            .execute(
                "INSERT INTO leads (id,name,email,phone,opted_in,created_at)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![lead.id, lead.name, lead.email, lead.phone, lead.opted_in as i32, ts(Utc::now())],
            )
            .map_err(|e| BlastlineError::Store(format!("Insert lead: {e}")))?;
        Ok(lead)
    }

    pub fn add_client(
        &self,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
        opted_in: bool,
    ) -> Result<Client> {
        let client = Client {
            id: new_id(),
            name: name.to_string(),
            email: email.map(String::from),
            phone: phone.map(String::from),
            opted_in,
        };
        self.conn
            .execute(
                "INSERT INTO clients (id,name,email,phone,opted_in,created_at)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![client.id, client.name, client.email, client.phone, client.opted_in as i32, ts(Utc::now())],
            )
            .map_err(|e| BlastlineError::Store(format!("Insert client: {e}")))?;
        Ok(client)
    }

    pub fn add_bot_subscriber(&self, chat_id: &str, username: Option<&str>) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO bot_subscribers (chat_id,username,subscribed_at)
                 VALUES (?1,?2,?3)",
                params![chat_id, username, ts(Utc::now())],
            )
            .map_err(|e| BlastlineError::Store(format!("Insert subscriber: {e}")))?;
        Ok(())
    }

    pub fn lead(&self, id: &str) -> Result<Lead> {
        self.conn
            .query_row(
                "SELECT id,name,email,phone,opted_in FROM leads WHERE id=?1",
                params![id],
                |row| {
                    Ok(Lead {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        phone: row.get(3)?,
                        opted_in: row.get::<_, i32>(4)? != 0,
                    })
                },
            )
            .optional()
            .map_err(|e| BlastlineError::Store(format!("Load lead: {e}")))?
            .ok_or_else(|| BlastlineError::NotFound(format!("lead {id}")))
    }

    pub fn client(&self, id: &str) -> Result<Client> {
        self.conn
            .query_row(
                "SELECT id,name,email,phone,opted_in FROM clients WHERE id=?1",
                params![id],
                |row| {
                    Ok(Client {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        phone: row.get(3)?,
                        opted_in: row.get::<_, i32>(4)? != 0,
                    })
                },
            )
            .optional()
            .map_err(|e| BlastlineError::Store(format!("Load client: {e}")))?
            .ok_or_else(|| BlastlineError::NotFound(format!("client {id}")))
    }

    pub fn opted_in_leads(&self) -> Result<Vec<Lead>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id,name,email,phone,opted_in FROM leads WHERE opted_in=1 ORDER BY created_at")
            .map_err(|e| BlastlineError::Store(format!("List leads: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Lead {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    phone: row.get(3)?,
                    opted_in: row.get::<_, i32>(4)? != 0,
                })
            })
            .map_err(|e| BlastlineError::Store(format!("List leads: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| BlastlineError::Store(format!("List leads: {e}")))
    }

    pub fn opted_in_clients(&self) -> Result<Vec<Client>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id,name,email,phone,opted_in FROM clients WHERE opted_in=1 ORDER BY created_at")
            .map_err(|e| BlastlineError::Store(format!("List clients: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Client {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    phone: row.get(3)?,
                    opted_in: row.get::<_, i32>(4)? != 0,
                })
            })
            .map_err(|e| BlastlineError::Store(format!("List clients: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| BlastlineError::Store(format!("List clients: {e}")))
    }

    pub fn bot_subscribers(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT chat_id FROM bot_subscribers ORDER BY subscribed_at")
            .map_err(|e| BlastlineError::Store(format!("List subscribers: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| BlastlineError::Store(format!("List subscribers: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| BlastlineError::Store(format!("List subscribers: {e}")))
    }

    // ─── Groups ──────────────────────────────────────

    pub fn create_group(&self, name: &str) -> Result<Group> {
        let group = Group {
            id: new_id(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.conn
            .execute(
                "INSERT INTO groups (id,name,created_at) VALUES (?1,?2,?3)",
                params![group.id, group.name, ts(group.created_at)],
            )
            .map_err(|e| BlastlineError::Store(format!("Insert group: {e}")))?;
        Ok(group)
    }

    pub fn group(&self, id: &str) -> Result<Group> {
        self.conn
            .query_row(
                "SELECT id,name,created_at FROM groups WHERE id=?1",
                params![id],
                |row| {
                    Ok(Group {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: parse_ts(2, &row.get::<_, String>(2)?)?,
                    })
                },
            )
            .optional()
            .map_err(|e| BlastlineError::Store(format!("Load group: {e}")))?
            .ok_or_else(|| BlastlineError::NotFound(format!("group {id}")))
    }

    pub fn add_group_member(&self, group_id: &str, member: MemberRef) -> Result<GroupMember> {
        let (lead_id, client_id, address) = match &member {
            MemberRef::Lead(id) => (Some(id.clone()), None, None),
            MemberRef::Client(id) => (None, Some(id.clone()), None),
            MemberRef::Address(addr) => (None, None, Some(addr.clone())),
        };
        let row = GroupMember {
            id: new_id(),
            group_id: group_id.to_string(),
            member,
        };
        self.conn
            .execute(
                "INSERT INTO group_members (id,group_id,lead_id,client_id,address,created_at)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![row.id, row.group_id, lead_id, client_id, address, ts(Utc::now())],
            )
            .map_err(|e| BlastlineError::Store(format!("Insert member: {e}")))?;
        Ok(row)
    }

    pub fn group_members(&self, group_id: &str) -> Result<Vec<GroupMember>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id,group_id,lead_id,client_id,address FROM group_members
                 WHERE group_id=?1 ORDER BY created_at",
            )
            .map_err(|e| BlastlineError::Store(format!("List members: {e}")))?;
        let rows = stmt
            .query_map(params![group_id], |row| {
                let lead_id: Option<String> = row.get(2)?;
                let client_id: Option<String> = row.get(3)?;
                let address: Option<String> = row.get(4)?;
                let member = match (lead_id, client_id, address) {
                    (Some(id), _, _) => MemberRef::Lead(id),
                    (_, Some(id), _) => MemberRef::Client(id),
                    (_, _, Some(addr)) => MemberRef::Address(addr),
                    _ => MemberRef::Address(String::new()),
                };
                Ok(GroupMember {
                    id: row.get(0)?,
                    group_id: row.get(1)?,
                    member,
                })
            })
            .map_err(|e| BlastlineError::Store(format!("List members: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| BlastlineError::Store(format!("List members: {e}")))
    }

    pub fn delete_group(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM groups WHERE id=?1", params![id])
            .map_err(|e| BlastlineError::Store(format!("Delete group: {e}")))?;
        Ok(())
    }

    // ─── Series ──────────────────────────────────────

    /// Create a series with its ordered step list in one transaction.
    pub fn create_series(
        &mut self,
        name: &str,
        channel: ChannelKind,
        steps: &[SeriesStepDraft],
        now: DateTime<Utc>,
    ) -> Result<Series> {
        if steps.is_empty() {
            return Err(BlastlineError::Validation(
                "a series needs at least one step".into(),
            ));
        }
        let series = Series {
            id: new_id(),
            name: name.to_string(),
            channel,
            created_at: now,
        };
        let tx = self
            .conn
            .transaction()
            .map_err(|e| BlastlineError::Store(format!("Series tx: {e}")))?;
        tx.execute(
            "INSERT INTO series (id,name,channel,created_at) VALUES (?1,?2,?3,?4)",
            params![series.id, series.name, series.channel.as_str(), ts(series.created_at)],
        )
        .map_err(|e| BlastlineError::Store(format!("Insert series: {e}")))?;
        for (position, step) in steps.iter().enumerate() {
            tx.execute(
                "INSERT INTO series_steps
                 (id,series_id,position,delay_days,delay_hours,subject,body)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    new_id(),
                    series.id,
                    position as u32,
                    step.delay_days,
                    step.delay_hours,
                    step.subject,
                    step.body,
                ],
            )
            .map_err(|e| BlastlineError::Store(format!("Insert step: {e}")))?;
        }
        tx.commit()
            .map_err(|e| BlastlineError::Store(format!("Series commit: {e}")))?;
        Ok(series)
    }

    pub fn series(&self, id: &str) -> Result<Series> {
        self.conn
            .query_row(
                "SELECT id,name,channel,created_at FROM series WHERE id=?1",
                params![id],
                |row| {
                    let channel: String = row.get(2)?;
                    Ok(Series {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        channel: ChannelKind::parse(&channel).map_err(|e| conv_err(2, e))?,
                        created_at: parse_ts(3, &row.get::<_, String>(3)?)?,
                    })
                },
            )
            .optional()
            .map_err(|e| BlastlineError::Store(format!("Load series: {e}")))?
            .ok_or_else(|| BlastlineError::NotFound(format!("series {id}")))
    }

    /// Ordered steps with cumulative sent/failed counters.
    pub fn series_steps(&self, series_id: &str) -> Result<Vec<SeriesStep>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id,series_id,position,delay_days,delay_hours,subject,body,
                        sent_count,failed_count
                 FROM series_steps WHERE series_id=?1 ORDER BY position",
            )
            .map_err(|e| BlastlineError::Store(format!("List steps: {e}")))?;
        let rows = stmt
            .query_map(params![series_id], |row| {
                Ok(SeriesStep {
                    id: row.get(0)?,
                    series_id: row.get(1)?,
                    position: row.get(2)?,
                    delay_days: row.get(3)?,
                    delay_hours: row.get(4)?,
                    subject: row.get(5)?,
                    body: row.get(6)?,
                    sent_count: row.get(7)?,
                    failed_count: row.get(8)?,
                })
            })
            .map_err(|e| BlastlineError::Store(format!("List steps: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| BlastlineError::Store(format!("List steps: {e}")))
    }

    pub fn bump_step_counter(&self, step_id: &str, sent: bool) -> Result<()> {
        let sql = if sent {
            "UPDATE series_steps SET sent_count = sent_count + 1 WHERE id=?1"
        } else {
            "UPDATE series_steps SET failed_count = failed_count + 1 WHERE id=?1"
        };
        self.conn
            .execute(sql, params![step_id])
            .map_err(|e| BlastlineError::Store(format!("Bump step: {e}")))?;
        Ok(())
    }

    // ─── Enrollments ──────────────────────────────────────

    pub fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO series_enrollments
                 (id,series_id,address,source_kind,source_id,status,current_step,
                  next_step_due_at,last_step_sent_at,enrolled_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                params![
                    enrollment.id,
                    enrollment.series_id,
                    enrollment.address,
                    enrollment.kind.as_str(),
                    enrollment.source_id,
                    enrollment.status.as_str(),
                    enrollment.current_step,
                    enrollment.next_step_due_at.map(ts),
                    enrollment.last_step_sent_at.map(ts),
                    ts(enrollment.enrolled_at),
                ],
            )
            .map_err(|e| BlastlineError::Store(format!("Insert enrollment: {e}")))?;
        Ok(())
    }

    /// Duplicate-enroll guard: is this address already actively
    /// enrolled in this series?
    pub fn active_enrollment_exists(&self, series_id: &str, address: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM series_enrollments
                 WHERE series_id=?1 AND address=?2 AND status='active' LIMIT 1",
                params![series_id, address],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| BlastlineError::Store(format!("Enrollment lookup: {e}")))?;
        Ok(found.is_some())
    }

    pub fn enrollment(&self, id: &str) -> Result<Enrollment> {
        self.conn
            .query_row(
                &format!("{ENROLLMENT_SELECT} WHERE id=?1"),
                params![id],
                row_to_enrollment,
            )
            .optional()
            .map_err(|e| BlastlineError::Store(format!("Load enrollment: {e}")))?
            .ok_or_else(|| BlastlineError::NotFound(format!("enrollment {id}")))
    }

    pub fn series_enrollments(&self, series_id: &str) -> Result<Vec<Enrollment>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ENROLLMENT_SELECT} WHERE series_id=?1 ORDER BY enrolled_at"))
            .map_err(|e| BlastlineError::Store(format!("List enrollments: {e}")))?;
        let rows = stmt
            .query_map(params![series_id], row_to_enrollment)
            .map_err(|e| BlastlineError::Store(format!("List enrollments: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| BlastlineError::Store(format!("List enrollments: {e}")))
    }

    pub fn due_enrollments(&self, now: DateTime<Utc>) -> Result<Vec<Enrollment>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{ENROLLMENT_SELECT} WHERE status='active'
                 AND next_step_due_at IS NOT NULL AND next_step_due_at <= ?1
                 ORDER BY next_step_due_at"
            ))
            .map_err(|e| BlastlineError::Store(format!("Due enrollments: {e}")))?;
        let rows = stmt
            .query_map(params![ts(now)], row_to_enrollment)
            .map_err(|e| BlastlineError::Store(format!("Due enrollments: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| BlastlineError::Store(format!("Due enrollments: {e}")))
    }

    /// Move the cursor forward after a step send. The cursor only ever
    /// advances; `next_due_at = None` parks the enrollment until
    /// `complete_enrollment` closes it.
    pub fn advance_enrollment(
        &self,
        id: &str,
        current_step: u32,
        next_due_at: Option<DateTime<Utc>>,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE series_enrollments
                 SET current_step=?1, next_step_due_at=?2, last_step_sent_at=?3
                 WHERE id=?4 AND status='active'",
                params![current_step, next_due_at.map(ts), ts(sent_at), id],
            )
            .map_err(|e| BlastlineError::Store(format!("Advance enrollment: {e}")))?;
        Ok(())
    }

    pub fn complete_enrollment(&self, id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE series_enrollments
                 SET status='completed', next_step_due_at=NULL
                 WHERE id=?1 AND status='active'",
                params![id],
            )
            .map_err(|e| BlastlineError::Store(format!("Complete enrollment: {e}")))?;
        Ok(())
    }

    pub fn unsubscribe_enrollment(&self, id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE series_enrollments
                 SET status='unsubscribed', next_step_due_at=NULL
                 WHERE id=?1",
                params![id],
            )
            .map_err(|e| BlastlineError::Store(format!("Unsubscribe: {e}")))?;
        Ok(())
    }

    // ─── Read model helpers ──────────────────────────────────────

    /// Aggregate counts per campaign for the operator campaign list.
    pub fn campaign_summaries(&self) -> Result<Vec<(Campaign, u32, u32, u32)>> {
        let campaigns = self.list_campaigns()?;
        let mut out = Vec::with_capacity(campaigns.len());
        for campaign in campaigns {
            let (total, sent, failed) = self.snapshot_counts(&campaign.id)?;
            out.push((campaign, total, sent, failed));
        }
        Ok(out)
    }
}
