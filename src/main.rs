//! # Blastline — Broadcast Campaign Dispatch & Recurring Series Engine
//!
//! Operator CLI plus the long-running scheduler.
//!
//! Usage:
//!   blastline run                              # Start the scheduler loop
//!   blastline compose --channel email ...      # Create a campaign
//!   blastline campaigns                        # List campaigns
//!   blastline status <id>                      # Per-recipient delivery detail
//!   blastline series create --steps steps.toml # Define a drip series
//!   blastline enroll <series-id> --lead <id>   # Enroll into a series

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use blastline_core::config::BlastlineConfig;
use blastline_core::traits::SystemClock;
use blastline_core::types::{AudienceSelector, ChannelKind};
use blastline_dispatch::{CampaignDraft, Dispatcher, SenderMap, SharedStore, compose};
use blastline_scheduler::{EnrollTarget, SeriesEngine, TickEngine};
use blastline_store::{Recurrence, RecurrencePattern, SeriesStepDraft, Store};

#[derive(Parser)]
#[command(
    name = "blastline",
    version,
    about = "📣 Blastline — broadcast campaigns and drip series over email, SMS, WhatsApp, Telegram and voice"
)]
struct Cli {
    /// Config file (default: ~/.blastline/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler: dispatch due campaigns and advance series
    Run,
    /// Create a campaign (validated and stored as pending)
    Compose {
        /// email | sms | whatsapp | telegram | voice
        #[arg(long)]
        channel: String,
        /// all | leads | clients | group:<id> | individual:<address>
        #[arg(long, default_value = "all")]
        audience: String,
        /// Subject line (required for email)
        #[arg(long)]
        subject: Option<String>,
        /// Message body
        #[arg(long, default_value = "")]
        body: String,
        /// Media attachment URL, repeatable
        #[arg(long)]
        media: Vec<String>,
        /// Voice assistant id (required for voice)
        #[arg(long)]
        assistant: Option<String>,
        /// Scheduled send time, RFC 3339 (omit to send on the next tick)
        #[arg(long)]
        at: Option<String>,
        /// Recurrence pattern: daily | weekly | monthly
        #[arg(long)]
        every: Option<String>,
        /// Recurrence interval multiplier
        #[arg(long, default_value = "1")]
        interval: u32,
        /// Recurrence end date, RFC 3339
        #[arg(long)]
        until: Option<String>,
    },
    /// List campaigns with delivery counts
    Campaigns,
    /// Per-recipient delivery detail for one campaign
    Status { campaign_id: String },
    /// Delete a pending campaign before it starts
    Cancel { campaign_id: String },
    /// Drip series management
    #[command(subcommand)]
    Series(SeriesCommand),
    /// Enroll a lead, client, group, or raw address into a series
    Enroll {
        series_id: String,
        #[arg(long)]
        lead: Option<String>,
        #[arg(long)]
        client: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
    /// Stop a single enrollment; remaining steps are never sent
    Unsubscribe { enrollment_id: String },
}

#[derive(Subcommand)]
enum SeriesCommand {
    /// Create a series from a TOML step file
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        channel: String,
        /// TOML file with a [[step]] block per step
        #[arg(long)]
        steps: PathBuf,
    },
    /// Step stats and enrollment cursors for one series
    Status { series_id: String },
}

/// On-disk step definition for `series create`.
#[derive(Deserialize)]
struct StepFile {
    #[serde(rename = "step")]
    steps: Vec<StepDef>,
}

#[derive(Deserialize)]
struct StepDef {
    #[serde(default)]
    delay_days: u32,
    #[serde(default)]
    delay_hours: u32,
    subject: Option<String>,
    body: String,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("'{raw}' is not an RFC 3339 timestamp"))
}

fn parse_recurrence(
    every: Option<&str>,
    interval: u32,
    until: Option<&str>,
) -> Result<Option<Recurrence>> {
    let Some(every) = every else {
        return Ok(None);
    };
    let pattern = RecurrencePattern::parse(every)
        .with_context(|| format!("'{every}' is not daily, weekly or monthly"))?;
    let end_date = until.map(parse_time).transpose()?;
    Ok(Some(Recurrence {
        pattern,
        interval,
        end_date,
    }))
}

fn open_store(config: &BlastlineConfig) -> Result<Store> {
    if let Some(parent) = config.store.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Store::open(&config.store.db_path)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "blastline=debug"
    } else {
        "blastline=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => BlastlineConfig::load_from(path)?,
        None => BlastlineConfig::load()?,
    };

    match cli.command {
        Command::Run => run_scheduler(&config).await,
        Command::Compose {
            channel,
            audience,
            subject,
            body,
            media,
            assistant,
            at,
            every,
            interval,
            until,
        } => {
            let store = open_store(&config)?;
            let draft = CampaignDraft {
                channel: ChannelKind::parse(&channel)?,
                audience: AudienceSelector::parse(&audience)?,
                subject,
                body,
                media_urls: media,
                assistant_id: assistant,
                scheduled_at: at.as_deref().map(parse_time).transpose()?,
                recurrence: parse_recurrence(every.as_deref(), interval, until.as_deref())?,
            };
            let composed = compose::compose(&store, draft, Utc::now())?;
            println!("✅ Campaign {} created", composed.campaign.id);
            println!(
                "   ~{} recipient(s), {} omitted (no usable address)",
                composed.estimated_recipients, composed.omitted
            );
            match composed.campaign.scheduled_at {
                Some(at) => println!("   Scheduled for {at}"),
                None => println!("   Dispatches on the next scheduler tick"),
            }
            Ok(())
        }
        Command::Campaigns => {
            let store = open_store(&config)?;
            for (campaign, total, sent, failed) in store.campaign_summaries()? {
                println!(
                    "{}  {:<9} {:<10} {:>4}/{:<4} sent, {} failed  {}",
                    campaign.id,
                    campaign.channel.as_str(),
                    campaign.status.as_str(),
                    sent,
                    total,
                    failed,
                    campaign.audience,
                );
            }
            Ok(())
        }
        Command::Status { campaign_id } => {
            let store = open_store(&config)?;
            let campaign = store.campaign(&campaign_id)?;
            println!(
                "Campaign {}  [{}]  {} on {}",
                campaign.id,
                campaign.status.as_str(),
                campaign.audience,
                campaign.channel
            );
            for snapshot in store.campaign_recipients(&campaign_id)? {
                let note = snapshot
                    .error_message
                    .as_deref()
                    .or(snapshot.provider_ref.as_deref())
                    .unwrap_or("");
                println!(
                    "  {:<32} {:<8} {}",
                    snapshot.address,
                    snapshot.status.as_str(),
                    note
                );
            }
            Ok(())
        }
        Command::Cancel { campaign_id } => {
            let store = open_store(&config)?;
            store.delete_campaign(&campaign_id)?;
            println!("🗑️  Campaign {campaign_id} cancelled");
            Ok(())
        }
        Command::Series(series_command) => run_series_command(&config, series_command).await,
        Command::Enroll {
            series_id,
            lead,
            client,
            group,
            address,
        } => {
            let target = match (lead, client, group, address) {
                (Some(id), None, None, None) => EnrollTarget::Lead(id),
                (None, Some(id), None, None) => EnrollTarget::Client(id),
                (None, None, Some(id), None) => EnrollTarget::Group(id),
                (None, None, None, Some(a)) => EnrollTarget::Address(a),
                _ => anyhow::bail!(
                    "pass exactly one of --lead, --client, --group, --address"
                ),
            };
            let store: SharedStore = Arc::new(tokio::sync::Mutex::new(open_store(&config)?));
            let engine = SeriesEngine::new(
                store,
                Arc::new(HashMap::new()),
                Duration::from_secs(config.dispatch.send_timeout_secs),
            );
            let outcome = engine.enroll(&series_id, target, Utc::now()).await?;
            println!(
                "✅ {} enrolled, {} skipped (already active or no usable address)",
                outcome.enrolled, outcome.skipped
            );
            Ok(())
        }
        Command::Unsubscribe { enrollment_id } => {
            let store: SharedStore = Arc::new(tokio::sync::Mutex::new(open_store(&config)?));
            let engine = SeriesEngine::new(
                store,
                Arc::new(HashMap::new()),
                Duration::from_secs(config.dispatch.send_timeout_secs),
            );
            engine.unsubscribe(&enrollment_id).await?;
            println!("✅ Enrollment {enrollment_id} unsubscribed");
            Ok(())
        }
    }
}

async fn run_scheduler(config: &BlastlineConfig) -> Result<()> {
    let senders: SenderMap = Arc::new(blastline_channels::build_senders(config)?);
    if senders.is_empty() {
        tracing::warn!("no channels enabled in config; campaigns will fail at dispatch");
    }
    let store: SharedStore = Arc::new(tokio::sync::Mutex::new(open_store(config)?));
    let send_timeout = Duration::from_secs(config.dispatch.send_timeout_secs);

    let dispatcher = Dispatcher::new(
        store.clone(),
        senders.clone(),
        config.dispatch.max_parallel_sends,
        send_timeout,
    );
    let series = SeriesEngine::new(store.clone(), senders.clone(), send_timeout);
    let engine = TickEngine::new(
        store,
        dispatcher,
        series,
        Arc::new(SystemClock),
        Duration::from_secs(config.scheduler.tick_secs),
    );

    println!("📣 Blastline v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database: {}", config.store.db_path.display());
    println!("   ⏱️  Tick:     every {}s", config.scheduler.tick_secs);
    let enabled: Vec<&str> = senders.keys().map(|k| k.as_str()).collect();
    println!("   📡 Channels: {}", enabled.join(", "));
    println!();

    engine.run().await;
    Ok(())
}

async fn run_series_command(config: &BlastlineConfig, command: SeriesCommand) -> Result<()> {
    match command {
        SeriesCommand::Create {
            name,
            channel,
            steps,
        } => {
            let content = std::fs::read_to_string(&steps)
                .with_context(|| format!("read {}", steps.display()))?;
            let file: StepFile = toml::from_str(&content)
                .with_context(|| format!("parse {}", steps.display()))?;
            let drafts: Vec<SeriesStepDraft> = file
                .steps
                .into_iter()
                .map(|s| SeriesStepDraft {
                    delay_days: s.delay_days,
                    delay_hours: s.delay_hours,
                    subject: s.subject,
                    body: s.body,
                })
                .collect();
            let mut store = open_store(config)?;
            let series = store.create_series(
                &name,
                ChannelKind::parse(&channel)?,
                &drafts,
                Utc::now(),
            )?;
            println!("✅ Series {} created with {} step(s)", series.id, drafts.len());
            Ok(())
        }
        SeriesCommand::Status { series_id } => {
            let store = open_store(config)?;
            let series = store.series(&series_id)?;
            println!("Series {}  '{}' on {}", series.id, series.name, series.channel);
            for step in store.series_steps(&series_id)? {
                println!(
                    "  step {}: +{}d{}h  {} sent, {} failed  {}",
                    step.position,
                    step.delay_days,
                    step.delay_hours,
                    step.sent_count,
                    step.failed_count,
                    step.subject.as_deref().unwrap_or("(no subject)")
                );
            }
            for enrollment in store.series_enrollments(&series_id)? {
                let due = enrollment
                    .next_step_due_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "  {:<32} step {}  [{}]  next due {}",
                    enrollment.address,
                    enrollment.current_step,
                    enrollment.status.as_str(),
                    due
                );
            }
            Ok(())
        }
    }
}
