//! The tick loop that drives everything time-based.
//!
//! Each tick is one pass over due work: dispatch due campaigns, arm
//! the next occurrence of recurring ones, then advance due series
//! enrollments. Every decision reads the injected clock, never
//! `Utc::now()` directly, so tests drive the engine through simulated
//! days in milliseconds.

use std::sync::Arc;
use std::time::Duration;

use blastline_core::error::Result;
use blastline_core::traits::Clock;
use blastline_dispatch::{Dispatcher, SharedStore};

use crate::recurrence::next_occurrence;
use crate::series::SeriesEngine;

pub struct TickEngine {
    store: SharedStore,
    dispatcher: Dispatcher,
    series: SeriesEngine,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
}

impl TickEngine {
    pub fn new(
        store: SharedStore,
        dispatcher: Dispatcher,
        series: SeriesEngine,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            series,
            clock,
            tick_interval,
        }
    }

    /// One scheduling pass. Errors on a single campaign are logged and
    /// do not stop the rest of the tick.
    pub async fn tick(&self) -> Result<()> {
        let now = self.clock.now();

        let due = {
            let store = self.store.lock().await;
            store.due_campaigns(now)?
        };

        for campaign in due {
            match self.dispatcher.run(&campaign.id, now).await {
                Ok(Some(summary)) => {
                    tracing::debug!(
                        "campaign {}: {}/{} sent",
                        summary.campaign_id,
                        summary.sent,
                        summary.total
                    );
                    if let Some(recurrence) = &campaign.recurrence {
                        // Next occurrence counts from the scheduled
                        // time, not from when this run finished.
                        let base = campaign.scheduled_at.unwrap_or(now);
                        if let Some(next) = next_occurrence(base, recurrence) {
                            let store = self.store.lock().await;
                            store.insert_campaign(&campaign.next_occurrence_row(next, now))?;
                            tracing::info!(
                                "campaign {}: next occurrence scheduled at {next}",
                                campaign.id
                            );
                        } else {
                            tracing::info!("campaign {}: recurrence ended", campaign.id);
                        }
                    }
                }
                Ok(None) => {} // claimed elsewhere
                Err(e) => {
                    tracing::error!("campaign {}: dispatch failed: {e}", campaign.id);
                }
            }
        }

        if let Err(e) = self.series.advance_due(now).await {
            tracing::error!("series sweep failed: {e}");
        }
        Ok(())
    }

    /// Tick forever. Runs until the surrounding task is dropped.
    pub async fn run(&self) {
        tracing::info!(
            "scheduler started, ticking every {}s",
            self.tick_interval.as_secs()
        );
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!("tick failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blastline_core::traits::ChannelSender;
    use blastline_core::types::{
        AudienceSelector, ChannelKind, MessageContent, OutboundMessage, SendReceipt,
    };
    use blastline_dispatch::SenderMap;
    use blastline_store::{
        Campaign, CampaignStatus, Recurrence, RecurrencePattern, Store,
    };
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn set(&self, t: DateTime<Utc>) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    struct OkSender;

    #[async_trait]
    impl ChannelSender for OkSender {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Email
        }

        async fn send(&self, _message: &OutboundMessage) -> Result<SendReceipt> {
            Ok(SendReceipt::default())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn build(store: Store) -> (TickEngine, SharedStore, Arc<ManualClock>) {
        let shared: SharedStore = Arc::new(tokio::sync::Mutex::new(store));
        let mut senders: HashMap<ChannelKind, Arc<dyn ChannelSender>> = HashMap::new();
        senders.insert(ChannelKind::Email, Arc::new(OkSender));
        let senders: SenderMap = Arc::new(senders);
        let clock = Arc::new(ManualClock(Mutex::new(t0())));
        let dispatcher = Dispatcher::new(
            shared.clone(),
            senders.clone(),
            4,
            Duration::from_secs(5),
        );
        let series = SeriesEngine::new(shared.clone(), senders, Duration::from_secs(5));
        let engine = TickEngine::new(
            shared.clone(),
            dispatcher,
            series,
            clock.clone(),
            Duration::from_secs(15),
        );
        (engine, shared, clock)
    }

    fn daily_campaign(store: &Store, scheduled_at: DateTime<Utc>) -> Campaign {
        let content = MessageContent {
            subject: Some("daily".into()),
            body: "hello".into(),
            media_urls: Vec::new(),
            assistant_id: None,
        };
        let mut campaign = Campaign::new(
            ChannelKind::Email,
            AudienceSelector::Leads,
            content,
            scheduled_at,
        );
        campaign.scheduled_at = Some(scheduled_at);
        campaign.recurrence = Some(Recurrence {
            pattern: RecurrencePattern::Daily,
            interval: 1,
            end_date: Some(scheduled_at + ChronoDuration::days(2)),
        });
        store.insert_campaign(&campaign).unwrap();
        campaign
    }

    #[tokio::test]
    async fn test_daily_recurrence_produces_a_row_per_day() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("a", Some("a@x.co"), None, true).unwrap();
        daily_campaign(&store, t0());
        let (engine, shared, clock) = build(store);

        // Three simulated days. end_date is t0 + 2 days, so the runs at
        // t0, t0+1d and t0+2d all fire and no fourth row is armed.
        for day in 0..4 {
            clock.set(t0() + ChronoDuration::days(day));
            engine.tick().await.unwrap();
        }

        let store = shared.lock().await;
        let campaigns = store.list_campaigns().unwrap();
        let completed: Vec<_> = campaigns
            .iter()
            .filter(|c| c.status == CampaignStatus::Completed)
            .collect();
        assert_eq!(completed.len(), 3);
        assert!(campaigns.iter().all(|c| c.status != CampaignStatus::Pending));
    }

    #[tokio::test]
    async fn test_future_campaign_not_dispatched_early() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("a", Some("a@x.co"), None, true).unwrap();
        let campaign = daily_campaign(&store, t0() + ChronoDuration::days(1));
        let (engine, shared, _clock) = build(store);

        engine.tick().await.unwrap();

        let store = shared.lock().await;
        assert_eq!(
            store.campaign(&campaign.id).unwrap().status,
            CampaignStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_tick_survives_a_failing_campaign() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("a", Some("a@x.co"), None, true).unwrap();

        // First campaign has no resolvable audience and fails at
        // dispatch; second is fine.
        let bad_content = MessageContent {
            subject: Some("s".into()),
            body: "b".into(),
            media_urls: Vec::new(),
            assistant_id: None,
        };
        let bad = Campaign::new(
            ChannelKind::Email,
            AudienceSelector::Group("missing".into()),
            bad_content,
            t0(),
        );
        store.insert_campaign(&bad).unwrap();
        let good = daily_campaign(&store, t0());
        let (engine, shared, _clock) = build(store);

        engine.tick().await.unwrap();

        let store = shared.lock().await;
        assert_eq!(
            store.campaign(&bad.id).unwrap().status,
            CampaignStatus::Failed
        );
        assert_eq!(
            store.campaign(&good.id).unwrap().status,
            CampaignStatus::Completed
        );
    }
}
