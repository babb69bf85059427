//! Campaign dispatcher.
//!
//! One run owns a campaign end to end: claim it, freeze the audience
//! into recipient snapshots, fan sends out with bounded parallelism,
//! and finalize counts from what the snapshots actually recorded.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;

use blastline_core::error::{BlastlineError, Result};
use blastline_core::traits::ChannelSender;
use blastline_core::types::{ChannelKind, MessageContent, OutboundMessage};
use blastline_store::{RecipientSnapshot, Store};

use crate::audience::AudienceResolver;
use crate::compose::validate_fields;

pub type SharedStore = Arc<tokio::sync::Mutex<Store>>;
pub type SenderMap = Arc<HashMap<ChannelKind, Arc<dyn ChannelSender>>>;

/// Outcome of one completed dispatch run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub campaign_id: String,
    pub total: u32,
    pub sent: u32,
    pub failed: u32,
}

pub struct Dispatcher {
    store: SharedStore,
    senders: SenderMap,
    max_parallel: usize,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: SharedStore,
        senders: SenderMap,
        max_parallel: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            senders,
            max_parallel: max_parallel.max(1),
            send_timeout,
        }
    }

    /// Dispatch one campaign. Returns `Ok(None)` when the claim is
    /// lost, meaning another worker already owns this campaign; that is
    /// the normal outcome for all but one of any concurrent callers.
    pub async fn run(
        &self,
        campaign_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RunSummary>> {
        let (campaign, snapshots, sender) = {
            let mut store = self.store.lock().await;

            if !store.claim_campaign(campaign_id)? {
                tracing::debug!("campaign {campaign_id}: claim lost, skipping");
                return Ok(None);
            }
            let campaign = store.campaign(campaign_id)?;

            // Stored rows normally passed compose, but re-check so a
            // hand-edited or migrated row cannot reach a provider.
            if let Err(e) =
                validate_fields(campaign.channel, &campaign.audience, &campaign.content)
            {
                store.fail_campaign(campaign_id)?;
                return Err(e);
            }

            let Some(sender) = self.senders.get(&campaign.channel).cloned() else {
                store.fail_campaign(campaign_id)?;
                return Err(BlastlineError::Channel(format!(
                    "no sender configured for channel {}",
                    campaign.channel
                )));
            };

            let resolution = match AudienceResolver::new(&store)
                .resolve(campaign.channel, &campaign.audience)
            {
                Ok(r) => r,
                Err(e) => {
                    store.fail_campaign(campaign_id)?;
                    return Err(e);
                }
            };
            if resolution.recipients.is_empty() {
                store.fail_campaign(campaign_id)?;
                return Err(BlastlineError::Validation(format!(
                    "campaign {campaign_id}: audience resolved to zero recipients"
                )));
            }

            let snapshots = store.materialize_snapshots(campaign_id, &resolution.recipients)?;
            (campaign, snapshots, sender)
        };

        tracing::info!(
            "campaign {campaign_id}: dispatching to {} recipient(s) on {}",
            snapshots.len(),
            campaign.channel
        );

        let unrecorded = AtomicU32::new(0);
        futures::stream::iter(snapshots)
            .for_each_concurrent(self.max_parallel, |snapshot| {
                let sender = sender.clone();
                let content = campaign.content.clone();
                let unrecorded = &unrecorded;
                async move {
                    if let Err(e) = self.send_one(&sender, &snapshot, &content, now).await {
                        tracing::error!("campaign {}: record outcome: {e}", snapshot.campaign_id);
                        unrecorded.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
            .await;

        let store = self.store.lock().await;
        let (total, sent, failed) = store.snapshot_counts(campaign_id)?;
        let lost = unrecorded.load(Ordering::Relaxed);
        if lost > 0 || sent + failed != total {
            // Counts no longer reflect what actually went out. Keep the
            // claim in `sending` instead of finalizing.
            return Err(BlastlineError::Store(format!(
                "campaign {campaign_id}: {lost} send outcome(s) unrecorded \
                 ({sent} sent + {failed} failed of {total}), left in sending"
            )));
        }
        store.finalize_campaign(campaign_id, sent, failed, now)?;
        tracing::info!("campaign {campaign_id}: completed, {sent} sent, {failed} failed");

        Ok(Some(RunSummary {
            campaign_id: campaign_id.to_string(),
            total,
            sent,
            failed,
        }))
    }

    /// One send attempt. Send failures are absorbed into the snapshot row so
    /// one bad address never aborts the rest of the run; a failure to record
    /// the outcome is returned so the caller can refuse to finalize.
    async fn send_one(
        &self,
        sender: &Arc<dyn ChannelSender>,
        snapshot: &RecipientSnapshot,
        content: &MessageContent,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let message = OutboundMessage::new(&snapshot.address, content);
        let outcome =
            match tokio::time::timeout(self.send_timeout, sender.send(&message)).await {
                Ok(result) => result,
                Err(_) => Err(BlastlineError::Channel(format!(
                    "send timed out after {}s",
                    self.send_timeout.as_secs()
                ))),
            };

        let store = self.store.lock().await;
        match outcome {
            Ok(receipt) => {
                store.mark_snapshot_sent(&snapshot.id, now, receipt.provider_ref.as_deref())
            }
            Err(e) => {
                tracing::warn!("send to {} failed: {e}", snapshot.address);
                store.mark_snapshot_failed(&snapshot.id, &e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blastline_core::types::{AudienceSelector, MessageContent, SendReceipt};
    use blastline_store::{Campaign, CampaignStatus, RecipientStatus};

    struct MockSender {
        kind: ChannelKind,
        failing: Vec<String>,
    }

    #[async_trait]
    impl ChannelSender for MockSender {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt> {
            if self.failing.contains(&message.address) {
                Err(BlastlineError::Channel("provider rejected".into()))
            } else {
                Ok(SendReceipt::with_ref("ref-1"))
            }
        }
    }

    fn dispatcher_with(
        store: Store,
        kind: ChannelKind,
        failing: Vec<String>,
    ) -> (Dispatcher, SharedStore) {
        let shared: SharedStore = Arc::new(tokio::sync::Mutex::new(store));
        let mut senders: HashMap<ChannelKind, Arc<dyn ChannelSender>> = HashMap::new();
        senders.insert(kind, Arc::new(MockSender { kind, failing }));
        let dispatcher = Dispatcher::new(
            shared.clone(),
            Arc::new(senders),
            4,
            Duration::from_secs(5),
        );
        (dispatcher, shared)
    }

    fn email_campaign(store: &Store) -> Campaign {
        let content = MessageContent {
            subject: Some("hi".into()),
            body: "hello".into(),
            media_urls: Vec::new(),
            assistant_id: None,
        };
        let campaign = Campaign::new(
            ChannelKind::Email,
            AudienceSelector::Leads,
            content,
            Utc::now(),
        );
        store.insert_campaign(&campaign).unwrap();
        campaign
    }

    #[tokio::test]
    async fn test_partial_failure_still_completes() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..10 {
            store
                .add_lead(&format!("lead{i}"), Some(&format!("l{i}@x.co")), None, true)
                .unwrap();
        }
        let campaign = email_campaign(&store);
        let failing = vec!["l1@x.co".into(), "l4@x.co".into(), "l7@x.co".into()];
        let (dispatcher, shared) = dispatcher_with(store, ChannelKind::Email, failing);

        let summary = dispatcher
            .run(&campaign.id, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.total, 10);
        assert_eq!(summary.sent, 7);
        assert_eq!(summary.failed, 3);

        let store = shared.lock().await;
        let stored = store.campaign(&campaign.id).unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert_eq!(stored.success_count, 7);
        assert_eq!(stored.failed_count, 3);
        let failed: Vec<_> = store
            .campaign_recipients(&campaign.id)
            .unwrap()
            .into_iter()
            .filter(|s| s.status == RecipientStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 3);
        assert!(failed.iter().all(|s| s.error_message.is_some()));
    }

    #[tokio::test]
    async fn test_second_run_loses_claim() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("a", Some("a@x.co"), None, true).unwrap();
        let campaign = email_campaign(&store);
        let (dispatcher, _shared) = dispatcher_with(store, ChannelKind::Email, Vec::new());

        assert!(dispatcher.run(&campaign.id, Utc::now()).await.unwrap().is_some());
        assert!(dispatcher.run(&campaign.id, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_audience_fails_campaign_without_snapshots() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("no-email", None, None, true).unwrap();
        let campaign = email_campaign(&store);
        let (dispatcher, shared) = dispatcher_with(store, ChannelKind::Email, Vec::new());

        let err = dispatcher.run(&campaign.id, Utc::now()).await.unwrap_err();
        assert!(err.is_validation());

        let store = shared.lock().await;
        assert_eq!(
            store.campaign(&campaign.id).unwrap().status,
            CampaignStatus::Failed
        );
        assert!(store.campaign_recipients(&campaign.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_sender_fails_campaign() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("a", Some("a@x.co"), None, true).unwrap();
        let campaign = email_campaign(&store);
        // Only an SMS sender is registered.
        let (dispatcher, shared) = dispatcher_with(store, ChannelKind::Sms, Vec::new());

        assert!(dispatcher.run(&campaign.id, Utc::now()).await.is_err());
        let store = shared.lock().await;
        assert_eq!(
            store.campaign(&campaign.id).unwrap().status,
            CampaignStatus::Failed
        );
    }

    /// Breaks the snapshot table from a second connection once its trigger
    /// address comes through, so every later outcome write fails.
    struct TableDropSender {
        db_path: std::path::PathBuf,
        trigger: String,
    }

    #[async_trait]
    impl ChannelSender for TableDropSender {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Email
        }

        async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt> {
            if message.address == self.trigger {
                let conn = rusqlite::Connection::open(&self.db_path).unwrap();
                conn.busy_timeout(Duration::from_secs(5)).unwrap();
                conn.execute_batch("DROP TABLE campaign_recipients").unwrap();
            }
            Ok(SendReceipt::with_ref("ref-1"))
        }
    }

    #[tokio::test]
    async fn test_unrecorded_outcome_leaves_campaign_sending() {
        let dir = std::env::temp_dir().join("blastline-dispatch-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join(format!("unrecorded-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&db_path);

        let store = Store::open(&db_path).unwrap();
        store.add_lead("a", Some("a@x.co"), None, true).unwrap();
        store.add_lead("b", Some("b@x.co"), None, true).unwrap();
        let campaign = email_campaign(&store);

        let shared: SharedStore = Arc::new(tokio::sync::Mutex::new(store));
        let mut senders: HashMap<ChannelKind, Arc<dyn ChannelSender>> = HashMap::new();
        senders.insert(
            ChannelKind::Email,
            Arc::new(TableDropSender {
                db_path: db_path.clone(),
                trigger: "a@x.co".into(),
            }),
        );
        let dispatcher = Dispatcher::new(
            shared.clone(),
            Arc::new(senders),
            1,
            Duration::from_secs(5),
        );

        let err = dispatcher.run(&campaign.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, BlastlineError::Store(_)));

        // Not finalized: the claim is kept so an operator can reconcile.
        let store = shared.lock().await;
        assert_eq!(
            store.campaign(&campaign.id).unwrap().status,
            CampaignStatus::Sending
        );
        drop(store);
        let _ = std::fs::remove_file(&db_path);
    }
}
