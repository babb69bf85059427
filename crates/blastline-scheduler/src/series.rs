//! Drip series engine.
//!
//! Each enrollment carries its own cursor and due time, so two people
//! enrolled a week apart move through the same series on their own
//! timelines. The cursor only moves forward: a failed step send is
//! counted against the step and the enrollment still advances, so one
//! bad delivery never wedges a person mid-series.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use blastline_core::error::{BlastlineError, Result};
use blastline_core::types::{ChannelKind, MessageContent, OutboundMessage, RecipientKind};
use blastline_dispatch::audience::{channel_address, normalize_email, normalize_phone};
use blastline_dispatch::{SenderMap, SharedStore};
use blastline_store::{Enrollment, EnrollmentStatus, MemberRef, SeriesStep};

/// What to enroll: a stored contact, a whole group, or a raw address.
#[derive(Debug, Clone)]
pub enum EnrollTarget {
    Lead(String),
    Client(String),
    Group(String),
    Address(String),
}

/// Outcome of one `enroll` call. Group targets fan out, so several
/// enrollments (and several skips) can come from one call.
#[derive(Debug, Default, Clone)]
pub struct EnrollOutcome {
    pub enrolled: u32,
    /// Already active in this series, or no usable address for the
    /// series channel.
    pub skipped: u32,
}

/// Outcome of one `advance_due` sweep.
#[derive(Debug, Default, Clone)]
pub struct SweepOutcome {
    pub sent: u32,
    pub failed: u32,
    pub completed: u32,
}

struct DueStep {
    enrollment: Enrollment,
    channel: ChannelKind,
    step: Option<SeriesStep>,
    next_due_in: Option<chrono::Duration>,
}

pub struct SeriesEngine {
    store: SharedStore,
    senders: SenderMap,
    send_timeout: StdDuration,
}

impl SeriesEngine {
    pub fn new(store: SharedStore, senders: SenderMap, send_timeout: StdDuration) -> Self {
        Self {
            store,
            senders,
            send_timeout,
        }
    }

    /// Enroll a target into a series. Idempotent per address: an
    /// address already actively enrolled is skipped, so re-enrolling a
    /// group after adding one member only picks up the new member.
    pub async fn enroll(
        &self,
        series_id: &str,
        target: EnrollTarget,
        now: DateTime<Utc>,
    ) -> Result<EnrollOutcome> {
        let store = self.store.lock().await;
        let series = store.series(series_id)?;
        let steps = store.series_steps(series_id)?;
        let first_step = steps.first().ok_or_else(|| {
            BlastlineError::Validation(format!("series {series_id} has no steps"))
        })?;

        let candidates: Vec<(String, RecipientKind, Option<String>)> = match target {
            EnrollTarget::Lead(id) => {
                let lead = store.lead(&id)?;
                channel_address(series.channel, lead.email.as_deref(), lead.phone.as_deref())
                    .map(|a| (a, RecipientKind::Lead, Some(lead.id)))
                    .into_iter()
                    .collect()
            }
            EnrollTarget::Client(id) => {
                let client = store.client(&id)?;
                channel_address(
                    series.channel,
                    client.email.as_deref(),
                    client.phone.as_deref(),
                )
                .map(|a| (a, RecipientKind::Client, Some(client.id)))
                .into_iter()
                .collect()
            }
            EnrollTarget::Group(id) => {
                let _ = store.group(&id)?;
                let mut out = Vec::new();
                for member in store.group_members(&id)? {
                    match member.member {
                        MemberRef::Lead(lead_id) => {
                            if let Ok(lead) = store.lead(&lead_id) {
                                if let Some(address) = channel_address(
                                    series.channel,
                                    lead.email.as_deref(),
                                    lead.phone.as_deref(),
                                ) {
                                    out.push((address, RecipientKind::Lead, Some(lead.id)));
                                    continue;
                                }
                            }
                            out.push((String::new(), RecipientKind::Lead, None));
                        }
                        MemberRef::Client(client_id) => {
                            if let Ok(client) = store.client(&client_id) {
                                if let Some(address) = channel_address(
                                    series.channel,
                                    client.email.as_deref(),
                                    client.phone.as_deref(),
                                ) {
                                    out.push((address, RecipientKind::Client, Some(client.id)));
                                    continue;
                                }
                            }
                            out.push((String::new(), RecipientKind::Client, None));
                        }
                        MemberRef::Address(raw) => {
                            match free_form_address(series.channel, &raw) {
                                Some(address) => {
                                    out.push((address, RecipientKind::FreeForm, None))
                                }
                                None => out.push((String::new(), RecipientKind::FreeForm, None)),
                            }
                        }
                    }
                }
                out
            }
            EnrollTarget::Address(raw) => free_form_address(series.channel, &raw)
                .map(|a| (a, RecipientKind::FreeForm, None))
                .into_iter()
                .collect(),
        };

        let mut outcome = EnrollOutcome::default();
        for (address, kind, source_id) in candidates {
            if address.is_empty() || store.active_enrollment_exists(series_id, &address)? {
                outcome.skipped += 1;
                continue;
            }
            let enrollment = Enrollment {
                id: uuid::Uuid::new_v4().to_string(),
                series_id: series_id.to_string(),
                address,
                kind,
                source_id,
                status: EnrollmentStatus::Active,
                current_step: 0,
                next_step_due_at: Some(now + first_step.delay()),
                last_step_sent_at: None,
                enrolled_at: now,
            };
            store.insert_enrollment(&enrollment)?;
            outcome.enrolled += 1;
        }
        tracing::info!(
            "series {series_id}: enrolled {}, skipped {}",
            outcome.enrolled,
            outcome.skipped
        );
        Ok(outcome)
    }

    /// Send every due step, advance cursors, close out finished
    /// enrollments. Called from the scheduler tick.
    pub async fn advance_due(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        // Snapshot the work under the lock, send without it.
        let due: Vec<DueStep> = {
            let store = self.store.lock().await;
            let mut due = Vec::new();
            for enrollment in store.due_enrollments(now)? {
                let series = store.series(&enrollment.series_id)?;
                let steps = store.series_steps(&enrollment.series_id)?;
                let step = steps.get(enrollment.current_step as usize).cloned();
                let next_due_in = steps
                    .get(enrollment.current_step as usize + 1)
                    .map(|s| s.delay());
                due.push(DueStep {
                    enrollment,
                    channel: series.channel,
                    step,
                    next_due_in,
                });
            }
            due
        };

        let mut outcome = SweepOutcome::default();
        for item in due {
            let Some(step) = item.step else {
                // Cursor past the last step, a leftover from a step
                // list edit. Nothing to send.
                let store = self.store.lock().await;
                store.complete_enrollment(&item.enrollment.id)?;
                outcome.completed += 1;
                continue;
            };

            let sent = self.send_step(item.channel, &item.enrollment, &step).await;
            if sent {
                outcome.sent += 1;
            } else {
                outcome.failed += 1;
            }

            let store = self.store.lock().await;
            store.bump_step_counter(&step.id, sent)?;
            let next_step = item.enrollment.current_step + 1;
            match item.next_due_in {
                Some(delay) => {
                    store.advance_enrollment(
                        &item.enrollment.id,
                        next_step,
                        Some(now + delay),
                        now,
                    )?;
                }
                None => {
                    store.advance_enrollment(&item.enrollment.id, next_step, None, now)?;
                    store.complete_enrollment(&item.enrollment.id)?;
                    outcome.completed += 1;
                }
            }
        }
        if outcome.sent + outcome.failed > 0 {
            tracing::info!(
                "series sweep: {} sent, {} failed, {} completed",
                outcome.sent,
                outcome.failed,
                outcome.completed
            );
        }
        Ok(outcome)
    }

    pub async fn unsubscribe(&self, enrollment_id: &str) -> Result<()> {
        let store = self.store.lock().await;
        store.enrollment(enrollment_id)?;
        store.unsubscribe_enrollment(enrollment_id)
    }

    async fn send_step(
        &self,
        channel: ChannelKind,
        enrollment: &Enrollment,
        step: &SeriesStep,
    ) -> bool {
        let Some(sender) = self.senders.get(&channel) else {
            tracing::warn!("no sender configured for channel {channel}, step counted failed");
            return false;
        };
        let content = MessageContent {
            subject: step.subject.clone(),
            body: step.body.clone(),
            media_urls: Vec::new(),
            assistant_id: None,
        };
        let message = OutboundMessage::new(&enrollment.address, &content);
        match tokio::time::timeout(self.send_timeout, sender.send(&message)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::warn!("series step to {} failed: {e}", enrollment.address);
                false
            }
            Err(_) => {
                tracing::warn!("series step to {} timed out", enrollment.address);
                false
            }
        }
    }
}

/// Normalize a free-form address for the series channel. Telegram
/// addresses are chat ids and pass through as typed.
fn free_form_address(channel: ChannelKind, raw: &str) -> Option<String> {
    match channel {
        ChannelKind::Email => {
            let address = normalize_email(raw);
            (!address.is_empty()).then_some(address)
        }
        ChannelKind::Sms | ChannelKind::WhatsApp | ChannelKind::Voice => normalize_phone(raw),
        ChannelKind::Telegram => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blastline_core::traits::ChannelSender;
    use blastline_core::types::SendReceipt;
    use blastline_store::{SeriesStepDraft, Store};
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockSender {
        kind: ChannelKind,
        fail: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChannelSender for MockSender {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, _message: &OutboundMessage) -> Result<SendReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(BlastlineError::Channel("provider down".into()))
            } else {
                Ok(SendReceipt::default())
            }
        }
    }

    fn engine(store: Store, fail: bool) -> (SeriesEngine, SharedStore, Arc<MockSender>) {
        let shared: SharedStore = Arc::new(tokio::sync::Mutex::new(store));
        let mock = Arc::new(MockSender {
            kind: ChannelKind::Email,
            fail,
            calls: AtomicU32::new(0),
        });
        let mut senders: HashMap<ChannelKind, Arc<dyn ChannelSender>> = HashMap::new();
        senders.insert(ChannelKind::Email, mock.clone());
        let engine = SeriesEngine::new(
            shared.clone(),
            Arc::new(senders),
            StdDuration::from_secs(5),
        );
        (engine, shared, mock)
    }

    fn three_step_series(store: &mut Store) -> String {
        // Delays 0, 2 and 5 days between consecutive steps.
        let steps = vec![
            SeriesStepDraft {
                delay_days: 0,
                delay_hours: 0,
                subject: Some("welcome".into()),
                body: "step one".into(),
            },
            SeriesStepDraft {
                delay_days: 2,
                delay_hours: 0,
                subject: Some("tips".into()),
                body: "step two".into(),
            },
            SeriesStepDraft {
                delay_days: 5,
                delay_hours: 0,
                subject: Some("offer".into()),
                body: "step three".into(),
            },
        ];
        store
            .create_series("onboarding", ChannelKind::Email, &steps, Utc::now())
            .unwrap()
            .id
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_enrollment_walks_steps_on_its_own_timeline() {
        let mut store = Store::open_in_memory().unwrap();
        let series_id = three_step_series(&mut store);
        let (engine, shared, mock) = engine(store, false);

        let outcome = engine
            .enroll(&series_id, EnrollTarget::Address("a@x.co".into()), t0())
            .await
            .unwrap();
        assert_eq!(outcome.enrolled, 1);

        // Step 0 has zero delay, due immediately.
        engine.advance_due(t0()).await.unwrap();
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
        {
            let store = shared.lock().await;
            let e = &store.series_enrollments(&series_id).unwrap()[0];
            assert_eq!(e.current_step, 1);
            assert_eq!(e.next_step_due_at, Some(t0() + Duration::days(2)));
        }

        // A day early: nothing due.
        engine.advance_due(t0() + Duration::days(1)).await.unwrap();
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);

        engine.advance_due(t0() + Duration::days(2)).await.unwrap();
        assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
        {
            let store = shared.lock().await;
            let e = &store.series_enrollments(&series_id).unwrap()[0];
            assert_eq!(e.current_step, 2);
            assert_eq!(e.next_step_due_at, Some(t0() + Duration::days(7)));
        }

        let sweep = engine.advance_due(t0() + Duration::days(7)).await.unwrap();
        assert_eq!(mock.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sweep.completed, 1);
        {
            let store = shared.lock().await;
            let e = &store.series_enrollments(&series_id).unwrap()[0];
            assert_eq!(e.status, EnrollmentStatus::Completed);
            assert!(e.next_step_due_at.is_none());
        }
    }

    #[tokio::test]
    async fn test_enroll_is_idempotent_per_address() {
        let mut store = Store::open_in_memory().unwrap();
        let series_id = three_step_series(&mut store);
        let (engine, shared, _mock) = engine(store, false);

        let target = EnrollTarget::Address("a@x.co".into());
        assert_eq!(
            engine.enroll(&series_id, target.clone(), t0()).await.unwrap().enrolled,
            1
        );
        let second = engine.enroll(&series_id, target, t0()).await.unwrap();
        assert_eq!(second.enrolled, 0);
        assert_eq!(second.skipped, 1);

        let store = shared.lock().await;
        assert_eq!(store.series_enrollments(&series_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_still_advances_cursor() {
        let mut store = Store::open_in_memory().unwrap();
        let series_id = three_step_series(&mut store);
        let (engine, shared, _mock) = engine(store, true);

        engine
            .enroll(&series_id, EnrollTarget::Address("a@x.co".into()), t0())
            .await
            .unwrap();
        let sweep = engine.advance_due(t0()).await.unwrap();
        assert_eq!(sweep.failed, 1);

        let store = shared.lock().await;
        let e = &store.series_enrollments(&series_id).unwrap()[0];
        assert_eq!(e.current_step, 1);
        assert_eq!(e.status, EnrollmentStatus::Active);
        let steps = store.series_steps(&series_id).unwrap();
        assert_eq!(steps[0].failed_count, 1);
        assert_eq!(steps[0].sent_count, 0);
    }

    #[tokio::test]
    async fn test_group_enroll_fans_out_and_skips_addressless() {
        let mut store = Store::open_in_memory().unwrap();
        let series_id = three_step_series(&mut store);
        let lead = store.add_lead("a", Some("a@x.co"), None, true).unwrap();
        let phone_only = store.add_lead("b", None, Some("+15550001111"), true).unwrap();
        let group = store.create_group("both").unwrap();
        store
            .add_group_member(&group.id, MemberRef::Lead(lead.id))
            .unwrap();
        store
            .add_group_member(&group.id, MemberRef::Lead(phone_only.id))
            .unwrap();
        let (engine, _shared, _mock) = engine(store, false);

        let outcome = engine
            .enroll(&series_id, EnrollTarget::Group(group.id), t0())
            .await
            .unwrap();
        assert_eq!(outcome.enrolled, 1);
        assert_eq!(outcome.skipped, 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_enrollment_never_comes_due() {
        let mut store = Store::open_in_memory().unwrap();
        let series_id = three_step_series(&mut store);
        let (engine, shared, mock) = engine(store, false);

        engine
            .enroll(&series_id, EnrollTarget::Address("a@x.co".into()), t0())
            .await
            .unwrap();
        let id = {
            let store = shared.lock().await;
            store.series_enrollments(&series_id).unwrap()[0].id.clone()
        };
        engine.unsubscribe(&id).await.unwrap();

        engine.advance_due(t0() + Duration::days(30)).await.unwrap();
        assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
    }
}
