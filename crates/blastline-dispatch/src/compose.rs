//! Campaign composer — validation and creation.
//!
//! Everything channel-specific fails here, synchronously, before a
//! campaign row or snapshot exists: missing subject for email, missing
//! assistant for voice, malformed Telegram selectors, and an audience
//! that resolves to nobody.

use chrono::{DateTime, Utc};

use blastline_core::error::{BlastlineError, Result};
use blastline_core::types::{AudienceSelector, ChannelKind, MessageContent};
use blastline_store::{Campaign, Recurrence, Store};

use crate::audience::AudienceResolver;

/// Operator input for one campaign.
#[derive(Debug, Clone)]
pub struct CampaignDraft {
    pub channel: ChannelKind,
    pub audience: AudienceSelector,
    pub subject: Option<String>,
    pub body: String,
    pub media_urls: Vec<String>,
    pub assistant_id: Option<String>,
    /// None means "send now".
    pub scheduled_at: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
}

/// A created campaign plus the audience estimate shown to the operator.
/// The estimate comes from the same resolver dispatch uses, so preview
/// and actual recipient counts cannot drift apart.
#[derive(Debug)]
pub struct Composed {
    pub campaign: Campaign,
    pub estimated_recipients: u32,
    pub omitted: u32,
}

/// Channel-specific field validation, shared between compose and the
/// dispatcher's pre-send re-check.
pub fn validate_fields(
    channel: ChannelKind,
    audience: &AudienceSelector,
    content: &MessageContent,
) -> Result<()> {
    match channel {
        ChannelKind::Email => {
            if content.subject.as_deref().unwrap_or("").trim().is_empty() {
                return Err(BlastlineError::Validation(
                    "email campaigns require a subject".into(),
                ));
            }
            if content.body.trim().is_empty() {
                return Err(BlastlineError::Validation("message body is empty".into()));
            }
        }
        ChannelKind::Voice => {
            if content.assistant_id.as_deref().unwrap_or("").trim().is_empty() {
                return Err(BlastlineError::Validation(
                    "voice campaigns require an assistant id".into(),
                ));
            }
        }
        ChannelKind::Telegram => {
            if content.body.trim().is_empty() {
                return Err(BlastlineError::Validation("message body is empty".into()));
            }
            match audience {
                AudienceSelector::All => {}
                AudienceSelector::Individual(chat_id) => {
                    // Bot-addressable ids are numeric chat ids.
                    if chat_id.trim().parse::<i64>().is_err() {
                        return Err(BlastlineError::Validation(format!(
                            "'{chat_id}' does not look like a Telegram chat id"
                        )));
                    }
                }
                other => {
                    return Err(BlastlineError::Validation(format!(
                        "selector '{other}' is not valid for Telegram — bot subscriber \
                         identity is channel-specific; use 'all' or an individual chat id"
                    )));
                }
            }
        }
        ChannelKind::Sms | ChannelKind::WhatsApp => {
            if content.body.trim().is_empty() {
                return Err(BlastlineError::Validation("message body is empty".into()));
            }
        }
    }
    Ok(())
}

/// Validate a draft and persist it as a `pending` campaign. On any
/// validation failure — including an audience that resolves to zero
/// addressable recipients — nothing is written.
pub fn compose(store: &Store, draft: CampaignDraft, now: DateTime<Utc>) -> Result<Composed> {
    let content = MessageContent {
        subject: draft.subject,
        body: draft.body,
        media_urls: draft.media_urls,
        assistant_id: draft.assistant_id,
    };
    validate_fields(draft.channel, &draft.audience, &content)?;

    if let Some(recurrence) = &draft.recurrence {
        if recurrence.interval == 0 {
            return Err(BlastlineError::Validation(
                "recurrence interval must be at least 1".into(),
            ));
        }
    }

    let resolution = AudienceResolver::new(store).resolve(draft.channel, &draft.audience)?;
    if resolution.recipients.is_empty() {
        return Err(BlastlineError::Validation(format!(
            "audience '{}' resolves to zero addressable recipients on {}",
            draft.audience, draft.channel
        )));
    }

    let mut campaign = Campaign::new(draft.channel, draft.audience, content, now);
    campaign.scheduled_at = draft.scheduled_at;
    campaign.recurrence = draft.recurrence;
    store.insert_campaign(&campaign)?;

    tracing::info!(
        "campaign {} composed: {} to {} (~{} recipient(s), {} omitted)",
        campaign.id,
        campaign.channel,
        campaign.audience,
        resolution.recipients.len(),
        resolution.omitted
    );
    Ok(Composed {
        campaign,
        estimated_recipients: resolution.recipients.len() as u32,
        omitted: resolution.omitted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(channel: ChannelKind, audience: AudienceSelector) -> CampaignDraft {
        CampaignDraft {
            channel,
            audience,
            subject: Some("subject".into()),
            body: "body".into(),
            media_urls: Vec::new(),
            assistant_id: Some("asst-1".into()),
            scheduled_at: None,
            recurrence: None,
        }
    }

    #[test]
    fn test_email_requires_subject() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("a", Some("a@x.co"), None, true).unwrap();
        let mut d = draft(ChannelKind::Email, AudienceSelector::Leads);
        d.subject = None;
        let err = compose(&store, d, Utc::now()).unwrap_err();
        assert!(err.is_validation());
        assert!(store.list_campaigns().unwrap().is_empty());
    }

    #[test]
    fn test_voice_requires_assistant() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("a", None, Some("+15550001111"), true).unwrap();
        let mut d = draft(ChannelKind::Voice, AudienceSelector::Leads);
        d.assistant_id = None;
        assert!(compose(&store, d, Utc::now()).unwrap_err().is_validation());
    }

    #[test]
    fn test_telegram_rejects_lead_selectors() {
        let store = Store::open_in_memory().unwrap();
        let err = compose(
            &store,
            draft(ChannelKind::Telegram, AudienceSelector::Leads),
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.is_validation());

        let err = compose(
            &store,
            draft(
                ChannelKind::Telegram,
                AudienceSelector::Individual("not-a-chat-id".into()),
            ),
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_empty_group_blocks_compose_with_zero_rows() {
        let store = Store::open_in_memory().unwrap();
        let group = store.create_group("empty").unwrap();
        let err = compose(
            &store,
            draft(ChannelKind::Email, AudienceSelector::Group(group.id)),
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.is_validation());
        assert!(store.list_campaigns().unwrap().is_empty());
    }

    #[test]
    fn test_compose_reports_estimate_from_dispatch_resolver() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("a", Some("a@x.co"), None, true).unwrap();
        store.add_lead("b", Some("b@x.co"), None, true).unwrap();
        store.add_lead("no-email", None, None, true).unwrap();

        let composed = compose(
            &store,
            draft(ChannelKind::Email, AudienceSelector::Leads),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(composed.estimated_recipients, 2);
        assert_eq!(composed.omitted, 1);
        assert_eq!(store.list_campaigns().unwrap().len(), 1);
    }

    #[test]
    fn test_zero_interval_recurrence_rejected() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("a", Some("a@x.co"), None, true).unwrap();
        let mut d = draft(ChannelKind::Email, AudienceSelector::Leads);
        d.recurrence = Some(Recurrence {
            pattern: blastline_store::RecurrencePattern::Daily,
            interval: 0,
            end_date: None,
        });
        assert!(compose(&store, d, Utc::now()).unwrap_err().is_validation());
    }
}
