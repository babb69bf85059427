//! Audience resolver — one logical selector, one concrete recipient
//! list. The same resolver backs both the compose-time audience
//! estimate and the dispatch-time snapshot, so the preview the operator
//! sees is the list that actually sends.

use std::collections::HashSet;

use blastline_core::error::{BlastlineError, Result};
use blastline_core::types::{AudienceSelector, ChannelKind, Recipient, RecipientKind};
use blastline_store::{MemberRef, Store};

/// A resolved audience: addressable recipients plus the count of
/// members dropped for lacking a usable address on this channel.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub recipients: Vec<Recipient>,
    pub omitted: u32,
}

/// Lowercased, trimmed email.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Best-effort E.164 normalization: strip formatting, keep digits,
/// fold a leading `00` into `+`. Returns None when nothing usable
/// remains.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    if let Some(rest) = digits.strip_prefix("00") {
        if rest.is_empty() {
            return None;
        }
        return Some(format!("+{rest}"));
    }
    Some(format!("+{digits}"))
}

/// Pick and normalize the address a lead/client/member is reachable at
/// on the given channel. Telegram never resolves from here: bot chat
/// ids are not part of the lead/client address space.
pub fn channel_address(
    channel: ChannelKind,
    email: Option<&str>,
    phone: Option<&str>,
) -> Option<String> {
    match channel {
        ChannelKind::Email => email
            .map(normalize_email)
            .filter(|a| !a.is_empty()),
        ChannelKind::Sms | ChannelKind::WhatsApp | ChannelKind::Voice => {
            phone.and_then(normalize_phone)
        }
        ChannelKind::Telegram => None,
    }
}

/// Resolves audience selectors against the store at send (or compose)
/// time.
pub struct AudienceResolver<'a> {
    store: &'a Store,
}

impl<'a> AudienceResolver<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn resolve(
        &self,
        channel: ChannelKind,
        selector: &AudienceSelector,
    ) -> Result<Resolution> {
        match selector {
            AudienceSelector::Individual(raw) => self.resolve_individual(channel, raw),
            AudienceSelector::All if channel == ChannelKind::Telegram => {
                self.resolve_bot_subscribers()
            }
            AudienceSelector::All => self.resolve_contacts(channel, true, true),
            AudienceSelector::Leads => self.resolve_contacts(channel, true, false),
            AudienceSelector::Clients => self.resolve_contacts(channel, false, true),
            AudienceSelector::Group(id) => self.resolve_group(channel, id),
        }
    }

    /// Explicit single-recipient send. No opt-in check applies here:
    /// an operator addressing one person directly is assumed to have
    /// consent out of band. Deliberate policy, not an oversight.
    fn resolve_individual(&self, channel: ChannelKind, raw: &str) -> Result<Resolution> {
        let address = match channel {
            ChannelKind::Email => {
                let a = normalize_email(raw);
                if a.is_empty() {
                    return Err(BlastlineError::Validation("empty email address".into()));
                }
                a
            }
            ChannelKind::Telegram => raw.trim().to_string(),
            _ => normalize_phone(raw).ok_or_else(|| {
                BlastlineError::Validation(format!("'{raw}' is not a usable phone number"))
            })?,
        };
        Ok(Resolution {
            recipients: vec![Recipient {
                address,
                kind: RecipientKind::FreeForm,
                source_id: None,
            }],
            omitted: 0,
        })
    }

    fn resolve_bot_subscribers(&self) -> Result<Resolution> {
        let recipients = self
            .store
            .bot_subscribers()?
            .into_iter()
            .map(|chat_id| Recipient {
                address: chat_id,
                kind: RecipientKind::FreeForm,
                source_id: None,
            })
            .collect();
        Ok(Resolution {
            recipients,
            omitted: 0,
        })
    }

    /// Opted-in leads and/or clients, deduplicated by normalized
    /// address.
    fn resolve_contacts(
        &self,
        channel: ChannelKind,
        include_leads: bool,
        include_clients: bool,
    ) -> Result<Resolution> {
        let mut seen = HashSet::new();
        let mut recipients = Vec::new();
        let mut omitted = 0u32;

        if include_leads {
            for lead in self.store.opted_in_leads()? {
                match channel_address(channel, lead.email.as_deref(), lead.phone.as_deref()) {
                    Some(address) if seen.insert(address.clone()) => recipients.push(Recipient {
                        address,
                        kind: RecipientKind::Lead,
                        source_id: Some(lead.id),
                    }),
                    Some(_) => {} // duplicate address, first source wins
                    None => omitted += 1,
                }
            }
        }
        if include_clients {
            for client in self.store.opted_in_clients()? {
                match channel_address(channel, client.email.as_deref(), client.phone.as_deref()) {
                    Some(address) if seen.insert(address.clone()) => recipients.push(Recipient {
                        address,
                        kind: RecipientKind::Client,
                        source_id: Some(client.id),
                    }),
                    Some(_) => {}
                    None => omitted += 1,
                }
            }
        }
        Ok(Resolution {
            recipients,
            omitted,
        })
    }

    /// Current members of a group, resolved to channel addresses. A
    /// member missing an address for this channel is a counted
    /// omission, never a hard failure.
    fn resolve_group(&self, channel: ChannelKind, group_id: &str) -> Result<Resolution> {
        self.store.group(group_id)?;
        let mut seen = HashSet::new();
        let mut recipients = Vec::new();
        let mut omitted = 0u32;

        for member in self.store.group_members(group_id)? {
            let resolved = match &member.member {
                MemberRef::Lead(id) => {
                    let lead = self.store.lead(id)?;
                    channel_address(channel, lead.email.as_deref(), lead.phone.as_deref())
                        .map(|address| (address, RecipientKind::Lead, Some(lead.id)))
                }
                MemberRef::Client(id) => {
                    let client = self.store.client(id)?;
                    channel_address(channel, client.email.as_deref(), client.phone.as_deref())
                        .map(|address| (address, RecipientKind::Client, Some(client.id)))
                }
                MemberRef::Address(raw) => {
                    channel_address(channel, Some(raw), Some(raw))
                        .map(|address| (address, RecipientKind::FreeForm, None))
                }
            };
            match resolved {
                Some((address, kind, source_id)) if seen.insert(address.clone()) => {
                    recipients.push(Recipient {
                        address,
                        kind,
                        source_id,
                    });
                }
                Some(_) => {}
                None => omitted += 1,
            }
        }
        Ok(Resolution {
            recipients,
            omitted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 000-1111"), Some("+15550001111".into()));
        assert_eq!(normalize_phone("0084 90 000 0001"), Some("+84900000001".into()));
        assert_eq!(normalize_phone("555.000.2222"), Some("+5550002222".into()));
        assert_eq!(normalize_phone("not a number"), None);
    }

    #[test]
    fn test_all_dedupes_across_leads_and_clients() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("Ann", Some("Ann@Example.com"), None, true).unwrap();
        store.add_client("Ann again", Some("ann@example.com"), None, true).unwrap();
        store.add_client("Bob", Some("bob@example.com"), None, true).unwrap();

        let resolution = AudienceResolver::new(&store)
            .resolve(ChannelKind::Email, &AudienceSelector::All)
            .unwrap();
        let addresses: Vec<&str> = resolution
            .recipients
            .iter()
            .map(|r| r.address.as_str())
            .collect();
        assert_eq!(addresses, vec!["ann@example.com", "bob@example.com"]);
    }

    #[test]
    fn test_opt_out_excluded_from_bulk_selectors() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("in", Some("in@x.co"), None, true).unwrap();
        store.add_lead("out", Some("out@x.co"), None, false).unwrap();

        let resolution = AudienceResolver::new(&store)
            .resolve(ChannelKind::Email, &AudienceSelector::Leads)
            .unwrap();
        assert_eq!(resolution.recipients.len(), 1);
        assert_eq!(resolution.recipients[0].address, "in@x.co");
    }

    #[test]
    fn test_individual_skips_opt_in_check() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("out", Some("out@x.co"), None, false).unwrap();

        let resolution = AudienceResolver::new(&store)
            .resolve(
                ChannelKind::Email,
                &AudienceSelector::Individual("Out@X.co".into()),
            )
            .unwrap();
        assert_eq!(resolution.recipients.len(), 1);
        assert_eq!(resolution.recipients[0].address, "out@x.co");
        assert_eq!(resolution.recipients[0].kind, RecipientKind::FreeForm);
    }

    #[test]
    fn test_group_member_without_phone_is_counted_omission() {
        let store = Store::open_in_memory().unwrap();
        let with_phone = store.add_lead("a", None, Some("+15550001111"), true).unwrap();
        let without = store.add_lead("b", Some("b@x.co"), None, true).unwrap();
        let group = store.create_group("g").unwrap();
        store.add_group_member(&group.id, MemberRef::Lead(with_phone.id)).unwrap();
        store.add_group_member(&group.id, MemberRef::Lead(without.id)).unwrap();

        let resolution = AudienceResolver::new(&store)
            .resolve(ChannelKind::Sms, &AudienceSelector::Group(group.id))
            .unwrap();
        assert_eq!(resolution.recipients.len(), 1);
        assert_eq!(resolution.omitted, 1);
    }

    #[test]
    fn test_group_opt_in_not_rechecked_for_explicit_membership() {
        // A member explicitly placed in a group resolves even when the
        // underlying lead is opted out of bulk sends.
        let store = Store::open_in_memory().unwrap();
        let lead = store.add_lead("out", Some("out@x.co"), None, false).unwrap();
        let group = store.create_group("g").unwrap();
        store.add_group_member(&group.id, MemberRef::Lead(lead.id)).unwrap();

        let resolution = AudienceResolver::new(&store)
            .resolve(ChannelKind::Email, &AudienceSelector::Group(group.id))
            .unwrap();
        assert_eq!(resolution.recipients.len(), 1);
    }

    #[test]
    fn test_telegram_all_resolves_bot_subscribers() {
        let store = Store::open_in_memory().unwrap();
        store.add_lead("lead", Some("l@x.co"), None, true).unwrap();
        store.add_bot_subscriber("8810001", Some("ann")).unwrap();
        store.add_bot_subscriber("8810002", None).unwrap();

        let resolution = AudienceResolver::new(&store)
            .resolve(ChannelKind::Telegram, &AudienceSelector::All)
            .unwrap();
        let addresses: Vec<&str> = resolution
            .recipients
            .iter()
            .map(|r| r.address.as_str())
            .collect();
        assert_eq!(addresses, vec!["8810001", "8810002"]);
    }

    #[test]
    fn test_unknown_group_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = AudienceResolver::new(&store)
            .resolve(ChannelKind::Email, &AudienceSelector::Group("nope".into()))
            .unwrap_err();
        assert!(matches!(err, BlastlineError::NotFound(_)));
    }
}
