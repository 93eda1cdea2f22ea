//! Cross-source deduplication: identity keys, match policy and merge rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::extract::contacts::fill_contact;
use crate::extract::organization::normalize_org_name;
use crate::types::lead::{ArmedStatus, Lead, Opportunity, OpportunityType, Organization, SourceRef};

/// Case-fold and collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized (organization, title, location) triple that identifies one
/// real-world opportunity across sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub organization: String,
    pub title: String,
    pub location: String,
}

impl IdentityKey {
    pub fn new(organization: &str, title: &str, location: Option<&str>) -> Self {
        Self {
            organization: normalize_org_name(organization),
            title: normalize_text(title),
            location: location.map(normalize_text).unwrap_or_default(),
        }
    }

    pub fn of(lead: &Lead) -> Self {
        Self::new(
            &lead.organization.name,
            &lead.opportunity.title,
            lead.opportunity.location.as_deref(),
        )
    }

    /// Stable hex digest, used as an indexed column by persistent stores.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.organization.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.title.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.location.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Secondary index key for similarity matching: organization and location.
    pub fn scope(&self) -> (String, String) {
        (self.organization.clone(), self.location.clone())
    }

    pub fn scope_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.organization.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.location.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// How an incoming candidate is matched against stored leads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Identity keys must be equal after normalization.
    #[default]
    Exact,

    /// Same organization and location, and title token sets with Jaccard
    /// similarity at or above `min_similarity`.
    TokenSimilarity { min_similarity: f64 },
}

impl MatchPolicy {
    /// Whether a stored key in the same scope matches the incoming key.
    pub fn matches(&self, stored: &IdentityKey, incoming: &IdentityKey) -> bool {
        match self {
            MatchPolicy::Exact => stored == incoming,
            MatchPolicy::TokenSimilarity { min_similarity } => {
                stored.organization == incoming.organization
                    && stored.location == incoming.location
                    && (stored.title == incoming.title
                        || jaccard(&stored.title, &incoming.title) + 1e-9 >= *min_similarity)
            }
        }
    }
}

/// Jaccard similarity of the whitespace token sets of two strings.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let shared = left.intersection(&right).count();
    let union = left.union(&right).count();
    shared as f64 / union as f64
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Take `incoming` when it wins and is non-empty, or when the slot is empty.
fn merge_opt<T>(slot: &mut Option<T>, incoming: Option<T>, wins: bool, blank: impl Fn(&Option<T>) -> bool) {
    if blank(&incoming) {
        return;
    }
    if wins || blank(slot) {
        *slot = incoming;
    }
}

fn merge_text(slot: &mut Option<String>, incoming: Option<String>, wins: bool) {
    merge_opt(slot, incoming, wins, is_blank);
}

fn merge_string(slot: &mut String, incoming: String, wins: bool) {
    if incoming.trim().is_empty() {
        return;
    }
    if wins || slot.trim().is_empty() {
        *slot = incoming;
    }
}

fn merge_organization(stored: &mut Organization, incoming: Organization, wins: bool) {
    merge_string(&mut stored.name, incoming.name, wins);
    merge_text(&mut stored.website, incoming.website, wins);
    merge_text(&mut stored.industry, incoming.industry, wins);
    merge_text(&mut stored.size, incoming.size, wins);
    merge_text(&mut stored.description, incoming.description, wins);
    stored.is_government |= incoming.is_government;
}

fn merge_opportunity(stored: &mut Opportunity, incoming: Opportunity, wins: bool) {
    merge_string(&mut stored.title, incoming.title, wins);
    merge_text(&mut stored.description, incoming.description, wins);
    merge_text(&mut stored.requirements, incoming.requirements, wins);
    merge_text(&mut stored.location, incoming.location, wins);
    merge_text(&mut stored.state, incoming.state, wins);
    merge_text(&mut stored.estimated_value, incoming.estimated_value, wins);
    merge_opt(&mut stored.guard_count, incoming.guard_count, wins, Option::is_none);

    if incoming.opportunity_type != OpportunityType::Unknown
        && (wins || stored.opportunity_type == OpportunityType::Unknown)
    {
        stored.opportunity_type = incoming.opportunity_type;
    }
    if incoming.is_armed != ArmedStatus::Unknown && (wins || stored.is_armed == ArmedStatus::Unknown) {
        stored.is_armed = incoming.is_armed;
    }

    // Dates move as a pair from a winning side so the range stays ordered
    if wins && incoming.start_date.is_some() {
        stored.start_date = incoming.start_date;
        stored.end_date = incoming.end_date.or(stored.end_date);
    } else {
        merge_opt(&mut stored.start_date, incoming.start_date, wins, Option::is_none);
        merge_opt(&mut stored.end_date, incoming.end_date, wins, Option::is_none);
    }
    if !stored.has_valid_dates() {
        stored.end_date = None;
    }
}

/// Merge a newly accepted lead into a stored one.
///
/// A strictly higher incoming confidence wins field-by-field with its
/// non-empty values; otherwise incoming values only fill gaps, so ties go to
/// the first-seen lead. Contacts are unioned, the first-seen attribution is
/// kept and the incoming one is appended. Returns whether incoming won.
pub fn merge(stored: &mut Lead, incoming: Lead, now: DateTime<Utc>) -> bool {
    let wins = incoming.confidence_score > stored.confidence_score;

    merge_organization(&mut stored.organization, incoming.organization, wins);
    merge_opportunity(&mut stored.opportunity, incoming.opportunity, wins);

    for contact in incoming.contacts {
        let Some(key) = contact.merge_key() else {
            continue;
        };
        match stored
            .contacts
            .iter_mut()
            .find(|c| c.merge_key().as_deref() == Some(key.as_str()))
        {
            Some(existing) => fill_contact(existing, contact),
            None => stored.contacts.push(contact),
        }
    }

    let attribution = SourceRef {
        source: incoming.source,
        url: incoming.source_url,
    };
    let is_first_seen = attribution.source == stored.source && attribution.url == stored.source_url;
    if !is_first_seen && !stored.additional_sources.contains(&attribution) {
        stored.additional_sources.push(attribution);
    }

    if wins {
        stored.confidence_score = incoming.confidence_score;
        stored.signals = incoming.signals;
    }
    stored.date_updated = now;

    wins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoreCard;
    use crate::types::candidate::CandidateLead;
    use crate::types::lead::{Contact, LeadType};
    use chrono::Duration;

    fn acme(source: &str, score_signals: ScoreCard) -> Lead {
        CandidateLead::new(source, format!("https://{source}.example/acme"), LeadType::JobPosting)
            .with_organization("Acme Corp")
            .with_title("Night Guard Needed")
            .with_location("Austin, TX")
            .into_lead(&score_signals, Utc::now())
    }

    /// 0.4: organization + valid contact
    fn low(source: &str) -> Lead {
        use crate::scoring::Signal::*;
        let mut lead = acme(source, ScoreCard::from_signals([OrganizationName, ValidContact]));
        lead.organization.industry = Some("Security Services".to_string());
        lead.opportunity.description = Some("Overnight patrol of a warehouse".to_string());
        lead.contacts.push(Contact::with_email("hiring@acme.com"));
        lead
    }

    /// 0.8: organization + contact + location + type
    fn high(source: &str) -> Lead {
        use crate::scoring::Signal::*;
        let mut lead = acme(
            source,
            ScoreCard::from_signals([OrganizationName, ValidContact, Location, TypeClassified]),
        );
        lead.organization.website = Some("https://acme.example".to_string());
        lead.opportunity.description = Some("Night guard for a construction site".to_string());
        lead.opportunity.opportunity_type = OpportunityType::Construction;
        lead.contacts.push(Contact::with_email("Hiring@Acme.com"));
        lead.contacts.push(Contact::with_phone("+15125550100"));
        lead
    }

    #[test]
    fn test_identity_key_normalization() {
        let a = IdentityKey::new("Acme Corp", "Night  Guard Needed", Some("Austin, TX"));
        let b = IdentityKey::new("ACME CORP.", "night guard needed", Some(" austin,  tx "));
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), IdentityKey::new("Acme Corp", "Night Guard", None).digest());
    }

    #[test]
    fn test_merge_precedence_low_then_high() {
        let now = Utc::now() + Duration::seconds(5);
        let mut stored = low("bidnetdirect");
        let won = merge(&mut stored, high("instantmarkets"), now);

        assert!(won);
        assert_eq!(stored.confidence_score, 0.8);
        assert_eq!(
            stored.opportunity.description.as_deref(),
            Some("Night guard for a construction site")
        );
        assert_eq!(stored.opportunity.opportunity_type, OpportunityType::Construction);
        assert_eq!(stored.organization.website.as_deref(), Some("https://acme.example"));
        // empty incoming field never clears a populated one
        assert_eq!(stored.organization.industry.as_deref(), Some("Security Services"));
        assert_eq!(stored.source, "bidnetdirect");
        assert_eq!(stored.additional_sources.len(), 1);
        assert_eq!(stored.additional_sources[0].source, "instantmarkets");
        assert_eq!(stored.date_updated, now);
    }

    #[test]
    fn test_merge_precedence_high_then_low() {
        let mut stored = high("instantmarkets");
        let won = merge(&mut stored, low("bidnetdirect"), Utc::now());

        assert!(!won);
        assert_eq!(stored.confidence_score, 0.8);
        assert_eq!(
            stored.opportunity.description.as_deref(),
            Some("Night guard for a construction site")
        );
        // lower confidence only fills gaps
        assert_eq!(stored.organization.industry.as_deref(), Some("Security Services"));
        assert_eq!(stored.source, "instantmarkets");
    }

    #[test]
    fn test_merge_is_order_independent_for_content() {
        let mut forward = low("a");
        merge(&mut forward, high("b"), Utc::now());
        let mut backward = high("b");
        merge(&mut backward, low("a"), Utc::now());

        assert_eq!(forward.organization, backward.organization);
        assert_eq!(forward.opportunity, backward.opportunity);
        assert_eq!(forward.confidence_score, backward.confidence_score);
        assert_eq!(forward.signals, backward.signals);
        assert_eq!(forward.contacts.len(), 2);
        assert_eq!(backward.contacts.len(), 2);
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let mut stored = low("a");
        let mut rival = low("b");
        rival.opportunity.description = Some("Different description".to_string());

        assert!(!merge(&mut stored, rival, Utc::now()));
        assert_eq!(
            stored.opportunity.description.as_deref(),
            Some("Overnight patrol of a warehouse")
        );
    }

    #[test]
    fn test_same_attribution_not_duplicated() {
        let mut stored = low("a");
        merge(&mut stored, low("a"), Utc::now());
        merge(&mut stored, low("b"), Utc::now());
        merge(&mut stored, low("b"), Utc::now());
        assert_eq!(stored.additional_sources.len(), 1);
    }

    #[test]
    fn test_token_similarity_policy() {
        let policy = MatchPolicy::TokenSimilarity { min_similarity: 0.6 };
        let stored = IdentityKey::new("Acme", "Night Guard Needed", Some("Austin, TX"));
        let close = IdentityKey::new("Acme", "Night Guard Needed Urgently", Some("Austin, TX"));
        let elsewhere = IdentityKey::new("Acme", "Night Guard Needed", Some("Dallas, TX"));

        assert!(policy.matches(&stored, &close));
        assert!(!policy.matches(&stored, &elsewhere));
        assert!(!MatchPolicy::Exact.matches(&stored, &close));
    }

    #[test]
    fn test_match_policy_serde() {
        let policy: MatchPolicy =
            serde_json::from_str(r#"{"kind":"token_similarity","min_similarity":0.7}"#).unwrap();
        assert_eq!(policy, MatchPolicy::TokenSimilarity { min_similarity: 0.7 });
        let exact: MatchPolicy = serde_json::from_str(r#"{"kind":"exact"}"#).unwrap();
        assert_eq!(exact, MatchPolicy::Exact);
    }
}
