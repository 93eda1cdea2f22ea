//! Source-agnostic field extraction.
//!
//! Adapters hand over whatever structured fields their source offers; the
//! [`Extractor`] fills the remaining gaps from the candidate's free text.
//! Fields that are already present are never overwritten, and extraction
//! never fails: a field that cannot be found stays empty.

pub mod contacts;
pub mod location;
pub mod opportunity;
pub mod organization;

use crate::types::candidate::CandidateLead;
use crate::types::lead::{ArmedStatus, OpportunityType};

pub use contacts::{extract_contacts, normalize_email, normalize_phone};
pub use location::{detect_state, normalize_state};
pub use opportunity::{armed_status, classify, date_range, guard_count};
pub use organization::{is_government, normalize_org_name};

/// Fills candidate fields from free text.
#[derive(Debug, Clone, Copy)]
pub struct Extractor {
    enrichment: bool,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self { enrichment: true }
    }

    /// Toggle industry detection and email-based contact names.
    pub fn with_enrichment(mut self, enabled: bool) -> Self {
        self.enrichment = enabled;
        self
    }

    pub fn extract(&self, mut candidate: CandidateLead) -> CandidateLead {
        let text = candidate.searchable_text();

        self.fill_organization(&mut candidate, &text);
        self.fill_opportunity(&mut candidate, &text);
        self.fill_contacts(&mut candidate, &text);

        candidate
    }

    fn fill_organization(&self, candidate: &mut CandidateLead, text: &str) {
        let org = &mut candidate.organization;
        if org.name.trim().is_empty() {
            if let Some(name) = organization::find_org_name(text) {
                org.name = name;
            }
        }
        org.name = org.name.trim().to_string();

        if !org.is_government && is_government(&org.name) {
            org.is_government = true;
        }
        if self.enrichment && org.industry.is_none() && !org.name.is_empty() {
            org.industry = Some(organization::guess_industry(&org.name).to_string());
        }
    }

    fn fill_opportunity(&self, candidate: &mut CandidateLead, text: &str) {
        let opp = &mut candidate.opportunity;
        opp.title = opp.title.trim().to_string();

        if opp.opportunity_type == OpportunityType::Unknown {
            opp.opportunity_type = classify(text);
        }
        if opp.is_armed == ArmedStatus::Unknown {
            opp.is_armed = armed_status(text);
        }
        if opp.guard_count.is_none() {
            opp.guard_count = guard_count(text);
        }

        let (start, end) = date_range(text);
        if opp.start_date.is_none() {
            opp.start_date = start;
        }
        if opp.end_date.is_none() {
            opp.end_date = end;
        }
        if !opp.has_valid_dates() {
            opp.end_date = None;
        }

        if opp.location.as_deref().map_or(true, |l| l.trim().is_empty()) {
            opp.location = location::find_city_state(text);
        }
        if opp.state.is_none() {
            opp.state = opp
                .location
                .as_deref()
                .and_then(detect_state)
                .or_else(|| opp.description.as_deref().and_then(detect_state))
                .map(str::to_string);
        }
    }

    fn fill_contacts(&self, candidate: &mut CandidateLead, text: &str) {
        let mut all = std::mem::take(&mut candidate.contacts);
        all.extend(extract_contacts(text));

        contacts::drop_generic_when_named(&mut all);
        let mut merged = contacts::dedup_contacts(all);

        if self.enrichment {
            for contact in merged.iter_mut() {
                if contact.first_name.is_some() || contact.last_name.is_some() {
                    continue;
                }
                if let Some((first, last)) = contact.email.as_deref().and_then(contacts::name_from_email) {
                    contact.first_name = Some(first);
                    contact.last_name = Some(last);
                }
            }
        }

        candidate.contacts = merged;
    }
}
