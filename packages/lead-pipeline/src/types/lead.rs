//! Persisted lead entities.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::scoring::Signal;

/// Stable lead identifier. Assigned once on first insert, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(Uuid);

impl LeadId {
    /// Time-ordered id for a newly accepted lead.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LeadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for LeadId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for LeadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What kind of opportunity a source publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadType {
    JobPosting,
    Rfp,
    Contract,
}

impl LeadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadType::JobPosting => "job_posting",
            LeadType::Rfp => "rfp",
            LeadType::Contract => "contract",
        }
    }
}

impl fmt::Display for LeadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manual triage state. Only the presentation layer moves a lead past `New`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Qualified,
    Converted,
    Rejected,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Converted => "converted",
            LeadStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "qualified" => Ok(LeadStatus::Qualified),
            "converted" => Ok(LeadStatus::Converted),
            "rejected" => Ok(LeadStatus::Rejected),
            other => Err(format!("unknown lead status: {other}")),
        }
    }
}

/// Classified kind of guarding work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityType {
    Event,
    Construction,
    General,
    Other,
    #[default]
    Unknown,
}

impl OpportunityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityType::Event => "event",
            OpportunityType::Construction => "construction",
            OpportunityType::General => "general",
            OpportunityType::Other => "other",
            OpportunityType::Unknown => "unknown",
        }
    }

    pub fn is_classified(&self) -> bool {
        !matches!(self, OpportunityType::Unknown)
    }
}

/// Armed/unarmed requirement. `Unknown` when the text is silent or contradictory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmedStatus {
    Armed,
    Unarmed,
    #[default]
    Unknown,
}

impl ArmedStatus {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArmedStatus::Armed => Some(true),
            ArmedStatus::Unarmed => Some(false),
            ArmedStatus::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ArmedStatus::Unknown)
    }
}

/// The employer or agency behind an opportunity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    /// Display name, original casing and legal suffix kept
    pub name: String,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_government: bool,
}

impl Organization {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A reachable person or mailbox. Retained only with an email or a phone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    /// Canonical form: `+` country code and national digits
    pub phone: Option<String>,
    pub department: Option<String>,
}

impl Contact {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Default::default()
        }
    }

    pub fn with_phone(phone: impl Into<String>) -> Self {
        Self {
            phone: Some(phone.into()),
            ..Default::default()
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.is_empty())
            || self.phone.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Union key used when merging contact lists: email, else phone.
    pub fn merge_key(&self) -> Option<String> {
        match (&self.email, &self.phone) {
            (Some(email), _) if !email.is_empty() => Some(format!("email:{}", email.to_lowercase())),
            (_, Some(phone)) if !phone.is_empty() => Some(format!("phone:{phone}")),
            _ => None,
        }
    }

    /// Full display name when either part is known.
    pub fn display_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        }
    }
}

/// The work being offered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub title: String,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub location: Option<String>,
    /// Two-letter US state code
    pub state: Option<String>,
    #[serde(default)]
    pub opportunity_type: OpportunityType,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub estimated_value: Option<String>,
    #[serde(default)]
    pub is_armed: ArmedStatus,
    pub guard_count: Option<u32>,
}

impl Opportunity {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// `end_date` must not fall before `start_date`.
    pub fn has_valid_dates(&self) -> bool {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => end >= start,
            _ => true,
        }
    }
}

/// Where a lead was seen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub url: String,
}

/// A curated, deduplicated opportunity ready for triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    /// First-seen source name
    pub source: String,
    /// First-seen source URL
    pub source_url: String,
    /// Later sightings of the same opportunity
    #[serde(default)]
    pub additional_sources: Vec<SourceRef>,
    pub date_extracted: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    pub lead_type: LeadType,
    #[serde(default)]
    pub status: LeadStatus,
    pub notes: Option<String>,
    pub confidence_score: f64,
    /// Scoring signals that produced `confidence_score`
    #[serde(default)]
    pub signals: Vec<Signal>,
    pub organization: Organization,
    pub opportunity: Opportunity,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

impl Lead {
    /// Every place this lead was seen, first-seen first.
    pub fn all_sources(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.source.as_str())
            .chain(self.additional_sources.iter().map(|s| s.source.as_str()))
    }

    pub fn seen_in(&self, source: &str) -> bool {
        self.all_sources().any(|s| s.eq_ignore_ascii_case(source))
    }

    /// Check the data-model invariants a stored lead must hold.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.organization.name.trim().is_empty() {
            return Err("organization name is empty".to_string());
        }
        if self.opportunity.title.trim().is_empty() {
            return Err("opportunity title is empty".to_string());
        }
        if !self.opportunity.has_valid_dates() {
            return Err("end date precedes start date".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(format!("confidence {} out of range", self.confidence_score));
        }
        if self.contacts.iter().any(|c| !c.is_reachable()) {
            return Err("contact without email or phone".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_merge_key_prefers_email() {
        let mut contact = Contact::with_email("Jane@Acme.com");
        contact.phone = Some("+15125550100".to_string());
        assert_eq!(contact.merge_key(), Some("email:jane@acme.com".to_string()));

        let phone_only = Contact::with_phone("+15125550100");
        assert_eq!(phone_only.merge_key(), Some("phone:+15125550100".to_string()));

        assert_eq!(Contact::default().merge_key(), None);
    }

    #[test]
    fn test_opportunity_date_order() {
        let mut opp = Opportunity::titled("Night Guard");
        opp.start_date = NaiveDate::from_ymd_opt(2025, 3, 1);
        opp.end_date = NaiveDate::from_ymd_opt(2025, 2, 1);
        assert!(!opp.has_valid_dates());

        opp.end_date = NaiveDate::from_ymd_opt(2025, 3, 1);
        assert!(opp.has_valid_dates());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Qualified".parse::<LeadStatus>(), Ok(LeadStatus::Qualified));
        assert!("archived".parse::<LeadStatus>().is_err());
    }

    #[test]
    fn test_lead_id_round_trips_through_string() {
        let id = LeadId::new();
        let parsed: LeadId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
