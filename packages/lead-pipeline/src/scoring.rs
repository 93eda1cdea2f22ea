//! Confidence scoring and the keep/drop decision.
//!
//! A score is the sum of fixed weights for the signals a candidate fires.
//! Weights are held in hundredths so every score is exact and can be
//! explained from the list of fired signals alone.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::extract::contacts::{normalize_email, normalize_phone};
use crate::extract::organization::normalize_org_name;
use crate::types::candidate::CandidateLead;
use crate::types::config::ValidationConfig;
use crate::types::lead::Contact;

/// A weighted piece of evidence that a candidate is a usable lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    OrganizationName,
    ValidContact,
    TitleDescription,
    Location,
    TypeClassified,
}

impl Signal {
    pub const ALL: [Signal; 5] = [
        Signal::OrganizationName,
        Signal::ValidContact,
        Signal::TitleDescription,
        Signal::Location,
        Signal::TypeClassified,
    ];

    /// Weight in hundredths of a point. All weights sum to 100.
    pub fn weight(&self) -> u32 {
        match self {
            Signal::OrganizationName => 10,
            Signal::ValidContact => 30,
            Signal::TitleDescription => 20,
            Signal::Location => 20,
            Signal::TypeClassified => 20,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::OrganizationName => "organization_name",
            Signal::ValidContact => "valid_contact",
            Signal::TitleDescription => "title_description",
            Signal::Location => "location",
            Signal::TypeClassified => "type_classified",
        }
    }

    fn fires(&self, candidate: &CandidateLead) -> bool {
        let opp = &candidate.opportunity;
        match self {
            Signal::OrganizationName => !normalize_org_name(&candidate.organization.name).is_empty(),
            Signal::ValidContact => candidate.contacts.iter().any(Contact::is_reachable),
            Signal::TitleDescription => {
                opp.title.trim().chars().count() >= 3
                    && opp
                        .description
                        .as_deref()
                        .is_some_and(|d| d.trim().chars().count() >= 20)
            }
            Signal::Location => opp.location.as_deref().is_some_and(|l| !l.trim().is_empty()),
            Signal::TypeClassified => opp.opportunity_type.is_classified(),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The signals a candidate fired and the resulting score.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreCard {
    fired: Vec<Signal>,
}

impl ScoreCard {
    /// Evaluate every signal against a candidate.
    pub fn evaluate(candidate: &CandidateLead) -> Self {
        Self {
            fired: Signal::ALL.into_iter().filter(|s| s.fires(candidate)).collect(),
        }
    }

    pub fn from_signals(signals: impl IntoIterator<Item = Signal>) -> Self {
        let mut fired: Vec<Signal> = Vec::new();
        for signal in signals {
            if !fired.contains(&signal) {
                fired.push(signal);
            }
        }
        Self { fired }
    }

    pub fn fired(&self) -> &[Signal] {
        &self.fired
    }

    pub fn hundredths(&self) -> u32 {
        self.fired.iter().map(Signal::weight).sum()
    }

    pub fn score(&self) -> f64 {
        f64::from(self.hundredths()) / 100.0
    }

    pub fn has(&self, signal: Signal) -> bool {
        self.fired.contains(&signal)
    }
}

/// Why a candidate was dropped. Counted in run statistics, never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    MissingOrganization,
    MissingTitle,
    BelowThreshold { score: f64, min: f64 },
    Irrelevant,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingOrganization => f.write_str("missing organization name"),
            Rejection::MissingTitle => f.write_str("missing opportunity title"),
            Rejection::BelowThreshold { score, min } => {
                write!(f, "confidence {score:.2} below threshold {min:.2}")
            }
            Rejection::Irrelevant => f.write_str("not about guarding work"),
        }
    }
}

/// `score >= min`, tolerant of float noise in configured thresholds.
pub fn meets_threshold(score: f64, min: f64) -> bool {
    score + 1e-9 >= min
}

const SECURITY_KEYWORDS: &[&str] = &[
    "security", "guard", "officer", "patrol", "surveillance", "protection", "watch",
];

const OFF_TOPIC_PHRASES: &[&str] = &[
    "cyber security",
    "cybersecurity",
    "information security",
    "network security",
    "security clearance",
    "food security",
    "financial security",
    "social security",
    "security deposit",
];

/// Candidate text talks about guarding once off-topic "security" phrases
/// are removed.
pub fn is_security_related(text: &str) -> bool {
    let mut lower = text.to_lowercase();
    for phrase in OFF_TOPIC_PHRASES {
        lower = lower.replace(phrase, " ");
    }
    SECURITY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Cleans contacts, scores, and applies the acceptance gate.
#[derive(Debug, Clone)]
pub struct Validator {
    min_confidence: f64,
    relevance_filter: bool,
}

impl Validator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            min_confidence: config.min_confidence_score,
            relevance_filter: config.relevance_filter,
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// Normalize contact values in place; contacts left unreachable are dropped.
    pub fn clean_contacts(candidate: &mut CandidateLead) {
        for contact in candidate.contacts.iter_mut() {
            contact.email = contact.email.as_deref().and_then(normalize_email);
            contact.phone = contact.phone.as_deref().and_then(normalize_phone);
        }
        candidate.contacts.retain(Contact::is_reachable);
    }

    /// Accept with a score card or reject with a reason.
    pub fn validate(&self, candidate: &mut CandidateLead) -> Result<ScoreCard, Rejection> {
        Self::clean_contacts(candidate);

        if candidate.organization.name.trim().is_empty() {
            return Err(Rejection::MissingOrganization);
        }
        if candidate.opportunity.title.trim().is_empty() {
            return Err(Rejection::MissingTitle);
        }
        if self.relevance_filter && !is_security_related(&candidate.searchable_text()) {
            return Err(Rejection::Irrelevant);
        }

        let card = ScoreCard::evaluate(candidate);
        let score = card.score();
        if !meets_threshold(score, self.min_confidence) {
            return Err(Rejection::BelowThreshold {
                score,
                min: self.min_confidence,
            });
        }
        Ok(card)
    }
}
