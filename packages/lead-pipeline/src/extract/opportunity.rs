//! Opportunity classification, armed flag, guard counts and dates.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::types::lead::{ArmedStatus, OpportunityType};

const EVENT_KEYWORDS: &[&str] = &[
    "event security",
    "event staff",
    "special event",
    "concert",
    "festival",
    "conference",
    "wedding",
    "stadium",
    "arena",
    "crowd control",
    "corporate event",
];

const CONSTRUCTION_KEYWORDS: &[&str] = &[
    "construction",
    "building site",
    "job site",
    "jobsite",
    "work site",
    "project site",
];

const GENERAL_KEYWORDS: &[&str] = &[
    "security guard",
    "security officer",
    "security services",
    "guard services",
    "security personnel",
    "patrol",
    "armed security",
    "unarmed security",
];

lazy_static! {
    static ref ARMED: Regex = Regex::new(r"(?i)\barmed\b").unwrap();
    static ref UNARMED: Regex = Regex::new(r"(?i)\b(?:unarmed|non-armed)\b").unwrap();

    // Bare "event" on word boundaries, so "prevent" does not count
    static ref EVENT_WORD: Regex = Regex::new(r"\bevents?\b").unwrap();

    // "5 armed guards", "12 security officers"
    static ref COUNT_BEFORE: Regex = Regex::new(
        r"(?i)\b(\d{1,4})\s+(?:(?:armed|unarmed|uniformed|licensed|security|event|construction)\s+)*(?:guards?|officers?)\b"
    ).unwrap();

    // "guards needed: 3", "officers required - 4"
    static ref COUNT_AFTER: Regex = Regex::new(
        r"(?i)\b(?:guards?|officers?)(?:\s+(?:needed|required|requested|wanted))?\s*[:\-]?\s*(\d{1,4})\b"
    ).unwrap();

    static ref DATE: Regex = Regex::new(
        r"(?i)\b(?:(\d{1,2})/(\d{1,2})/(\d{4})|(\d{4})-(\d{2})-(\d{2})|(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+(\d{1,2}),?\s+(\d{4}))\b"
    ).unwrap();
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// Classify the kind of guarding work from keywords.
///
/// Event and construction are specific; if exactly one of them matches it
/// wins, if both match the result is ambiguous. General security is the
/// fallback when neither specific category matches.
pub fn classify(text: &str) -> OpportunityType {
    let lower = text.to_lowercase();
    let event = contains_any(&lower, EVENT_KEYWORDS) || EVENT_WORD.is_match(&lower);
    let construction = contains_any(&lower, CONSTRUCTION_KEYWORDS);

    match (event, construction) {
        (true, false) => OpportunityType::Event,
        (false, true) => OpportunityType::Construction,
        (true, true) => OpportunityType::Unknown,
        (false, false) if contains_any(&lower, GENERAL_KEYWORDS) => OpportunityType::General,
        (false, false) => OpportunityType::Unknown,
    }
}

/// Armed requirement. Text mentioning both is contradictory.
pub fn armed_status(text: &str) -> ArmedStatus {
    let unarmed = UNARMED.is_match(text);
    let armed = ARMED.is_match(text);

    match (armed, unarmed) {
        (true, false) => ArmedStatus::Armed,
        (false, true) => ArmedStatus::Unarmed,
        _ => ArmedStatus::Unknown,
    }
}

/// First positive integer adjacent to a guard or officer keyword.
pub fn guard_count(text: &str) -> Option<u32> {
    let before = COUNT_BEFORE.captures(text).and_then(|c| {
        let m = c.get(1)?;
        Some((m.start(), m.as_str()))
    });
    let after = COUNT_AFTER.captures(text).and_then(|c| {
        let m = c.get(1)?;
        Some((m.start(), m.as_str()))
    });

    let (_, raw) = match (before, after) {
        (Some(b), Some(a)) => {
            if b.0 <= a.0 {
                b
            } else {
                a
            }
        }
        (Some(hit), None) | (None, Some(hit)) => hit,
        (None, None) => return None,
    };

    raw.parse::<u32>().ok().filter(|n| *n > 0)
}

fn month_number(name: &str) -> Option<u32> {
    let month = match &name.to_lowercase()[..3] {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// All parseable dates in order of appearance.
pub fn find_dates(text: &str) -> Vec<NaiveDate> {
    DATE.captures_iter(text)
        .filter_map(|caps| {
            let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
            if let (Some(m), Some(d), Some(y)) = (num(1), num(2), num(3)) {
                NaiveDate::from_ymd_opt(y as i32, m, d)
            } else if let (Some(y), Some(m), Some(d)) = (num(4), num(5), num(6)) {
                NaiveDate::from_ymd_opt(y as i32, m, d)
            } else {
                let month = caps.get(7).and_then(|m| month_number(m.as_str()))?;
                NaiveDate::from_ymd_opt(num(9)? as i32, month, num(8)?)
            }
        })
        .collect()
}

/// Start and end dates: first and second date found. An end before the
/// start is discarded.
pub fn date_range(text: &str) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let dates = find_dates(text);
    let start = dates.first().copied();
    let end = dates
        .get(1)
        .copied()
        .filter(|end| start.map_or(true, |s| *end >= s));
    (start, end)
}
