//! Email, phone and contact extraction from free text.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use crate::types::lead::Contact;

lazy_static! {
    // Email pattern - local part, @, dotted domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b"
    ).unwrap();

    static ref EMAIL_EXACT: Regex = Regex::new(
        r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9-]+(?:\.[A-Z0-9-]+)*\.[A-Z]{2,}$"
    ).unwrap();

    // Phone patterns - US and international with optional country code
    static ref PHONE_REGEX: Regex = Regex::new(
        r"(?:\+\d{1,3}[-.\s]?|\b1[-.\s]?)?(?:\(\d{3}\)|\b\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b"
    ).unwrap();

    // Sentence breaks; the trailing whitespace keeps dotted emails and phones intact
    static ref SENTENCE_BREAK: Regex = Regex::new(r"[.!?;]\s+").unwrap();

    static ref PERSON_NAME: Regex = Regex::new(
        r"^(?:(?:Mr|Ms|Mrs|Dr)\.?\s+)?([A-Z][a-z]+(?:-[A-Z][a-z]+)?)(?:\s+[A-Z]\.?)?\s+([A-Z][a-z]+(?:[-'][A-Z][a-z]+)?)$"
    ).unwrap();
}

/// Shared mailboxes that do not identify a person.
pub const GENERIC_EMAIL_PREFIXES: &[&str] = &[
    "info", "contact", "admin", "sales", "support", "hello", "office", "careers", "jobs", "hr",
    "noreply", "no-reply",
];

/// All email addresses in the text, lower-cased, in order of appearance.
pub fn find_emails(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    EMAIL_REGEX
        .find_iter(text)
        .filter_map(|m| normalize_email(m.as_str()))
        .filter(|e| seen.insert(e.clone()))
        .collect()
}

/// All phone numbers in the text in canonical form.
pub fn find_phones(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    PHONE_REGEX
        .find_iter(text)
        .filter_map(|m| normalize_phone(m.as_str()))
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Strip whitespace, lower-case and check the address shape.
pub fn normalize_email(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_matches(|c: char| matches!(c, '<' | '>' | ',' | ';' | '.' | ':'))
        .trim_start_matches("mailto:")
        .to_lowercase();

    EMAIL_EXACT.is_match(&cleaned).then_some(cleaned)
}

/// Canonical `+<country><national>` form, or `None` with fewer than 10 digits.
///
/// Ten-digit numbers are assumed to be North American and get country code 1.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let explicit_country = raw.trim_start().starts_with('+');

    match digits.len() {
        n if n < 10 => None,
        10 if !explicit_country => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        11..=15 if explicit_country => Some(format!("+{digits}")),
        _ => None,
    }
}

pub fn is_generic_email(email: &str) -> bool {
    let local = email.split('@').next().unwrap_or_default().to_lowercase();
    GENERIC_EMAIL_PREFIXES.contains(&local.as_str())
}

/// `first.last@` local parts as a capitalized name pair.
pub fn name_from_email(email: &str) -> Option<(String, String)> {
    let local = email.split('@').next()?;
    let parts: Vec<&str> = local.split(['.', '_']).collect();
    match parts.as_slice() {
        [first, last]
            if first.len() >= 2
                && last.len() >= 2
                && first.chars().all(|c| c.is_ascii_alphabetic())
                && last.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            Some((capitalize(first), capitalize(last)))
        }
        _ => None,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// Split text into lines and sentences; each segment yields at most one contact.
pub fn segments(text: &str) -> Vec<&str> {
    text.lines()
        .flat_map(|line| SENTENCE_BREAK.split(line))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// A person name written before the first email or phone of a segment.
fn name_before(segment: &str, first_hit: usize) -> Option<(String, String)> {
    let prefix = &segment[..first_hit];
    // Drop labels such as "Contact:" or "Point of contact -"
    let prefix = prefix.rsplit([':', '-', '|']).next().unwrap_or(prefix);
    let candidate = prefix
        .trim()
        .trim_end_matches(|c: char| matches!(c, ',' | '(' | '<' | '/'))
        .trim();

    let caps = PERSON_NAME.captures(candidate)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Extract contacts from free text.
///
/// Generic mailboxes lose their email when a named address exists anywhere in
/// the text; contacts left without email or phone are dropped.
pub fn extract_contacts(text: &str) -> Vec<Contact> {
    let mut contacts = Vec::new();

    for segment in segments(text) {
        let email_hits: Vec<_> = EMAIL_REGEX.find_iter(segment).collect();
        let phone_hits: Vec<_> = PHONE_REGEX
            .find_iter(segment)
            .filter(|m| normalize_phone(m.as_str()).is_some())
            .collect();

        if email_hits.is_empty() && phone_hits.is_empty() {
            continue;
        }

        let emails: Vec<String> = email_hits
            .iter()
            .filter_map(|m| normalize_email(m.as_str()))
            .collect();
        let email = emails
            .iter()
            .find(|e| !is_generic_email(e))
            .or_else(|| emails.first())
            .cloned();
        let phone = phone_hits.first().and_then(|m| normalize_phone(m.as_str()));

        let first_hit = email_hits
            .iter()
            .chain(phone_hits.iter())
            .map(|m| m.start())
            .min()
            .unwrap_or(0);

        let mut contact = Contact {
            email,
            phone,
            ..Default::default()
        };
        if let Some((first, last)) = name_before(segment, first_hit) {
            contact.first_name = Some(first);
            contact.last_name = Some(last);
        }
        contacts.push(contact);
    }

    drop_generic_when_named(&mut contacts);
    dedup_contacts(contacts)
}

/// Remove generic mailboxes when a named address is present.
pub fn drop_generic_when_named(contacts: &mut Vec<Contact>) {
    let has_named = contacts
        .iter()
        .any(|c| c.email.as_deref().is_some_and(|e| !is_generic_email(e)));
    if has_named {
        for contact in contacts.iter_mut() {
            if contact.email.as_deref().is_some_and(is_generic_email) {
                contact.email = None;
            }
        }
    }
    contacts.retain(Contact::is_reachable);
}

/// Union by merge key, filling empty fields of the first occurrence.
pub fn dedup_contacts(contacts: Vec<Contact>) -> Vec<Contact> {
    let mut out: Vec<Contact> = Vec::with_capacity(contacts.len());
    for contact in contacts {
        let Some(key) = contact.merge_key() else {
            continue;
        };
        match out.iter_mut().find(|c| c.merge_key().as_deref() == Some(key.as_str())) {
            Some(existing) => fill_contact(existing, contact),
            None => out.push(contact),
        }
    }
    out
}

/// Copy fields of `from` into the empty slots of `into`.
pub fn fill_contact(into: &mut Contact, from: Contact) {
    fn fill(slot: &mut Option<String>, value: Option<String>) {
        if slot.as_deref().map_or(true, str::is_empty) {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                *slot = Some(v);
            }
        }
    }
    fill(&mut into.first_name, from.first_name);
    fill(&mut into.last_name, from.last_name);
    fill(&mut into.title, from.title);
    fill(&mut into.email, from.email);
    fill(&mut into.phone, from.phone);
    fill(&mut into.department, from.department);
}
