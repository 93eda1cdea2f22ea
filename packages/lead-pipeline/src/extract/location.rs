//! US state detection and "City, ST" location extraction.

use lazy_static::lazy_static;
use regex::Regex;

/// Two-letter code and full name for every state plus DC.
pub const US_STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
    ("DC", "District of Columbia"),
];

lazy_static! {
    static ref CITY_STATE: Regex = {
        let codes: Vec<&str> = US_STATES.iter().map(|(code, _)| *code).collect();
        Regex::new(&format!(
            r"\b([A-Z][A-Za-z.'\-]*(?: [A-Z][A-Za-z.'\-]*){{0,3}}),\s*({})\b",
            codes.join("|")
        ))
        .unwrap()
    };
    static ref STATE_NAME: Regex = {
        // Longest names first so "West Virginia" wins over "Virginia".
        let mut names: Vec<&str> = US_STATES.iter().map(|(_, name)| *name).collect();
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        Regex::new(&format!(r"(?i)\b({})\b", names.join("|"))).unwrap()
    };
}

/// Resolve a state code or full state name to its two-letter code.
pub fn normalize_state(raw: &str) -> Option<&'static str> {
    let trimmed = raw.trim();
    US_STATES
        .iter()
        .find(|(code, name)| code.eq_ignore_ascii_case(trimmed) || name.eq_ignore_ascii_case(trimmed))
        .map(|(code, _)| *code)
}

/// First "City, ST" occurrence in the text.
pub fn find_city_state(text: &str) -> Option<String> {
    CITY_STATE.captures(text).map(|caps| format!("{}, {}", &caps[1], &caps[2]))
}

/// State code mentioned in a location or free text.
///
/// A "City, ST" pair wins, then a trailing bare code ("Austin TX"), then a
/// full state name anywhere.
pub fn detect_state(text: &str) -> Option<&'static str> {
    if let Some(caps) = CITY_STATE.captures(text) {
        return normalize_state(&caps[2]);
    }
    if let Some(last) = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .last()
    {
        if last.len() == 2 && last.chars().all(|c| c.is_ascii_uppercase()) {
            if let Some(code) = normalize_state(last) {
                return Some(code);
            }
        }
    }
    STATE_NAME
        .captures(text)
        .and_then(|caps| normalize_state(&caps[1]))
}
