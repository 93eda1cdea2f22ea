//! Organization name normalization, government detection and industry guess.

use lazy_static::lazy_static;
use regex::Regex;

/// Legal suffixes removed before matching, longest first.
const LEGAL_SUFFIXES: &[&str] = &[
    "limited liability company",
    "incorporated",
    "corporation",
    "company",
    "limited",
    "l l c",
    "corp",
    "inc",
    "llc",
    "ltd",
    "co",
];

const GOVERNMENT_INDICATORS: &[&str] = &[
    "department",
    "agency",
    "bureau",
    "commission",
    "authority",
    "administration",
    "county",
    "city of",
    "state of",
    "town of",
    "government",
    "federal",
    "municipal",
    "district",
    "u.s.",
];

lazy_static! {
    // "Acme Security Services LLC", "Shield Group, Inc."
    static ref COMPANY_NAME: Regex = Regex::new(
        r"\b((?:[A-Z][A-Za-z0-9&'.\-]* +){0,4}[A-Z][A-Za-z0-9&'.\-]*),? +(Inc|LLC|Ltd|Corp|Corporation|Company|Co)\b\.?"
    ).unwrap();

    // "City of Austin", "Travis County", "Department of Labor"
    static ref AGENCY_NAME: Regex = Regex::new(
        r"\b(?:(?:City|County|State|Town|Department) of(?: +[A-Z][A-Za-z]+){1,3}|(?:[A-Z][A-Za-z]+ +){1,2}County)\b"
    ).unwrap();
}

/// Organization name mentioned in free text, with its legal suffix.
pub fn find_org_name(text: &str) -> Option<String> {
    if let Some(caps) = COMPANY_NAME.captures(text) {
        return Some(format!("{} {}", caps[1].trim(), &caps[2]));
    }
    AGENCY_NAME.find(text).map(|m| m.as_str().trim().to_string())
}

/// Case-fold, strip punctuation and legal suffixes, collapse whitespace.
///
/// "Acme Corp." and "ACME CORP" both become "acme".
pub fn normalize_org_name(name: &str) -> String {
    let folded: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let mut words: Vec<&str> = folded.split_whitespace().collect();

    // Suffixes can stack ("Acme Co. Inc."), but never strip the whole name
    loop {
        let joined = words.join(" ");
        let stripped = LEGAL_SUFFIXES.iter().find_map(|suffix| {
            let suffix_len = suffix.split_whitespace().count();
            (words.len() > suffix_len && joined.ends_with(&format!(" {suffix}"))).then_some(suffix_len)
        });
        match stripped {
            Some(n) => words.truncate(words.len() - n),
            None => break,
        }
    }

    words.join(" ")
}

/// Name looks like a public agency.
pub fn is_government(name: &str) -> bool {
    let lower = name.to_lowercase();
    GOVERNMENT_INDICATORS.iter().any(|indicator| {
        if indicator.contains(' ') || indicator.contains('.') {
            lower.contains(indicator)
        } else {
            lower.split(|c: char| !c.is_alphanumeric()).any(|w| w == *indicator)
        }
    })
}

/// Industry guessed from organization name keywords.
pub fn guess_industry(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    let any = |terms: &[&str]| terms.iter().any(|t| lower.contains(t));

    if any(&["school", "university", "college", "academy"]) {
        "Education"
    } else if any(&["hospital", "medical", "health", "clinic"]) {
        "Healthcare"
    } else if any(&["government", "city of", "county", "state of", "federal", "department"]) {
        "Government"
    } else if any(&["construction", "builder", "development"]) {
        "Construction"
    } else if any(&["event", "entertainment", "production"]) {
        "Entertainment"
    } else if any(&["retail", "store", "shop", "mall"]) {
        "Retail"
    } else {
        "Security Services"
    }
}
