//! Pre-persistence shapes: raw documents and candidate leads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::scoring::ScoreCard;
use crate::types::lead::{Contact, Lead, LeadId, LeadStatus, LeadType, Opportunity, Organization};

/// Raw document content as fetched, before parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    /// URL or identifier for this content
    pub url: String,

    /// Raw body (HTML, JSON or plain text)
    pub content: String,

    /// MIME type if the server sent one
    pub content_type: Option<String>,

    /// When the content was fetched
    pub fetched_at: DateTime<Utc>,

    /// Source-specific metadata (HTTP status, page number)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RawDocument {
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
            content_type: None,
            fetched_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// An unvalidated, unmerged extraction result.
///
/// Adapters fill whatever structured fields their source offers and put the
/// rest into `text`; the extraction engine fills the gaps from `text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateLead {
    pub source: String,
    pub source_url: String,
    pub lead_type: LeadType,
    pub organization: Organization,
    pub opportunity: Opportunity,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    /// Free text not mapped to a structured field (contact blocks, body text)
    #[serde(default)]
    pub text: String,
}

impl CandidateLead {
    pub fn new(source: impl Into<String>, source_url: impl Into<String>, lead_type: LeadType) -> Self {
        Self {
            source: source.into(),
            source_url: source_url.into(),
            lead_type,
            organization: Organization::default(),
            opportunity: Opportunity::default(),
            contacts: Vec::new(),
            text: String::new(),
        }
    }

    pub fn with_organization(mut self, name: impl Into<String>) -> Self {
        self.organization.name = name.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.opportunity.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.opportunity.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.opportunity.location = Some(location.into());
        self
    }

    pub fn with_contact(mut self, contact: Contact) -> Self {
        self.contacts.push(contact);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// All free text worth scanning, structured fields first.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.opportunity.title.as_str()];
        if let Some(desc) = &self.opportunity.description {
            parts.push(desc);
        }
        if let Some(req) = &self.opportunity.requirements {
            parts.push(req);
        }
        if !self.text.is_empty() {
            parts.push(&self.text);
        }
        parts.retain(|p| !p.trim().is_empty());
        parts.join("\n")
    }

    /// Promote to a storable lead. Timestamps are set by the store on insert.
    pub fn into_lead(self, card: &ScoreCard, now: DateTime<Utc>) -> Lead {
        Lead {
            id: LeadId::new(),
            source: self.source,
            source_url: self.source_url,
            additional_sources: Vec::new(),
            date_extracted: now,
            date_updated: now,
            lead_type: self.lead_type,
            status: LeadStatus::New,
            notes: None,
            confidence_score: card.score(),
            signals: card.fired().to_vec(),
            organization: self.organization,
            opportunity: self.opportunity,
            contacts: self.contacts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_searchable_text_skips_empty_parts() {
        let candidate = CandidateLead::new("test", "https://example.com/1", LeadType::Rfp)
            .with_title("Event Security Guard")
            .with_text("Contact: jane@example.com");

        assert_eq!(
            candidate.searchable_text(),
            "Event Security Guard\nContact: jane@example.com"
        );
    }

    #[test]
    fn test_raw_document_builder() {
        let doc = RawDocument::new("https://example.com", "  ")
            .with_content_type("text/html")
            .with_metadata("page", "1");

        assert!(!doc.has_content());
        assert_eq!(doc.metadata.get("page"), Some(&"1".to_string()));
    }
}
