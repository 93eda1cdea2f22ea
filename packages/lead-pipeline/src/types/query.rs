//! Query API types consumed by the presentation layer.

use serde::{Deserialize, Serialize};

use crate::types::lead::{Lead, LeadStatus, LeadType};

/// Filter for scoping lead queries. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadFilter {
    /// Two-letter state code or full state name
    pub state: Option<String>,

    /// Matches the first-seen source or any later attribution
    pub source: Option<String>,

    /// Case-insensitive substring of organization, title or description
    pub keyword: Option<String>,

    pub min_confidence: Option<f64>,
    pub status: Option<LeadStatus>,
    pub lead_type: Option<LeadType>,
}

impl LeadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn with_status(mut self, status: LeadStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_lead_type(mut self, lead_type: LeadType) -> Self {
        self.lead_type = Some(lead_type);
        self
    }

    /// The state filter resolved to a two-letter code.
    pub fn state_code(&self) -> Option<String> {
        self.state
            .as_deref()
            .and_then(crate::extract::location::normalize_state)
            .map(str::to_string)
    }

    /// In-memory evaluation. Stores with their own query language must agree
    /// with this.
    pub fn matches(&self, lead: &Lead) -> bool {
        if let Some(state) = &self.state {
            let wanted = self.state_code().unwrap_or_else(|| state.to_uppercase());
            if lead.opportunity.state.as_deref() != Some(wanted.as_str()) {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if !lead.seen_in(source) {
                return false;
            }
        }
        if let Some(keyword) = &self.keyword {
            let needle = keyword.to_lowercase();
            let hit = lead.organization.name.to_lowercase().contains(&needle)
                || lead.opportunity.title.to_lowercase().contains(&needle)
                || lead
                    .opportunity
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if lead.confidence_score < min {
                return false;
            }
        }
        if let Some(status) = self.status {
            if lead.status != status {
                return false;
            }
        }
        if let Some(lead_type) = self.lead_type {
            if lead.lead_type != lead_type {
                return false;
            }
        }
        true
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

impl Pagination {
    pub const MAX_PER_PAGE: usize = 500;

    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1) * self.per_page
    }
}

/// One page of results plus the unpaged total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadPage {
    pub leads: Vec<Lead>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

impl LeadPage {
    pub fn total_pages(&self) -> usize {
        if self.per_page == 0 {
            0
        } else {
            self.total.div_ceil(self.per_page)
        }
    }
}

/// Grouping for [`crate::LeadStore::aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateBy {
    Source,
    LeadType,
    ConfidenceBucket,
}

/// Coarse confidence band used for aggregation.
pub fn confidence_bucket(score: f64) -> &'static str {
    if score >= 0.7 {
        "high"
    } else if score >= 0.4 {
        "medium"
    } else {
        "low"
    }
}
