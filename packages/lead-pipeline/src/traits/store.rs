//! Storage traits for leads and run history.
//!
//! - `LeadStore`: curated leads with identity-key dedup
//! - `RunHistory`: bounded, append-only run records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::dedup::MatchPolicy;
use crate::error::StoreResult;
use crate::types::{
    lead::{Lead, LeadId, LeadStatus},
    query::{AggregateBy, LeadFilter, LeadPage, Pagination},
    run::{ActiveRun, RunRecord},
};

/// What `upsert` did with an incoming lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No stored lead matched; the incoming lead was stored under its id
    Inserted(LeadId),

    /// Merged into the stored lead with this id
    Merged(LeadId),
}

impl UpsertOutcome {
    pub fn id(&self) -> LeadId {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Merged(id) => *id,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// Persistence for curated leads.
///
/// Upserts for the same identity key are serialized; upserts for different
/// keys proceed independently. Precedence on a match is decided by
/// [`crate::dedup::merge`], never by arrival order alone.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Insert the lead, or merge it into the stored lead it matches.
    async fn upsert(&self, lead: Lead, policy: MatchPolicy) -> StoreResult<UpsertOutcome>;

    /// Store a lead without matching.
    async fn insert(&self, lead: Lead) -> StoreResult<LeadId>;

    /// Get a lead by id.
    async fn get(&self, id: LeadId) -> StoreResult<Option<Lead>>;

    /// One page of leads matching the filter, newest first.
    async fn query(&self, filter: &LeadFilter, page: Pagination) -> StoreResult<LeadPage>;

    /// Every lead matching the filter, walking all pages.
    async fn query_all(&self, filter: &LeadFilter) -> StoreResult<Vec<Lead>> {
        let mut leads = Vec::new();
        let mut page = Pagination::new(1, Pagination::MAX_PER_PAGE);
        loop {
            let result = self.query(filter, page).await?;
            let fetched = result.leads.len();
            leads.extend(result.leads);
            if fetched == 0 || leads.len() >= result.total {
                return Ok(leads);
            }
            page.page += 1;
        }
    }

    /// Manual triage. Returns the updated lead.
    async fn update_status(
        &self,
        id: LeadId,
        status: LeadStatus,
        notes: Option<String>,
    ) -> StoreResult<Lead>;

    /// Lead counts grouped by source, type or confidence bucket.
    async fn aggregate(&self, by: AggregateBy) -> StoreResult<BTreeMap<String, usize>>;

    /// Total number of stored leads.
    async fn count(&self) -> StoreResult<usize>;
}

/// Append-only run history bounded to a maximum length.
#[async_trait]
pub trait RunHistory: Send + Sync {
    /// Append a record, evicting the oldest beyond `max_history`.
    async fn append_run(&self, record: RunRecord, max_history: usize) -> StoreResult<()>;

    /// Most recent records, newest first.
    async fn recent_runs(&self, limit: usize) -> StoreResult<Vec<RunRecord>>;

    /// The most recent record.
    async fn last_run(&self) -> StoreResult<Option<RunRecord>> {
        Ok(self.recent_runs(1).await?.into_iter().next())
    }

    /// Take the run lock for `run`. Returns false while another run holds
    /// it. A lock taken before `stale_before` is treated as abandoned.
    async fn claim_run(&self, run: &ActiveRun, stale_before: DateTime<Utc>) -> StoreResult<bool>;

    /// Release the run lock if `run_id` holds it.
    async fn release_run(&self, run_id: Uuid) -> StoreResult<()>;

    /// The run holding the lock, if any.
    async fn active_run(&self) -> StoreResult<Option<ActiveRun>>;
}

/// Composite trait for a backend holding both leads and run history.
pub trait PipelineStore: LeadStore + RunHistory {}

impl<T: LeadStore + RunHistory> PipelineStore for T {}
