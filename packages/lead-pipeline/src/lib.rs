//! Security-Guard Lead Pipeline
//!
//! Collects security-guard opportunities (job postings, RFPs, contracts) from
//! public sources, extracts organizations, contacts and opportunity details,
//! scores each candidate, merges duplicates across sources and keeps a
//! queryable store of curated leads.
//!
//! # Usage
//!
//! ```rust,ignore
//! use lead_pipeline::{ConfigHandle, MemoryStore, Orchestrator, PipelineConfig, SourceRegistry};
//! use lead_pipeline::types::run::TriggerKind;
//!
//! let config = ConfigHandle::new(PipelineConfig::default());
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = Orchestrator::new(config, SourceRegistry::with_defaults(), store.clone());
//!
//! let record = orchestrator.run_once(TriggerKind::Manual).await;
//! let texas = store.query(&LeadFilter::new().with_state("TX"), Pagination::default()).await?;
//! ```
//!
//! # Modules
//!
//! - [`sources`] - Source adapters (USAJOBS API, listing pages) and registry
//! - [`extract`] - Field extraction from free text
//! - [`scoring`] - Confidence signals and the keep/drop decision
//! - [`dedup`] - Identity keys, match policy and merge rule
//! - [`stores`] - Lead and run-history storage (MemoryStore, SqliteStore)
//! - [`pipeline`] - Schedule, scheduler loop and run orchestration
//! - [`export`] - JSON and CSV export
//! - [`testing`] - Mock source and fixtures

pub mod dedup;
pub mod error;
pub mod export;
pub mod extract;
pub mod pipeline;
pub mod scoring;
pub mod sources;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use dedup::{IdentityKey, MatchPolicy};
pub use error::{ConfigError, FetchError, ParseError, PipelineError, Result, StoreError};
pub use extract::Extractor;
pub use pipeline::{Orchestrator, PipelineStatus, ScheduleConfig, Scheduler, TriggerOutcome};
pub use scoring::{Rejection, ScoreCard, Signal, Validator};
pub use sources::SourceRegistry;
pub use traits::{
    source::{FetchContext, SourceAdapter},
    store::{LeadStore, PipelineStore, RunHistory, UpsertOutcome},
};
pub use types::{
    candidate::{CandidateLead, RawDocument},
    config::{ConfigHandle, PipelineConfig, ScrapingConfig, SourceConfig, ValidationConfig},
    lead::{
        ArmedStatus, Contact, Lead, LeadId, LeadStatus, LeadType, Opportunity, OpportunityType,
        Organization, SourceRef,
    },
    query::{AggregateBy, LeadFilter, LeadPage, Pagination},
    run::{ActiveRun, RunRecord, RunStatus, SourceOutcome, SourceStatus, TriggerKind},
};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;
