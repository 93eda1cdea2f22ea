//! Testing utilities including a mock source and fixtures.
//!
//! These are useful for exercising the orchestrator and stores without
//! making network calls.

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

use crate::dedup::MatchPolicy;
use crate::error::{FetchError, FetchResult, ParseError, ParseResult, StoreError, StoreResult};
use crate::stores::MemoryStore;
use crate::traits::source::{FetchContext, SourceAdapter};
use crate::traits::store::{LeadStore, RunHistory, UpsertOutcome};
use crate::types::{
    candidate::{CandidateLead, RawDocument},
    config::SourceConfig,
    lead::{Lead, LeadId, LeadStatus, LeadType, Opportunity, Organization},
    query::{AggregateBy, LeadFilter, LeadPage, Pagination},
    run::{ActiveRun, RunRecord, RunStatus, TriggerKind},
};

/// Counts fetches in progress across several mock sources and remembers
/// the highest count seen.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Leaves the in-flight count when the fetch stream ends or is dropped.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.leave();
    }
}

/// Record of a call made to the mock source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockSourceCall {
    Fetch { attempt: u32 },
    Parse { url: String },
}

/// A source serving canned documents.
///
/// Each document carries its candidates as JSON, so `parse` is a plain
/// deserialization and a non-JSON document is a parse error.
pub struct MockSource {
    name: String,
    lead_type: LeadType,
    documents: Vec<RawDocument>,

    /// Fetch attempts that fail before one succeeds (`u32::MAX` = always)
    failures: u32,

    /// Pause before the first document
    delay: Duration,

    attempts: AtomicU32,

    in_flight: Option<Arc<InFlight>>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockSourceCall>>>,
}

impl MockSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lead_type: LeadType::JobPosting,
            documents: Vec::new(),
            failures: 0,
            delay: Duration::ZERO,
            attempts: AtomicU32::new(0),
            in_flight: None,
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_lead_type(mut self, lead_type: LeadType) -> Self {
        self.lead_type = lead_type;
        self
    }

    /// Serve one document holding these candidates.
    pub fn with_document(self, url: impl Into<String>, candidates: Vec<CandidateLead>) -> Self {
        // CandidateLead is plain data; serialization cannot fail
        let content = serde_json::to_string(&candidates).unwrap_or_default();
        self.with_raw_document(RawDocument::new(url, content).with_content_type("application/json"))
    }

    /// Serve a document as-is.
    pub fn with_raw_document(mut self, document: RawDocument) -> Self {
        self.documents.push(document);
        self
    }

    /// Fail the first `n` fetch attempts.
    pub fn failing_first(mut self, n: u32) -> Self {
        self.failures = n;
        self
    }

    /// Fail every fetch attempt.
    pub fn always_failing(mut self) -> Self {
        self.failures = u32::MAX;
        self
    }

    /// Wait this long (cancellably) before serving documents.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Count this source's fetches in `in_flight` while they run.
    pub fn with_in_flight(mut self, in_flight: Arc<InFlight>) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    /// Fetch attempts made so far.
    pub fn fetch_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Get all calls made to this source.
    pub fn calls(&self) -> Vec<MockSourceCall> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: MockSourceCall) {
        if let Ok(mut calls) = self.calls.write() {
            calls.push(call);
        }
    }
}

impl SourceAdapter for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lead_type(&self) -> LeadType {
        self.lead_type
    }

    fn fetch<'a>(
        &'a self,
        config: &'a SourceConfig,
        ctx: &'a FetchContext,
    ) -> BoxStream<'a, FetchResult<RawDocument>> {
        Box::pin(stream! {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.record(MockSourceCall::Fetch { attempt });
            let _in_flight = self.in_flight.clone().map(|counter| {
                counter.enter();
                InFlightGuard(counter)
            });

            if !self.delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => {
                        yield Err(FetchError::Cancelled);
                        return;
                    }
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }

            if attempt <= self.failures {
                yield Err(FetchError::Status {
                    status: 503,
                    url: config.url.clone(),
                });
                return;
            }

            for document in self.documents.iter().take(config.max_documents) {
                ctx.pacer.until_ready().await;
                yield Ok(document.clone());
            }
        })
    }

    fn parse(&self, document: &RawDocument) -> ParseResult<Vec<CandidateLead>> {
        self.record(MockSourceCall::Parse {
            url: document.url.clone(),
        });
        serde_json::from_str(&document.content).map_err(|source| ParseError::Json {
            url: document.url.clone(),
            source,
        })
    }
}

/// A store whose lead writes always fail. Reads, run history and the run
/// lock go to an inner [`MemoryStore`].
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    write_attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts and inserts attempted so far.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn fail_write(&self) -> StoreError {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        StoreError::backend(std::io::Error::other("disk I/O error"))
    }
}

#[async_trait]
impl LeadStore for FailingStore {
    async fn upsert(&self, _lead: Lead, _policy: MatchPolicy) -> StoreResult<UpsertOutcome> {
        Err(self.fail_write())
    }

    async fn insert(&self, _lead: Lead) -> StoreResult<LeadId> {
        Err(self.fail_write())
    }

    async fn get(&self, id: LeadId) -> StoreResult<Option<Lead>> {
        self.inner.get(id).await
    }

    async fn query(&self, filter: &LeadFilter, page: Pagination) -> StoreResult<LeadPage> {
        self.inner.query(filter, page).await
    }

    async fn update_status(
        &self,
        _id: LeadId,
        _status: LeadStatus,
        _notes: Option<String>,
    ) -> StoreResult<Lead> {
        Err(self.fail_write())
    }

    async fn aggregate(&self, by: AggregateBy) -> StoreResult<BTreeMap<String, usize>> {
        self.inner.aggregate(by).await
    }

    async fn count(&self) -> StoreResult<usize> {
        self.inner.count().await
    }
}

#[async_trait]
impl RunHistory for FailingStore {
    async fn append_run(&self, record: RunRecord, max_history: usize) -> StoreResult<()> {
        self.inner.append_run(record, max_history).await
    }

    async fn recent_runs(&self, limit: usize) -> StoreResult<Vec<RunRecord>> {
        self.inner.recent_runs(limit).await
    }

    async fn claim_run(&self, run: &ActiveRun, stale_before: DateTime<Utc>) -> StoreResult<bool> {
        self.inner.claim_run(run, stale_before).await
    }

    async fn release_run(&self, run_id: Uuid) -> StoreResult<()> {
        self.inner.release_run(run_id).await
    }

    async fn active_run(&self) -> StoreResult<Option<ActiveRun>> {
        self.inner.active_run().await
    }
}

/// A stored-shape lead with the given confidence, bypassing validation.
pub fn lead_fixture(source: &str, organization: &str, title: &str, confidence: f64) -> Lead {
    let now = Utc::now();
    Lead {
        id: LeadId::new(),
        source: source.to_string(),
        source_url: format!("https://{source}.example/leads/{}", title.to_lowercase().replace(' ', "-")),
        additional_sources: Vec::new(),
        date_extracted: now,
        date_updated: now,
        lead_type: LeadType::JobPosting,
        status: LeadStatus::New,
        notes: None,
        confidence_score: confidence,
        signals: Vec::new(),
        organization: Organization::named(organization),
        opportunity: Opportunity {
            location: Some("Austin, TX".to_string()),
            ..Opportunity::titled(title)
        },
        contacts: Vec::new(),
    }
}

/// A finished run record whose `leads_generated` is `leads`.
pub fn run_fixture(leads: usize, status: RunStatus) -> RunRecord {
    let now = Utc::now();
    RunRecord {
        id: Uuid::now_v7(),
        trigger: TriggerKind::Manual,
        start_time: now,
        end_time: now,
        duration_ms: 0,
        status,
        leads_generated: leads,
        sources: Vec::new(),
        errors: Vec::new(),
    }
}

/// Candidate scoring 0.6: organization, reachable contact and an event
/// classification, with no parseable location.
pub fn event_candidate(source: &str, url: &str) -> CandidateLead {
    CandidateLead::new(source, url, LeadType::JobPosting)
        .with_organization("Acme Corp")
        .with_title("Festival Security Staff")
        .with_text("Contact John Doe, (512) 555-0100, john@acme-security.com")
}

/// Candidate scoring 0.1: organization only.
pub fn bare_candidate(source: &str, url: &str) -> CandidateLead {
    CandidateLead::new(source, url, LeadType::JobPosting)
        .with_organization("Globex")
        .with_title("Staff")
}
