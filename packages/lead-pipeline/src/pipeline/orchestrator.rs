//! Run orchestration: one run at a time, sources in parallel.
//!
//! A run snapshots the configuration, then drives every enabled source
//! through fetch → parse → extract → validate → dedup → persist with at most
//! `max_concurrent_sources` in flight. Each run appends exactly one
//! [`RunRecord`].

use chrono::{DateTime, Local, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{FetchError, FetchResult};
use crate::extract::Extractor;
use crate::scoring::Validator;
use crate::sources::pacing::RequestPacer;
use crate::sources::SourceRegistry;
use crate::traits::source::{build_client, FetchContext, SourceAdapter};
use crate::traits::store::{PipelineStore, UpsertOutcome};
use crate::types::{
    candidate::{CandidateLead, RawDocument},
    config::{ConfigHandle, PipelineConfig, SourceConfig},
    run::{ActiveRun, RunRecord, RunStatus, SourceOutcome, TriggerKind},
};

/// A run lock older than this is treated as left behind by a crashed process.
pub const RUN_LOCK_TTL: chrono::Duration = chrono::Duration::hours(6);

/// Result of asking for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started,
    /// A run was already in progress; the trigger was coalesced into it
    AlreadyRunning,
}

/// Orchestrator-owned run state. Status queries only read it.
#[derive(Debug, Clone, Default)]
struct RunState {
    running: bool,
    current_run_started: Option<DateTime<Utc>>,
}

/// Snapshot reported by [`Orchestrator::status`].
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub running: bool,
    pub current_run_started: Option<DateTime<Utc>>,
    pub last_run: Option<RunRecord>,
    /// Next schedule fire time, local wall clock
    pub next_scheduled: Option<chrono::NaiveDateTime>,
}

/// Marks the run finished when dropped, even if the run task panics.
struct RunGuard {
    state: Arc<Mutex<RunState>>,
    idle: Arc<watch::Sender<bool>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.running = false;
        state.current_run_started = None;
        self.idle.send_replace(true);
    }
}

/// Per-run resources shared by every source task.
struct RunContext {
    config: PipelineConfig,
    client: reqwest::Client,
    cancel: CancellationToken,
    extractor: Extractor,
    validator: Validator,
    store_errors: AtomicUsize,
}

/// Drives pipeline runs against a store.
#[derive(Clone)]
pub struct Orchestrator {
    config: ConfigHandle,
    registry: SourceRegistry,
    store: Arc<dyn PipelineStore>,
    state: Arc<Mutex<RunState>>,
    idle: Arc<watch::Sender<bool>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: ConfigHandle, registry: SourceRegistry, store: Arc<dyn PipelineStore>) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            config,
            registry,
            store,
            state: Arc::new(Mutex::new(RunState::default())),
            idle: Arc::new(idle),
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an external shutdown token. Cancelling it aborts the current run.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).running
    }

    fn try_begin(&self) -> Option<RunGuard> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.running {
            return None;
        }
        state.running = true;
        state.current_run_started = Some(Utc::now());
        self.idle.send_replace(false);
        Some(RunGuard {
            state: self.state.clone(),
            idle: self.idle.clone(),
        })
    }

    /// Start a manual run in the background and return immediately.
    pub fn run_now(&self) -> TriggerOutcome {
        self.trigger(TriggerKind::Manual)
    }

    /// Start a run in the background unless one is in progress.
    pub fn trigger(&self, trigger: TriggerKind) -> TriggerOutcome {
        let Some(guard) = self.try_begin() else {
            info!(?trigger, "run already in progress, trigger coalesced");
            return TriggerOutcome::AlreadyRunning;
        };

        let this = self.clone();
        tokio::spawn(async move {
            this.execute(trigger, guard).await;
        });
        TriggerOutcome::Started
    }

    /// Run to completion on the current task. `None` if a run is in
    /// progress here or in another process sharing the store.
    pub async fn run_once(&self, trigger: TriggerKind) -> Option<RunRecord> {
        let guard = self.try_begin()?;
        self.execute(trigger, guard).await
    }

    /// Wait until no run is in progress.
    pub async fn wait_idle(&self) {
        let mut idle = self.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }

    pub async fn status(&self) -> PipelineStatus {
        let state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let last_run = match self.store.last_run().await {
            Ok(run) => run,
            Err(e) => {
                warn!(error = %e, "failed to read run history");
                None
            }
        };

        // A run held by another process on the same store
        let stale_before = Utc::now() - RUN_LOCK_TTL;
        let shared = match self.store.active_run().await {
            Ok(active) => active.filter(|run| run.started_at >= stale_before),
            Err(e) => {
                warn!(error = %e, "failed to read run lock");
                None
            }
        };

        PipelineStatus {
            running: state.running || shared.is_some(),
            current_run_started: state
                .current_run_started
                .or(shared.map(|run| run.started_at)),
            last_run,
            next_scheduled: self
                .config
                .snapshot()
                .schedule
                .next_fire_after(Local::now().naive_local()),
        }
    }

    async fn execute(&self, trigger: TriggerKind, _guard: RunGuard) -> Option<RunRecord> {
        let start_time = Utc::now();
        let run_id = Uuid::now_v7();
        let lock = ActiveRun {
            run_id,
            trigger,
            started_at: start_time,
        };
        match self.store.claim_run(&lock, start_time - RUN_LOCK_TTL).await {
            Ok(true) => {}
            Ok(false) => {
                info!(?trigger, "run in progress in another process, trigger coalesced");
                return None;
            }
            Err(e) => {
                error!(error = %e, "failed to take run lock");
                return None;
            }
        }

        let record = self.execute_locked(run_id, trigger, start_time).await;
        if let Err(e) = self.store.release_run(run_id).await {
            error!(run_id = %run_id, error = %e, "failed to release run lock");
        }
        Some(record)
    }

    async fn execute_locked(
        &self,
        run_id: Uuid,
        trigger: TriggerKind,
        start_time: DateTime<Utc>,
    ) -> RunRecord {
        let config = self.config.snapshot();
        info!(run_id = %run_id, ?trigger, "pipeline run starting");

        let mut errors = Vec::new();
        let mut store_errors = 0;
        let outcomes = match build_client(&config.scraping) {
            Ok(client) => {
                let adapters = self.enabled_adapters(&config, &mut errors);
                let ctx = RunContext {
                    config: config.clone(),
                    client,
                    cancel: self.shutdown.child_token(),
                    extractor: Extractor::new().with_enrichment(config.validation.enrichment_enabled),
                    validator: Validator::new(&config.validation),
                    store_errors: AtomicUsize::new(0),
                };
                let outcomes = self.run_sources(&ctx, adapters).await;
                store_errors = ctx.store_errors.into_inner();
                Some(outcomes)
            }
            Err(e) => {
                error!(error = %e, "failed to build HTTP client");
                errors.push(format!("failed to build HTTP client: {e}"));
                None
            }
        };

        let max_store_errors = config.max_store_errors.max(1);
        if store_errors >= max_store_errors {
            errors.push(format!("store error limit reached ({store_errors} errors)"));
        }
        let (status, outcomes) = match outcomes {
            Some(outcomes) => (run_status(&outcomes, store_errors, max_store_errors), outcomes),
            None => (RunStatus::Failed, Vec::new()),
        };
        let end_time = Utc::now();
        let record = RunRecord {
            id: run_id,
            trigger,
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds().max(0) as u64,
            status,
            leads_generated: outcomes.iter().map(|o| o.accepted).sum(),
            sources: outcomes,
            errors,
        };

        info!(
            run_id = %record.id,
            status = record.status.as_str(),
            leads_generated = record.leads_generated,
            duration_ms = record.duration_ms,
            "pipeline run finished"
        );
        if let Err(e) = self.store.append_run(record.clone(), config.max_history).await {
            error!(run_id = %record.id, error = %e, "failed to append run record");
        }
        record
    }

    /// Enabled sources with a registered adapter, in config order.
    fn enabled_adapters(
        &self,
        config: &PipelineConfig,
        errors: &mut Vec<String>,
    ) -> Vec<(Arc<dyn SourceAdapter>, SourceConfig)> {
        let mut adapters = Vec::new();
        for (name, source) in config.sources.iter().filter(|(_, s)| s.enabled) {
            match self.registry.get(name) {
                Some(adapter) => adapters.push((adapter, source.clone())),
                None => {
                    warn!(source = %name, "no adapter registered for enabled source");
                    errors.push(format!("no adapter registered for source {name}"));
                }
            }
        }
        adapters
    }

    async fn run_sources(
        &self,
        ctx: &RunContext,
        adapters: Vec<(Arc<dyn SourceAdapter>, SourceConfig)>,
    ) -> Vec<SourceOutcome> {
        let limit = ctx.config.scraping.max_concurrent_sources.max(1);
        let tasks: Vec<BoxFuture<'_, SourceOutcome>> = adapters
            .into_iter()
            .map(|(adapter, source)| -> BoxFuture<'_, SourceOutcome> {
                Box::pin(async move { self.run_source(ctx, adapter.as_ref(), &source).await })
            })
            .collect();
        let mut outcomes: Vec<SourceOutcome> = stream::iter(tasks)
            .buffer_unordered(limit)
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.source.cmp(&b.source));
        outcomes
    }

    async fn run_source(
        &self,
        ctx: &RunContext,
        adapter: &dyn SourceAdapter,
        source: &SourceConfig,
    ) -> SourceOutcome {
        let name = adapter.name();
        let mut outcome = SourceOutcome::new(name);
        let fetch_ctx = FetchContext::new(
            ctx.client.clone(),
            Arc::new(RequestPacer::new(ctx.config.scraping.request_delay())),
            ctx.cancel.clone(),
        );

        let documents = match fetch_with_retries(ctx, adapter, source, &fetch_ctx, &mut outcome).await {
            Ok(documents) => documents,
            Err(e) => {
                error!(source = %name, attempts = outcome.attempts, error = %e, "source failed");
                outcome.fail(e.to_string());
                return outcome;
            }
        };
        outcome.documents = documents.len();

        for document in &documents {
            if ctx.cancel.is_cancelled() {
                outcome.fail(FetchError::Cancelled.to_string());
                break;
            }
            let candidates = match adapter.parse(document) {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(source = %name, url = %document.url, error = %e, "skipping unparseable document");
                    outcome.parse_errors += 1;
                    continue;
                }
            };
            outcome.candidates += candidates.len();

            for candidate in candidates {
                self.process_candidate(ctx, candidate, &mut outcome).await;
            }
        }

        info!(
            source = %name,
            documents = outcome.documents,
            candidates = outcome.candidates,
            accepted = outcome.accepted,
            rejected = outcome.rejected,
            "source finished"
        );
        outcome
    }

    /// Extract, validate and persist one candidate. A candidate is either
    /// fully persisted or not at all.
    async fn process_candidate(
        &self,
        ctx: &RunContext,
        candidate: CandidateLead,
        outcome: &mut SourceOutcome,
    ) {
        let mut candidate = ctx.extractor.extract(candidate);
        let card = match ctx.validator.validate(&mut candidate) {
            Ok(card) => card,
            Err(rejection) => {
                debug!(source = %candidate.source, url = %candidate.source_url, %rejection, "candidate rejected");
                outcome.rejected += 1;
                return;
            }
        };

        let lead = candidate.into_lead(&card, Utc::now());
        let result = if ctx.config.validation.deduplication_enabled {
            self.store.upsert(lead, ctx.config.validation.match_policy).await
        } else {
            self.store.insert(lead).await.map(UpsertOutcome::Inserted)
        };

        match result {
            Ok(UpsertOutcome::Inserted(id)) => {
                debug!(lead_id = %id, "lead inserted");
                outcome.accepted += 1;
                outcome.inserted += 1;
            }
            Ok(UpsertOutcome::Merged(id)) => {
                debug!(lead_id = %id, "lead merged");
                outcome.accepted += 1;
                outcome.merged += 1;
            }
            Err(e) => {
                error!(source = %outcome.source, error = %e, "failed to persist lead");
                outcome.store_errors += 1;
                let total = ctx.store_errors.fetch_add(1, Ordering::SeqCst) + 1;
                if total >= ctx.config.max_store_errors.max(1) && !ctx.cancel.is_cancelled() {
                    error!(store_errors = total, "store error limit reached, aborting run");
                    ctx.cancel.cancel();
                }
            }
        }
    }
}

/// Collect a source's documents, restarting the stream after a failure.
async fn fetch_with_retries(
    ctx: &RunContext,
    adapter: &dyn SourceAdapter,
    source: &SourceConfig,
    fetch_ctx: &FetchContext,
    outcome: &mut SourceOutcome,
) -> FetchResult<Vec<RawDocument>> {
    let max_retries = ctx.config.scraping.max_retries;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        outcome.attempts = attempt;

        let error = match adapter.fetch(source, fetch_ctx).try_collect::<Vec<_>>().await {
            Ok(documents) => return Ok(documents),
            Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
            Err(e) => e,
        };
        if attempt > max_retries {
            return Err(error);
        }

        let delay = ctx.config.scraping.retry_delay(attempt);
        warn!(
            source = adapter.name(),
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "fetch failed, retrying"
        );
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Final run status from per-source outcomes and the run's store errors.
pub fn run_status(outcomes: &[SourceOutcome], store_errors: usize, max_store_errors: usize) -> RunStatus {
    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    if store_errors >= max_store_errors.max(1) || (!outcomes.is_empty() && failed == outcomes.len()) {
        RunStatus::Failed
    } else if failed > 0 {
        RunStatus::PartialFailure
    } else {
        RunStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, failed: bool) -> SourceOutcome {
        let mut outcome = SourceOutcome::new(name);
        if failed {
            outcome.fail("HTTP 503");
        }
        outcome
    }

    #[test]
    fn test_run_status() {
        let ok = [outcome("a", false), outcome("b", false)];
        let some = [outcome("a", true), outcome("b", false)];
        let all = [outcome("a", true), outcome("b", true)];

        assert_eq!(run_status(&ok, 0, 10), RunStatus::Completed);
        assert_eq!(run_status(&some, 0, 10), RunStatus::PartialFailure);
        assert_eq!(run_status(&all, 0, 10), RunStatus::Failed);
        assert_eq!(run_status(&ok, 10, 10), RunStatus::Failed);
        assert_eq!(run_status(&[], 0, 10), RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_run_guard_releases_state() {
        use crate::stores::MemoryStore;

        let orchestrator = Orchestrator::new(
            ConfigHandle::new(PipelineConfig::empty()),
            SourceRegistry::new(),
            Arc::new(MemoryStore::new()),
        );

        let guard = orchestrator.try_begin().unwrap();
        assert!(orchestrator.is_running());
        assert!(orchestrator.try_begin().is_none());
        assert_eq!(orchestrator.run_now(), TriggerOutcome::AlreadyRunning);

        drop(guard);
        assert!(!orchestrator.is_running());
        orchestrator.wait_idle().await;
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_trigger_runs_sources_on_a_spawned_task() {
        use crate::stores::MemoryStore;
        use crate::testing::{event_candidate, MockSource};
        use crate::traits::store::RunHistory;
        use crate::types::config::{ScrapingConfig, SourceConfig};

        let config = PipelineConfig::empty()
            .with_source("alpha", SourceConfig::new("https://alpha.example/search"))
            .with_source("beta", SourceConfig::new("https://beta.example/search"))
            .with_scraping(ScrapingConfig {
                request_delay_seconds: 0.0,
                ..Default::default()
            });
        let mut registry = SourceRegistry::new();
        for name in ["alpha", "beta"] {
            let url = format!("https://{name}.example/1");
            registry.register(Arc::new(
                MockSource::new(name).with_document(url.clone(), vec![event_candidate(name, &url)]),
            ));
        }
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(ConfigHandle::new(config), registry, store.clone());

        assert_send(&orchestrator.run_once(TriggerKind::Manual));
        assert_eq!(orchestrator.trigger(TriggerKind::Schedule), TriggerOutcome::Started);
        orchestrator.wait_idle().await;

        let record = store.last_run().await.unwrap().unwrap();
        assert_eq!(record.trigger, TriggerKind::Schedule);
        assert_eq!(record.sources.len(), 2);
        assert_eq!(record.status, RunStatus::Completed);
        assert!(store.active_run().await.unwrap().is_none());
    }
}
