//! Integration tests for full pipeline runs.
//!
//! These drive the orchestrator end to end with mock sources:
//! 1. Fetch (with retries) from each enabled source
//! 2. Parse, extract and score candidates
//! 3. Merge duplicates into the store
//! 4. Record one run per trigger

use std::sync::Arc;
use std::time::Duration;

use lead_pipeline::{
    testing::{bare_candidate, event_candidate, FailingStore, InFlight, MockSource, MockSourceCall},
    CandidateLead, ConfigHandle, LeadFilter, LeadStore, LeadType, MemoryStore, Orchestrator,
    PipelineConfig, PipelineStore, RawDocument, RunHistory, RunStatus, ScrapingConfig,
    SourceConfig, SourceRegistry, TriggerKind, TriggerOutcome, ValidationConfig,
};
use tokio_util::sync::CancellationToken;

/// Fast, retry-friendly scraping settings.
fn scraping(max_retries: u32) -> ScrapingConfig {
    ScrapingConfig {
        request_delay_seconds: 0.0,
        retry_backoff_seconds: 0.01,
        max_retries,
        ..Default::default()
    }
}

/// Config enabling each named source.
fn config(sources: &[&str], max_retries: u32) -> PipelineConfig {
    sources
        .iter()
        .fold(PipelineConfig::empty(), |config, name| {
            config.with_source(*name, SourceConfig::new(format!("https://{name}.example/search")))
        })
        .with_scraping(scraping(max_retries))
}

fn registry(sources: Vec<Arc<MockSource>>) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(source);
    }
    registry
}

fn orchestrator(
    config: PipelineConfig,
    sources: Vec<Arc<MockSource>>,
) -> (Orchestrator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(ConfigHandle::new(config), registry(sources), store.clone());
    (orchestrator, store)
}

async fn wait_until_running(orchestrator: &Orchestrator) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !orchestrator.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

/// Richer listing of the same opportunity as [`event_candidate`]: adds a
/// description, scoring 0.8.
fn described_event_candidate(source: &str, url: &str) -> CandidateLead {
    event_candidate(source, url)
        .with_description("Crowd control for a three-day music festival downtown")
}

#[tokio::test]
async fn test_end_to_end_keeps_only_confident_candidates() {
    let alpha = Arc::new(
        MockSource::new("alpha")
            .with_document("https://alpha.example/1", vec![event_candidate("alpha", "https://alpha.example/1")])
            .with_document("https://alpha.example/2", vec![bare_candidate("alpha", "https://alpha.example/2")]),
    );
    let (orchestrator, store) = orchestrator(config(&["alpha"], 0), vec![alpha]);

    let record = orchestrator.run_once(TriggerKind::Manual).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.leads_generated, 1);
    let outcome = record.outcome_for("alpha").unwrap();
    assert_eq!(outcome.documents, 2);
    assert_eq!(outcome.candidates, 2);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.inserted, 1);

    let leads = store.all_leads();
    assert_eq!(leads.len(), 1);
    let lead = &leads[0];
    assert_eq!(lead.confidence_score, 0.6);
    assert_eq!(lead.organization.name, "Acme Corp");
    assert_eq!(lead.contacts.len(), 1);
    assert_eq!(lead.contacts[0].phone.as_deref(), Some("+15125550100"));
    assert_eq!(lead.contacts[0].email.as_deref(), Some("john@acme-security.com"));
}

#[tokio::test]
async fn test_second_run_over_same_documents_is_idempotent() {
    let alpha = Arc::new(
        MockSource::new("alpha")
            .with_document("https://alpha.example/1", vec![event_candidate("alpha", "https://alpha.example/1")]),
    );
    let (orchestrator, store) = orchestrator(config(&["alpha"], 0), vec![alpha]);

    orchestrator.run_once(TriggerKind::Manual).await.unwrap();
    let second = orchestrator.run_once(TriggerKind::Manual).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    let outcome = second.outcome_for("alpha").unwrap();
    assert_eq!(outcome.inserted, 0);
    assert_eq!(outcome.merged, 1);
    assert!(store.all_leads()[0].additional_sources.is_empty());
}

#[tokio::test]
async fn test_cross_source_duplicates_merge_to_higher_confidence() {
    let alpha = Arc::new(
        MockSource::new("alpha")
            .with_document("https://alpha.example/1", vec![event_candidate("alpha", "https://alpha.example/1")]),
    );
    let beta = Arc::new(MockSource::new("beta").with_document(
        "https://beta.example/9",
        vec![described_event_candidate("beta", "https://beta.example/9")],
    ));
    let (orchestrator, store) = orchestrator(config(&["alpha", "beta"], 0), vec![alpha, beta]);

    let record = orchestrator.run_once(TriggerKind::Manual).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.leads_generated, 2);
    let leads = store.all_leads();
    assert_eq!(leads.len(), 1);
    let lead = &leads[0];
    assert_eq!(lead.confidence_score, 0.8);
    assert!(lead.seen_in("alpha") && lead.seen_in("beta"));
    assert_eq!(lead.additional_sources.len(), 1);
    assert!(lead.opportunity.description.is_some());
}

#[tokio::test]
async fn test_failing_source_is_isolated() {
    let alpha = Arc::new(MockSource::new("alpha").always_failing());
    let beta = Arc::new(
        MockSource::new("beta")
            .with_document("https://beta.example/1", vec![event_candidate("beta", "https://beta.example/1")]),
    );
    let (orchestrator, store) = orchestrator(config(&["alpha", "beta"], 1), vec![alpha.clone(), beta]);

    let record = orchestrator.run_once(TriggerKind::Manual).await.unwrap();

    assert_eq!(record.status, RunStatus::PartialFailure);
    let failed: Vec<_> = record.failed_sources().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source, "alpha");
    assert_eq!(failed[0].accepted, 0);
    assert!(failed[0].error.as_deref().unwrap().contains("503"));
    assert_eq!(alpha.fetch_attempts(), 2);

    let leads = store.query_all(&LeadFilter::new()).await.unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].source, "beta");
}

#[tokio::test]
async fn test_retries_restart_the_source() {
    let flaky = Arc::new(
        MockSource::new("flaky")
            .failing_first(2)
            .with_document("https://flaky.example/1", vec![event_candidate("flaky", "https://flaky.example/1")]),
    );
    let (orchestrator, store) = orchestrator(config(&["flaky"], 2), vec![flaky.clone()]);

    let record = orchestrator.run_once(TriggerKind::Manual).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.outcome_for("flaky").unwrap().attempts, 3);
    assert_eq!(flaky.fetch_attempts(), 3);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_retries_exhausted_fails_run() {
    let flaky = Arc::new(MockSource::new("flaky").failing_first(3));
    let (orchestrator, _store) = orchestrator(config(&["flaky"], 2), vec![flaky.clone()]);

    let record = orchestrator.run_once(TriggerKind::Manual).await.unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.outcome_for("flaky").unwrap().attempts, 3);
    assert_eq!(flaky.fetch_attempts(), 3);
}

#[tokio::test]
async fn test_concurrent_trigger_is_coalesced() {
    let slow = Arc::new(
        MockSource::new("slow")
            .with_delay(Duration::from_millis(200))
            .with_document("https://slow.example/1", vec![event_candidate("slow", "https://slow.example/1")]),
    );
    let (orchestrator, store) = orchestrator(config(&["slow"], 0), vec![slow]);

    let background = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_once(TriggerKind::Schedule).await })
    };
    wait_until_running(&orchestrator).await;

    assert_eq!(orchestrator.run_now(), TriggerOutcome::AlreadyRunning);
    assert!(orchestrator.run_once(TriggerKind::Manual).await.is_none());
    let status = orchestrator.status().await;
    assert!(status.running);
    assert!(status.current_run_started.is_some());

    let record = background.await.unwrap().unwrap();
    assert_eq!(record.trigger, TriggerKind::Schedule);
    assert_eq!(store.recent_runs(10).await.unwrap().len(), 1);
    assert!(!orchestrator.status().await.running);
}

#[tokio::test]
async fn test_run_now_returns_immediately() {
    let slow = Arc::new(MockSource::new("slow").with_delay(Duration::from_millis(50)));
    let (orchestrator, store) = orchestrator(config(&["slow"], 0), vec![slow]);

    assert_eq!(orchestrator.run_now(), TriggerOutcome::Started);
    assert!(orchestrator.is_running());
    orchestrator.wait_idle().await;

    let last = store.last_run().await.unwrap().unwrap();
    assert_eq!(last.trigger, TriggerKind::Manual);
    assert_eq!(orchestrator.status().await.last_run.unwrap().id, last.id);
}

#[tokio::test]
async fn test_threshold_is_inclusive() {
    let source = || {
        Arc::new(
            MockSource::new("alpha")
                .with_document("https://alpha.example/1", vec![event_candidate("alpha", "https://alpha.example/1")]),
        )
    };
    let with_min = |min: f64| {
        config(&["alpha"], 0).with_validation(ValidationConfig {
            min_confidence_score: min,
            ..Default::default()
        })
    };

    let (at_score, store) = orchestrator(with_min(0.6), vec![source()]);
    at_score.run_once(TriggerKind::Manual).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 1);

    let (above_score, store) = orchestrator(with_min(0.7), vec![source()]);
    let record = above_score.run_once(TriggerKind::Manual).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
    assert_eq!(record.outcome_for("alpha").unwrap().rejected, 1);
    assert_eq!(record.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_dedup_disabled_inserts_every_candidate() {
    let alpha = Arc::new(
        MockSource::new("alpha")
            .with_document("https://alpha.example/1", vec![event_candidate("alpha", "https://alpha.example/1")]),
    );
    let config = config(&["alpha"], 0).with_validation(ValidationConfig {
        deduplication_enabled: false,
        ..Default::default()
    });
    let (orchestrator, store) = orchestrator(config, vec![alpha]);

    orchestrator.run_once(TriggerKind::Manual).await.unwrap();
    orchestrator.run_once(TriggerKind::Manual).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_unparseable_document_is_skipped() {
    let alpha = Arc::new(
        MockSource::new("alpha")
            .with_raw_document(RawDocument::new("https://alpha.example/broken", "<html>oops"))
            .with_document("https://alpha.example/1", vec![event_candidate("alpha", "https://alpha.example/1")]),
    );
    let (orchestrator, store) = orchestrator(config(&["alpha"], 0), vec![alpha]);

    let record = orchestrator.run_once(TriggerKind::Manual).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    let outcome = record.outcome_for("alpha").unwrap();
    assert_eq!(outcome.parse_errors, 1);
    assert_eq!(outcome.documents, 2);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_history_is_bounded_to_max_history() {
    let alpha = Arc::new(MockSource::new("alpha"));
    let (orchestrator, store) = orchestrator(config(&["alpha"], 0).with_max_history(2), vec![alpha]);

    for _ in 0..3 {
        orchestrator.run_once(TriggerKind::Manual).await.unwrap();
    }

    assert_eq!(store.run_count(), 2);
    assert_eq!(store.recent_runs(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_sources() {
    let slow = Arc::new(MockSource::new("slow").with_delay(Duration::from_secs(30)));
    let shutdown = CancellationToken::new();
    let (orchestrator, _store) = orchestrator(config(&["slow"], 3), vec![slow.clone()]);
    let orchestrator = orchestrator.with_shutdown(shutdown.clone());

    let background = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_once(TriggerKind::Manual).await })
    };
    wait_until_running(&orchestrator).await;
    shutdown.cancel();

    let record = tokio::time::timeout(Duration::from_secs(2), background)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    let outcome = record.outcome_for("slow").unwrap();
    assert!(outcome.error.as_deref().unwrap().contains("cancelled"));
    assert_eq!(slow.fetch_attempts(), 1);
}

#[tokio::test]
async fn test_disabled_and_unregistered_sources() {
    let alpha = Arc::new(MockSource::new("alpha").with_lead_type(LeadType::Rfp));
    let beta = Arc::new(MockSource::new("beta"));
    let config = config(&["alpha", "ghost"], 0)
        .with_source("beta", SourceConfig::new("https://beta.example/search").disabled());
    let (orchestrator, _store) = orchestrator(config, vec![alpha, beta.clone()]);

    let record = orchestrator.run_once(TriggerKind::Manual).await.unwrap();

    assert_eq!(record.sources.len(), 1);
    assert!(record.outcome_for("alpha").is_some());
    assert_eq!(beta.fetch_attempts(), 0);
    assert_eq!(record.errors.len(), 1);
    assert!(record.errors[0].contains("ghost"));
    assert_eq!(record.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_store_error_limit_fails_run_and_stops_sources() {
    let alpha = Arc::new(
        MockSource::new("alpha")
            .with_document("https://alpha.example/1", vec![event_candidate("alpha", "https://alpha.example/1")])
            .with_document("https://alpha.example/2", vec![event_candidate("alpha", "https://alpha.example/2")])
            .with_document("https://alpha.example/3", vec![event_candidate("alpha", "https://alpha.example/3")]),
    );
    let beta = Arc::new(
        MockSource::new("beta")
            .with_document("https://beta.example/1", vec![event_candidate("beta", "https://beta.example/1")]),
    );

    // one source at a time so alpha exhausts the budget before beta starts
    let mut config = config(&["alpha", "beta"], 0);
    config.max_store_errors = 2;
    config.scraping.max_concurrent_sources = 1;

    let store = Arc::new(FailingStore::new());
    let orchestrator = Orchestrator::new(
        ConfigHandle::new(config),
        registry(vec![alpha.clone(), beta.clone()]),
        store.clone(),
    );

    let record = orchestrator.run_once(TriggerKind::Manual).await.unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.leads_generated, 0);
    assert_eq!(store.write_attempts(), 2);
    assert!(record.errors.iter().any(|e| e.contains("store error limit")));

    let alpha_outcome = record.outcome_for("alpha").unwrap();
    assert_eq!(alpha_outcome.store_errors, 2);
    assert!(alpha_outcome.is_failed());
    assert!(alpha_outcome.error.as_deref().unwrap().contains("cancelled"));
    let alpha_parses = alpha
        .calls()
        .into_iter()
        .filter(|c| matches!(c, MockSourceCall::Parse { .. }))
        .count();
    assert_eq!(alpha_parses, 2);

    let beta_outcome = record.outcome_for("beta").unwrap();
    assert_eq!(beta_outcome.store_errors, 0);
    assert!(beta_outcome.is_failed());
    assert!(!beta.calls().iter().any(|c| matches!(c, MockSourceCall::Parse { .. })));

    assert_eq!(store.recent_runs(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_sources_are_bounded() {
    let in_flight = InFlight::new();
    let names = ["alpha", "beta", "gamma", "delta"];
    let sources: Vec<_> = names
        .iter()
        .map(|name| {
            let url = format!("https://{name}.example/1");
            Arc::new(
                MockSource::new(*name)
                    .with_delay(Duration::from_millis(50))
                    .with_in_flight(in_flight.clone())
                    .with_document(url.clone(), vec![bare_candidate(name, &url)]),
            )
        })
        .collect();

    let mut config = config(&names, 0);
    config.scraping.max_concurrent_sources = 2;
    let (orchestrator, _store) = orchestrator(config, sources.clone());

    let record = orchestrator.run_once(TriggerKind::Manual).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.sources.len(), 4);
    assert_eq!(in_flight.peak(), 2);
    assert_eq!(in_flight.current(), 0);
    assert!(sources.iter().all(|s| s.fetch_attempts() == 1));
}

#[tokio::test]
async fn test_run_lock_spans_orchestrators_sharing_a_store() {
    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn PipelineStore> = store.clone();
    let serving = Orchestrator::new(
        ConfigHandle::new(config(&["slow"], 0)),
        registry(vec![Arc::new(MockSource::new("slow").with_delay(Duration::from_millis(200)))]),
        shared.clone(),
    );
    let cli = Orchestrator::new(
        ConfigHandle::new(config(&["quick"], 0)),
        registry(vec![Arc::new(MockSource::new("quick"))]),
        shared,
    );

    let background = {
        let serving = serving.clone();
        tokio::spawn(async move { serving.run_once(TriggerKind::Schedule).await })
    };
    tokio::time::timeout(Duration::from_secs(2), async {
        while store.active_run().await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // The other orchestrator sees the run and refuses to start its own
    let status = cli.status().await;
    assert!(status.running);
    assert!(status.current_run_started.is_some());
    assert!(cli.run_once(TriggerKind::Manual).await.is_none());

    let record = background.await.unwrap().unwrap();
    assert_eq!(record.trigger, TriggerKind::Schedule);
    assert_eq!(store.recent_runs(10).await.unwrap().len(), 1);
    assert!(store.active_run().await.unwrap().is_none());
    assert!(!cli.status().await.running);

    // Free again: the second orchestrator can run
    assert!(cli.run_once(TriggerKind::Manual).await.is_some());
    assert_eq!(store.recent_runs(10).await.unwrap().len(), 2);
}
